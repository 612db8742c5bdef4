use crate::{annotations, canary, diagnostics::Diagnostics, locations, servers, upstreams};
use chrono::{offset::Utc, DateTime};
use mci_ingress_controller_core::{
    Backend, BackendConfig, BackendPort, Configuration, EndpointResolver, Protocol,
    ResourceStore, RoutingResource, Server, SslCert, SslPassthroughBackend, StreamServices,
    DEFAULT_UPSTREAM_NAME, ROOT_LOCATION,
};
use mci_ingress_controller_k8s_api::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, instrument, warn};

/// Synthesizes data plane configurations from routing resources.
#[derive(Debug)]
pub struct Synthesizer<'s, S: ?Sized> {
    store: &'s S,
    default_service: Option<String>,
}

/// The result of one synthesis pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Synthesized {
    /// Every hostname and alias served.
    pub hosts: BTreeSet<String>,
    pub configuration: Configuration,
    pub diagnostics: Diagnostics,
}

/// State shared by the stages of one synthesis pass.
pub(crate) struct Context<'s, S: ?Sized> {
    pub(crate) store: &'s S,
    pub(crate) backend_config: BackendConfig,
    pub(crate) default_certificate: Option<SslCert>,
    pub(crate) now: DateTime<Utc>,
    pub(crate) diagnostics: Diagnostics,
}

const CUSTOM_DEFAULT_BACKEND_PREFIX: &str = "custom-default-backend-";

// === impl Synthesizer ===

impl<'s, S> Synthesizer<'s, S>
where
    S: ResourceStore + EndpointResolver + StreamServices + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            default_service: None,
        }
    }

    /// Sets the `namespace/name` key of the service that backs the default
    /// upstream.
    pub fn with_default_service(mut self, key: impl Into<String>) -> Self {
        self.default_service = Some(key.into());
        self
    }

    /// Synthesizes a configuration from every resource in the store.
    pub fn synthesize_all(&self) -> Synthesized {
        self.synthesize(&self.store.list_routing_resources())
    }

    #[instrument(skip_all, fields(resources = resources.len()))]
    pub fn synthesize(&self, resources: &[RoutingResource]) -> Synthesized {
        let backend_config = self.store.backend_config();
        let mut resources = resources.to_vec();
        if !backend_config.allow_snippet_annotations {
            for resource in &mut resources {
                let key = resource.key();
                annotations::drop_snippet_directives(&mut resource.annotations, &key);
            }
        }

        let mut cx = Context {
            store: self.store,
            default_certificate: self.store.default_certificate(),
            backend_config,
            now: Utc::now(),
            diagnostics: Diagnostics::default(),
        };

        let default_upstream = upstreams::default_upstream(
            self.store,
            self.default_service.as_deref(),
            &mut cx.diagnostics,
        );
        let mut upstreams = upstreams::build(&mut cx, &resources, &default_upstream);
        let mut servers = servers::build(&mut cx, &resources, &upstreams, &default_upstream);
        servers::add_locations(&mut cx, &resources, &mut upstreams, &mut servers);

        if resources.iter().any(|r| !r.is_canary()) {
            canary::merge(&resources, &mut upstreams, &servers, &mut cx.diagnostics);
        } else {
            canary::prune(&resources, &mut upstreams);
        }

        self.add_custom_default_backends(&mut upstreams, &mut servers);
        mark_ssl_passthrough(&mut upstreams, &servers);

        for server in servers.values_mut() {
            let expanded = locations::expand_prefixes(std::mem::take(&mut server.locations));
            server.locations = expanded;
            locations::sort(&mut server.locations);
        }

        let passthrough_backends = passthrough_backends(&servers);
        let hosts = servers
            .values()
            .flat_map(|s| std::iter::once(&s.hostname).chain(s.aliases.iter()))
            .cloned()
            .collect();
        let stream_snippets = resources
            .iter()
            .map(|r| r.annotations.stream_snippet.clone())
            .filter(|s| !s.is_empty())
            .collect();

        debug!(
            backends = upstreams.len(),
            servers = servers.len(),
            diagnostics = cx.diagnostics.len(),
            "Synthesized configuration"
        );
        Synthesized {
            hosts,
            configuration: Configuration {
                backends: upstreams.into_values().collect(),
                servers: servers.into_values().collect(),
                tcp_endpoints: self.store.stream_services(Protocol::Tcp),
                udp_endpoints: self.store.stream_services(Protocol::Udp),
                passthrough_backends,
                backend_config_checksum: cx.backend_config.checksum.clone(),
                default_ssl_certificate: cx.default_certificate,
                stream_snippets,
            },
            diagnostics: cx.diagnostics,
        }
    }

    /// Gives locations with a custom default backend service a backend of
    /// their own. A location is rewired to it only when its primary backend
    /// has no endpoints.
    fn add_custom_default_backends(
        &self,
        upstreams: &mut BTreeMap<String, Backend>,
        servers: &mut BTreeMap<String, Server>,
    ) {
        let mut extra = BTreeMap::new();
        for upstream in upstreams.values() {
            if upstream.name == DEFAULT_UPSTREAM_NAME {
                continue;
            }

            for server in servers.values_mut() {
                for loc in server.locations.iter_mut() {
                    if loc.backend != upstream.name {
                        continue;
                    }
                    let Some(svc) = loc.default_backend.as_ref() else {
                        continue;
                    };

                    let key = format!(
                        "{}/{}",
                        svc.namespace().unwrap_or_default(),
                        svc.name_any()
                    );
                    let Some(port) = svc
                        .spec
                        .as_ref()
                        .and_then(|s| s.ports.as_ref())
                        .and_then(|ports| ports.first())
                    else {
                        error!(service = %key, "Custom default backend service has no ports");
                        continue;
                    };

                    let endpoints = match self
                        .store
                        .resolve_endpoints(&key, &BackendPort::Number(port.port))
                    {
                        Ok(endpoints) => endpoints,
                        Err(error) => {
                            debug!(%error, service = %key, "Failed to resolve custom default backend endpoints");
                            Vec::new()
                        }
                    };
                    if endpoints.is_empty() {
                        continue;
                    }

                    let name = format!(
                        "{}{}-{}",
                        CUSTOM_DEFAULT_BACKEND_PREFIX,
                        svc.namespace().unwrap_or_default(),
                        svc.name_any()
                    );
                    extra.entry(name.clone()).or_insert_with(|| {
                        let mut backend = upstream.clone();
                        backend.name = name.clone();
                        backend.endpoints = endpoints;
                        backend
                    });

                    loc.default_backend_upstream_name = name.clone();
                    if upstream.endpoints.is_empty() {
                        debug!(
                            host = %server.hostname,
                            path = %loc.path,
                            backend = %name,
                            "Routing location to its custom default backend"
                        );
                        loc.backend = name;
                    }
                }
            }
        }
        upstreams.extend(extra);
    }
}

/// Flags the backend behind each passthrough server's root location.
fn mark_ssl_passthrough(
    upstreams: &mut BTreeMap<String, Backend>,
    servers: &BTreeMap<String, Server>,
) {
    for server in servers.values().filter(|s| s.ssl_passthrough) {
        for loc in server.locations.iter().filter(|l| l.path == ROOT_LOCATION) {
            if loc.backend == DEFAULT_UPSTREAM_NAME {
                warn!(host = %server.hostname, "SSL passthrough is not supported with the default backend");
                continue;
            }
            if let Some(upstream) = upstreams.get_mut(&loc.backend) {
                upstream.ssl_passthrough = true;
            }
        }
    }
}

fn passthrough_backends(servers: &BTreeMap<String, Server>) -> Vec<SslPassthroughBackend> {
    let mut out = Vec::new();
    for server in servers.values().filter(|s| s.ssl_passthrough) {
        for loc in &server.locations {
            if loc.path != ROOT_LOCATION {
                warn!(host = %server.hostname, path = %loc.path, "Ignoring non-root location of an SSL passthrough server");
                continue;
            }
            out.push(SslPassthroughBackend {
                service: loc.service.clone(),
                backend: loc.backend.clone(),
                hostname: server.hostname.clone(),
                port: loc.port.clone(),
            });
            break;
        }
    }
    out
}

/// Lists the keys of resources that own a location in `previous` but none in
/// `next`.
pub fn removed_ingresses(previous: &Configuration, next: &Configuration) -> Vec<String> {
    let owners = |config: &Configuration| {
        config
            .servers
            .iter()
            .flat_map(|s| s.locations.iter())
            .filter_map(|l| l.ingress.as_ref())
            .map(|i| format!("{}/{}", i.namespace, i.name))
            .collect::<BTreeSet<_>>()
    };
    let next = owners(next);
    owners(previous).difference(&next).cloned().collect()
}
