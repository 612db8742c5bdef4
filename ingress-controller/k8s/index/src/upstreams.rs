use crate::{
    configuration::Context,
    diagnostics::{Diagnostic, Diagnostics},
};
use mci_ingress_controller_core::{
    annotations::upstream_hash_by, backend::UpstreamHashByConfig, upstream_name, Annotations,
    Backend, BackendPort, Endpoint, EndpointResolver, ResourceStore, RoutingResource,
    TrafficShapingPolicy, DEFAULT_ENDPOINT_ADDRESS, DEFAULT_ENDPOINT_PORT, DEFAULT_UPSTREAM_NAME,
};
use mci_ingress_controller_k8s_api::{derived_service_name, IngressBackend, IngressServiceBackend};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Builds the default backend from the configured default service's first
/// port, falling back to the local default endpoint.
pub(crate) fn default_upstream<S>(
    store: &S,
    default_service: Option<&str>,
    diagnostics: &mut Diagnostics,
) -> Backend
where
    S: ResourceStore + EndpointResolver + ?Sized,
{
    let mut upstream = Backend::new(DEFAULT_UPSTREAM_NAME);
    let fallback = || vec![Endpoint::new(DEFAULT_ENDPOINT_ADDRESS, DEFAULT_ENDPOINT_PORT)];

    let Some(key) = default_service.filter(|k| !k.is_empty()) else {
        upstream.endpoints = fallback();
        return upstream;
    };

    let svc = match store.get_service(key) {
        Ok(svc) => svc,
        Err(error) => {
            diagnostics.push(Diagnostic::Service {
                service: key.to_string(),
                reason: error.to_string(),
            });
            upstream.endpoints = fallback();
            return upstream;
        }
    };

    let first_port = svc
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|sp| BackendPort::Number(sp.port));
    let endpoints = first_port
        .and_then(|port| store.resolve_endpoints(key, &port).ok())
        .unwrap_or_default();
    if endpoints.is_empty() {
        warn!(service = %key, "Default backend service has no active endpoints");
        upstream.endpoints = fallback();
    } else {
        upstream.endpoints = endpoints;
    }
    upstream.service = Some(svc);
    upstream
}

/// Creates one backend per distinct service reference. The first resource to
/// reference a backend configures it; later references reuse it unchanged.
pub(crate) fn build<S>(
    cx: &mut Context<'_, S>,
    resources: &[RoutingResource],
    default_upstream: &Backend,
) -> BTreeMap<String, Backend>
where
    S: ResourceStore + EndpointResolver + ?Sized,
{
    let mut upstreams = BTreeMap::new();
    upstreams.insert(default_upstream.name.clone(), default_upstream.clone());

    for resource in resources {
        let namespace = resource.namespace();

        if let Some(backend) = resource.mci.spec.default_backend.as_ref() {
            if let Some(svc) = backend.service.as_ref() {
                let name = upstream_name(&namespace, Some(svc));
                if !upstreams.contains_key(&name) {
                    let upstream = cx.new_upstream(name, &namespace, svc, backend, resource);
                    upstreams.insert(upstream.name.clone(), upstream);
                }
            }
        }

        for rule in resource.mci.spec.rules.iter().flatten() {
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            for path in &http.paths {
                let Some(svc) = path.backend.service.as_ref() else {
                    debug!(
                        ingress = %resource.key(),
                        path = path.path.as_deref().unwrap_or_default(),
                        "Path has no service backend"
                    );
                    continue;
                };

                let name = upstream_name(&namespace, Some(svc));
                if upstreams.contains_key(&name) {
                    continue;
                }
                let upstream = cx.new_upstream(name, &namespace, svc, &path.backend, resource);
                upstreams.insert(upstream.name.clone(), upstream);
            }
        }
    }

    upstreams
}

// === impl Context ===

impl<S> Context<'_, S>
where
    S: ResourceStore + EndpointResolver + ?Sized,
{
    fn new_upstream(
        &mut self,
        name: String,
        namespace: &str,
        svc: &IngressServiceBackend,
        backend: &IngressBackend,
        resource: &RoutingResource,
    ) -> Backend {
        debug!(%name, ingress = %resource.key(), "Creating upstream");
        let anns = &resource.annotations;
        let port = svc.port.as_ref().and_then(BackendPort::from_service_port);

        let mut upstream = Backend::new(name);
        upstream.port = port.clone();
        upstream.upstream_hash_by = hash_by(&anns.upstream_hash_by);
        upstream.load_balancing = if anns.load_balancing.is_empty() {
            self.backend_config.load_balancing.clone()
        } else {
            anns.load_balancing.clone()
        };

        let service_key = format!("{}/{}", namespace, derived_service_name(&svc.name));

        // Route to the service's cluster address rather than to its pods.
        if anns.service_upstream {
            match self.store.resolve_cluster_endpoint(&service_key, backend) {
                Ok(endpoint) => upstream.endpoints = vec![endpoint],
                Err(error) => self.diagnostics.push(Diagnostic::ClusterEndpoint {
                    service: service_key.clone(),
                    reason: error.to_string(),
                }),
            }
        }

        if anns.canary.enabled {
            upstream.no_server = true;
            upstream.traffic_shaping_policy = traffic_shaping(anns);
        }

        if upstream.endpoints.is_empty() {
            let resolved = match port.as_ref() {
                Some(port) => self
                    .store
                    .resolve_endpoints(&service_key, port)
                    .map_err(|e| e.to_string()),
                None => Err("the service reference has no port".to_string()),
            };
            match resolved {
                Ok(endpoints) => upstream.endpoints = endpoints,
                Err(reason) => self.diagnostics.push(Diagnostic::Endpoints {
                    backend: upstream.name.clone(),
                    service: service_key.clone(),
                    reason,
                }),
            }
        }

        match self.store.get_service(&service_key) {
            Ok(svc) => upstream.service = Some(svc),
            Err(error) => self.diagnostics.push(Diagnostic::Service {
                service: service_key,
                reason: error.to_string(),
            }),
        }

        upstream
    }
}

fn hash_by(config: &upstream_hash_by::Config) -> UpstreamHashByConfig {
    UpstreamHashByConfig {
        upstream_hash_by: config.hash_by.clone(),
        upstream_hash_by_subset: config.subset,
        upstream_hash_by_subset_size: config.subset_size,
    }
}

fn traffic_shaping(anns: &Annotations) -> TrafficShapingPolicy {
    TrafficShapingPolicy {
        weight: anns.canary.weight,
        weight_total: anns.canary.weight_total,
        header: anns.canary.header.clone(),
        header_value: anns.canary.header_value.clone(),
        header_pattern: anns.canary.header_pattern.clone(),
        cookie: anns.canary.cookie.clone(),
    }
}
