//! Builds virtual hosts and their locations.
//!
//! Several resources may contribute to one host. Server-level fields merge as
//! follows:
//!
//! | field                      | policy                                   |
//! |----------------------------|------------------------------------------|
//! | aliases                    | first non-empty list wins                |
//! | server snippet             | first wins                               |
//! | ssl ciphers                | first wins                               |
//! | ssl prefer server ciphers  | first wins                               |
//! | TLS certificate            | first resolved (or substituted) wins     |
//! | location `(path, type)`    | only placeholder locations are replaced  |
//! | backend session affinity   | first wins                               |

use crate::{configuration::Context, diagnostics::Diagnostic, tls};
use ahash::AHashSet as HashSet;
use mci_ingress_controller_core::{
    upstream_name, Annotations, Backend, BackendPort, Location, ResourceStore, RoutingResource,
    Server, DEFAULT_SERVER_NAME, ROOT_LOCATION,
};
use mci_ingress_controller_k8s_api::{HTTPIngressPath, IngressRule, PathType};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// How a server field reacts when a second resource sets it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Merge {
    /// The field was unset and takes the new value.
    Set,
    /// The new value is empty or equal to the current one.
    Unchanged,
    /// The field already holds a different value, which is kept.
    Conflict,
}

/// Builds the catch-all server and one server per rule hostname, then merges
/// server-level policy from every non-canary resource.
pub(crate) fn build<S>(
    cx: &mut Context<'_, S>,
    resources: &[RoutingResource],
    upstreams: &BTreeMap<String, Backend>,
    default_upstream: &Backend,
) -> BTreeMap<String, Server>
where
    S: ResourceStore + ?Sized,
{
    let mut servers = BTreeMap::new();
    servers.insert(
        DEFAULT_SERVER_NAME.to_string(),
        catch_all(cx, default_upstream),
    );

    for resource in resources.iter().filter(|r| !r.is_canary()) {
        let anns = &resource.annotations;
        let mut fallback = default_upstream.name.clone();

        let default_backend = resource
            .mci
            .spec
            .default_backend
            .as_ref()
            .and_then(|b| b.service.as_ref());
        if let Some(svc) = default_backend {
            let name = upstream_name(&resource.namespace(), Some(svc));
            if let Some(upstream) = upstreams.get(&name) {
                fallback = upstream.name.clone();

                if resource.mci.spec.rules.as_deref().unwrap_or_default().is_empty() {
                    if let Some(root) = servers
                        .get_mut(DEFAULT_SERVER_NAME)
                        .and_then(|s| s.locations.first_mut())
                    {
                        if root.is_def_backend {
                            debug!(ingress = %resource.key(), backend = %upstream.name, "Replacing the catch-all root location");
                            let redirect = root.redirect.clone();
                            let rewrite = root.rewrite.clone();
                            root.backend = upstream.name.clone();
                            root.service = upstream.service.clone();
                            root.ingress = Some(resource.ingress_ref());
                            root.is_def_backend = false;
                            apply_annotations(root, anns);
                            root.redirect = redirect;
                            root.rewrite = rewrite;
                        } else {
                            debug!(ingress = %resource.key(), "The catch-all root location is already configured");
                        }
                    }
                }
            }
        }

        for rule in resource.mci.spec.rules.iter().flatten() {
            let host = rule_host(rule);
            if servers.contains_key(host) {
                continue;
            }

            let mut root = Location::new(ROOT_LOCATION, PathType::Prefix, fallback.clone());
            root.is_def_backend = true;
            root.ingress = Some(resource.ingress_ref());
            apply_annotations(&mut root, anns);

            let mut server = Server::new(host);
            server.ssl_passthrough = anns.ssl_passthrough;
            server.ssl_ciphers = anns.ssl_cipher.ciphers.clone();
            server.ssl_prefer_server_ciphers = anns.ssl_cipher.prefer_server_ciphers.clone();
            server.locations.push(root);
            servers.insert(host.to_string(), server);
        }
    }

    for resource in resources.iter().filter(|r| !r.is_canary()) {
        let anns = &resource.annotations;
        for rule in resource.mci.spec.rules.iter().flatten() {
            let host = rule_host(rule);
            let Some(server) = servers.get_mut(host) else {
                continue;
            };

            if merge_aliases(&mut server.aliases, &anns.aliases) == Merge::Conflict {
                cx.diagnostics.push(Diagnostic::AliasConflict {
                    host: host.to_string(),
                    ingress: resource.key(),
                });
            }
            if first_wins(&mut server.server_snippet, &anns.server_snippet) == Merge::Conflict {
                cx.diagnostics.push(Diagnostic::ServerSnippetConflict {
                    host: host.to_string(),
                    ingress: resource.key(),
                });
            }
            first_wins(&mut server.ssl_ciphers, &anns.ssl_cipher.ciphers);
            first_wins(
                &mut server.ssl_prefer_server_ciphers,
                &anns.ssl_cipher.prefer_server_ciphers,
            );

            if server.ssl_cert.is_some() {
                continue;
            }
            if resource.mci.spec.tls.as_deref().unwrap_or_default().is_empty() {
                debug!(%host, ingress = %resource.key(), "Resource has no TLS section");
                continue;
            }
            server.ssl_cert = tls::resolve(
                host,
                &resource.mci,
                cx.store,
                cx.default_certificate.as_ref(),
                cx.now,
            )
            .record(&mut cx.diagnostics);
        }
    }

    dedup_aliases(&mut servers);
    servers
}

/// Wires every rule path of the non-canary resources to a location, and
/// records cookie affinity on the backends those locations use.
pub(crate) fn add_locations<S: ?Sized>(
    cx: &mut Context<'_, S>,
    resources: &[RoutingResource],
    upstreams: &mut BTreeMap<String, Backend>,
    servers: &mut BTreeMap<String, Server>,
) {
    for resource in resources.iter().filter(|r| !r.is_canary()) {
        let anns = &resource.annotations;
        let namespace = resource.namespace();

        for rule in resource.mci.spec.rules.iter().flatten() {
            let host = rule_host(rule);
            let server_name = if servers.contains_key(host) {
                host
            } else {
                DEFAULT_SERVER_NAME
            };
            let Some(server) = servers.get_mut(server_name) else {
                continue;
            };
            let Some(http) = rule.http.as_ref() else {
                continue;
            };

            for path in &http.paths {
                let Some(svc) = path.backend.service.as_ref() else {
                    continue;
                };
                let Some(upstream) = upstreams.get_mut(&upstream_name(&namespace, Some(svc)))
                else {
                    continue;
                };
                if upstream.no_server {
                    continue;
                }

                let nginx_path = location_path(path);
                let path_type = path_type(path);
                let port = svc.port.as_ref().and_then(BackendPort::from_service_port);

                match server
                    .locations
                    .iter_mut()
                    .find(|l| l.path == nginx_path && l.path_type == path_type)
                {
                    Some(loc) if !loc.is_def_backend => {
                        cx.diagnostics.push(Diagnostic::DuplicateLocation {
                            host: host.to_string(),
                            path: nginx_path.clone(),
                            backend: loc.backend.clone(),
                            ingress: resource.key(),
                        });
                    }
                    Some(loc) => {
                        debug!(%host, path = %nginx_path, backend = %upstream.name, "Replacing placeholder location");
                        loc.backend = upstream.name.clone();
                        loc.service = upstream.service.clone();
                        loc.port = port;
                        loc.ingress = Some(resource.ingress_ref());
                        loc.is_def_backend = false;
                        apply_annotations(loc, anns);
                        if loc.redirect.from_to_www {
                            server.redirect_from_to_www = true;
                        }
                    }
                    None => {
                        debug!(%host, path = %nginx_path, backend = %upstream.name, "Adding location");
                        let mut loc =
                            Location::new(nginx_path.clone(), path_type, upstream.name.clone());
                        loc.service = upstream.service.clone();
                        loc.port = port;
                        loc.ingress = Some(resource.ingress_ref());
                        apply_annotations(&mut loc, anns);
                        if loc.redirect.from_to_www {
                            server.redirect_from_to_www = true;
                        }
                        server.locations.push(loc);
                    }
                }

                let affinity = &mut upstream.session_affinity;
                first_wins(
                    &mut affinity.affinity_type,
                    &anns.session_affinity.affinity_type,
                );
                first_wins(&mut affinity.affinity_mode, &anns.session_affinity.mode);

                if anns.session_affinity.affinity_type != "cookie" {
                    continue;
                }
                let cookie = &anns.session_affinity.cookie;
                if anns.rewrite.use_regex && cookie.path.is_empty() {
                    warn!(
                        ingress = %resource.key(),
                        "Session affinity cookies should set an explicit path when regex rewrites are used"
                    );
                }
                let affinity_cookie = &mut affinity.cookie;
                if affinity_cookie.name.is_empty() {
                    affinity_cookie.name = cookie.name.clone();
                    affinity_cookie.expires = cookie.expires.clone();
                    affinity_cookie.max_age = cookie.max_age.clone();
                    affinity_cookie.secure = cookie.secure;
                    affinity_cookie.path = cookie.path.clone();
                    affinity_cookie.same_site = cookie.same_site.clone();
                    affinity_cookie.conditional_same_site_none = cookie.conditional_same_site_none;
                    affinity_cookie.change_on_failure = cookie.change_on_failure;
                }
                for h in std::iter::once(host).chain(server.aliases.iter().map(String::as_str)) {
                    affinity_cookie
                        .locations
                        .entry(h.to_string())
                        .or_default()
                        .push(nginx_path.clone());
                }
            }
        }
    }
}

/// Copies a resource's location-level policy onto a location.
pub(crate) fn apply_annotations(loc: &mut Location, anns: &Annotations) {
    loc.auth = anns.auth.clone();
    loc.rewrite = anns.rewrite.clone();
    loc.redirect = anns.redirect.clone();
    loc.backend_protocol = anns.backend_protocol.clone();
    loc.default_backend = anns.default_backend.clone();
    loc.http2_push_preload = anns.http2_push_preload;
    loc.opentracing = anns.opentracing;
    loc.configuration_snippet = anns.configuration_snippet.clone();
    loc.logs = anns.logs;
    loc.denied = anns.denied.clone();
}

/// A rule's hostname, or the catch-all name when it has none.
pub(crate) fn rule_host(rule: &IngressRule) -> &str {
    match rule.host.as_deref() {
        Some(host) if !host.is_empty() => host,
        _ => DEFAULT_SERVER_NAME,
    }
}

/// A path's location, `/` when unset.
pub(crate) fn location_path(path: &HTTPIngressPath) -> String {
    match path.path.as_deref() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => ROOT_LOCATION.to_string(),
    }
}

/// A path's match type, with unset and implementation-specific types treated
/// as prefixes.
pub(crate) fn path_type(path: &HTTPIngressPath) -> PathType {
    match path.path_type.parse() {
        Ok(PathType::Exact) => PathType::Exact,
        _ => PathType::Prefix,
    }
}

pub(crate) fn first_wins(slot: &mut String, value: &str) -> Merge {
    if value.is_empty() || slot == value {
        Merge::Unchanged
    } else if slot.is_empty() {
        *slot = value.to_string();
        Merge::Set
    } else {
        Merge::Conflict
    }
}

pub(crate) fn merge_aliases(slot: &mut Vec<String>, value: &[String]) -> Merge {
    if value.is_empty() || slot.as_slice() == value {
        Merge::Unchanged
    } else if slot.is_empty() {
        *slot = value.to_vec();
        Merge::Set
    } else {
        Merge::Conflict
    }
}

fn catch_all<S: ?Sized>(cx: &Context<'_, S>, default_upstream: &Backend) -> Server {
    let mut root = Location::new(
        ROOT_LOCATION,
        PathType::Prefix,
        default_upstream.name.clone(),
    );
    root.is_def_backend = true;
    root.service = default_upstream.service.clone();
    root.logs.access = cx.backend_config.enable_access_log_for_default_backend;

    let mut server = Server::new(DEFAULT_SERVER_NAME);
    server.ssl_cert = cx.default_certificate.clone();
    server.locations.push(root);
    server
}

/// Drops aliases that name the host itself, name another server, or repeat.
fn dedup_aliases(servers: &mut BTreeMap<String, Server>) {
    let hostnames = servers.keys().cloned().collect::<HashSet<_>>();
    for (host, server) in servers.iter_mut() {
        let mut seen = HashSet::new();
        server.aliases.retain(|alias| {
            if alias == host || hostnames.contains(alias) {
                warn!(%host, %alias, "Dropping alias that names a server");
                return false;
            }
            seen.insert(alias.clone())
        });
        server.aliases.sort();
    }
}
