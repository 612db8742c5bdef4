//! Attaches canary backends to the primary backends they shadow.

use crate::{
    diagnostics::{Diagnostic, Diagnostics},
    servers::{location_path, path_type, rule_host},
};
use mci_ingress_controller_core::{
    upstream_name, Backend, RoutingResource, Server, DEFAULT_SERVER_NAME,
};
use mci_ingress_controller_k8s_api::PathType;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

const LEGACY_CANARY_BEHAVIOR: &str = "legacy";

/// Where a canary reference applies: the catch-all server's locations for a
/// default backend, or the matching location of a rule host.
struct Target<'r> {
    host: &'r str,
    path: Option<(String, PathType)>,
    alternative: String,
}

/// Merges every canary resource's backends into the primary backends of the
/// locations they target. Alternatives that attach nowhere are removed.
pub(crate) fn merge(
    resources: &[RoutingResource],
    upstreams: &mut BTreeMap<String, Backend>,
    servers: &BTreeMap<String, Server>,
    diagnostics: &mut Diagnostics,
) {
    let mut candidates = BTreeSet::new();
    let mut kept = BTreeSet::new();

    for resource in resources.iter().filter(|r| r.is_canary()) {
        let legacy =
            resource.annotations.session_affinity.canary_behavior == LEGACY_CANARY_BEHAVIOR;

        for target in targets(resource) {
            if !upstreams.contains_key(&target.alternative) {
                warn!(backend = %target.alternative, "Alternative backend does not exist");
                continue;
            }
            candidates.insert(target.alternative.clone());

            let Some(server) = servers.get(target.host) else {
                error!(host = %target.host, ingress = %resource.key(), "Could not find a server for the canary");
                continue;
            };

            let mut primaries = Vec::new();
            for loc in &server.locations {
                if loc.backend == target.alternative {
                    diagnostics.push(Diagnostic::CanaryIsPrimary {
                        backend: target.alternative.clone(),
                        host: target.host.to_string(),
                        path: loc.path.clone(),
                    });
                    kept.insert(target.alternative.clone());
                    break;
                }
                if let Some((path, path_type)) = target.path.as_ref() {
                    if loc.path != *path || loc.path_type != *path_type {
                        continue;
                    }
                }
                primaries.push(loc.backend.clone());
            }

            for primary in primaries {
                if merge_backend(upstreams, &primary, &target.alternative, legacy) {
                    kept.insert(target.alternative.clone());
                }
            }
        }
    }

    for name in candidates.difference(&kept) {
        // A backend also serving a location is never removed.
        if upstreams.get(name).is_some_and(|b| b.no_server) {
            upstreams.remove(name);
            diagnostics.push(Diagnostic::UnmergedCanary {
                backend: name.clone(),
            });
        }
    }
}

/// Removes every canary backend. Used when no primary resource exists for
/// canaries to shadow.
pub(crate) fn prune(resources: &[RoutingResource], upstreams: &mut BTreeMap<String, Backend>) {
    for resource in resources.iter().filter(|r| r.is_canary()) {
        for target in targets(resource) {
            if upstreams
                .get(&target.alternative)
                .is_some_and(|b| b.no_server)
            {
                debug!(backend = %target.alternative, "Removing canary backend without primaries");
                upstreams.remove(&target.alternative);
            }
        }
    }
}

/// Lists the alternative backends a canary resource declares, with the
/// locations they apply to.
fn targets(resource: &RoutingResource) -> Vec<Target<'_>> {
    let namespace = resource.namespace();
    let mut targets = Vec::new();

    if let Some(svc) = resource
        .mci
        .spec
        .default_backend
        .as_ref()
        .and_then(|b| b.service.as_ref())
    {
        targets.push(Target {
            host: DEFAULT_SERVER_NAME,
            path: None,
            alternative: upstream_name(&namespace, Some(svc)),
        });
    }

    for rule in resource.mci.spec.rules.iter().flatten() {
        let Some(http) = rule.http.as_ref() else {
            continue;
        };
        for path in &http.paths {
            let Some(svc) = path.backend.service.as_ref() else {
                continue;
            };
            targets.push(Target {
                host: rule_host(rule),
                path: Some((location_path(path), path_type(path))),
                alternative: upstream_name(&namespace, Some(svc)),
            });
        }
    }

    targets
}

/// Lists `alternative` on `primary`. Returns whether the alternative is
/// attached, including when it already was.
fn merge_backend(
    upstreams: &mut BTreeMap<String, Backend>,
    primary: &str,
    alternative: &str,
    legacy: bool,
) -> bool {
    let Some(pri) = upstreams.get_mut(primary) else {
        return false;
    };
    if pri.name == alternative || pri.no_server {
        return false;
    }
    if pri.alternative_backends.iter().any(|a| a == alternative) {
        return true;
    }

    debug!(%primary, %alternative, "Merging alternative backend");
    pri.alternative_backends.push(alternative.to_string());
    let affinity = pri.session_affinity.clone();
    if !legacy {
        if let Some(alt) = upstreams.get_mut(alternative) {
            alt.session_affinity = affinity;
        }
    }
    true
}
