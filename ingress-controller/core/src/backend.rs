use mci_ingress_controller_k8s_api::{IngressServiceBackend, Service, ServiceBackendPort};
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// A named pool of endpoints that locations proxy to.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub name: String,
    pub service: Option<Service>,
    pub port: Option<BackendPort>,
    pub ssl_passthrough: bool,
    pub endpoints: Vec<Endpoint>,
    pub session_affinity: SessionAffinityConfig,
    pub upstream_hash_by: UpstreamHashByConfig,
    pub load_balancing: String,

    /// Set on canary backends, which are only reachable through a primary
    /// backend's alternatives.
    pub no_server: bool,
    pub traffic_shaping_policy: TrafficShapingPolicy,
    pub alternative_backends: Vec<String>,
}

/// References a service port by number or by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum BackendPort {
    Number(i32),
    Name(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAffinityConfig {
    pub affinity_type: String,
    pub affinity_mode: String,
    pub cookie: CookieSessionAffinity,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSessionAffinity {
    pub name: String,
    pub expires: String,
    pub max_age: String,
    pub secure: bool,
    pub path: String,
    pub same_site: String,
    pub conditional_same_site_none: bool,
    pub change_on_failure: bool,

    /// Cookie-affine paths, keyed by hostname.
    pub locations: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHashByConfig {
    pub upstream_hash_by: String,
    pub upstream_hash_by_subset: bool,
    pub upstream_hash_by_subset_size: i32,
}

/// Describes how traffic is split onto a canary backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficShapingPolicy {
    pub weight: i32,
    pub weight_total: i32,
    pub header: String,
    pub header_value: String,
    pub header_pattern: String,
    pub cookie: String,
}

/// Returns the backend name for a service reference in `namespace`.
///
/// The port number is used when it is set, then the port name. References
/// without a usable service produce `{namespace}-INVALID`.
pub fn upstream_name(namespace: &str, service: Option<&IngressServiceBackend>) -> String {
    match service.map(|svc| (svc, svc.port.as_ref().and_then(BackendPort::from_service_port))) {
        Some((svc, Some(port))) => format!("{}-{}-{}", namespace, svc.name, port),
        _ => format!("{namespace}-INVALID"),
    }
}

// === impl Backend ===

impl Backend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

// === impl BackendPort ===

impl BackendPort {
    pub fn from_service_port(port: &ServiceBackendPort) -> Option<Self> {
        match port {
            ServiceBackendPort {
                number: Some(n), ..
            } if *n > 0 => Some(Self::Number(*n)),
            ServiceBackendPort { name: Some(n), .. } if !n.is_empty() => {
                Some(Self::Name(n.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for BackendPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::Name(n) => n.fmt(f),
        }
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            weight: None,
        }
    }
}
