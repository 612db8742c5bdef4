use k8s_openapi::api::networking::v1::{IngressBackend, IngressRule, IngressTLS};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Describes a multi-cluster ingress: host/path rules that route to services
/// exported from member clusters. The spec shares its shape with
/// `networking.k8s.io/v1` `Ingress`.
///
/// Rule backends name services in the source clusters; they resolve locally
/// through the derived service (see [`derived_service_name`]).
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "networking.karmada.io",
    version = "v1alpha1",
    kind = "MultiClusterIngress",
    status = "MultiClusterIngressStatus",
    namespaced,
    derive = "PartialEq",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterIngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<IngressBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<IngressRule>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Vec<IngressTLS>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiClusterIngressStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<serde_json::Value>,
}

/// Prefix applied to service names that have been exported to this cluster.
const DERIVED_SERVICE_PREFIX: &str = "derived-";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PathType {
    Exact,
    Prefix,
    ImplementationSpecific,
}

/// Returns the name of the local service that fronts an exported service.
pub fn derived_service_name(name: &str) -> String {
    format!("{DERIVED_SERVICE_PREFIX}{name}")
}

/// Rewrites every missing or `ImplementationSpecific` path type to `Prefix`.
pub fn set_default_path_type(mci: &mut MultiClusterIngress) {
    for rule in mci.spec.rules.iter_mut().flatten() {
        for path in rule.http.iter_mut().flat_map(|http| http.paths.iter_mut()) {
            match path.path_type.parse() {
                Ok(PathType::Exact) | Ok(PathType::Prefix) => {}
                Ok(PathType::ImplementationSpecific) | Err(_) => {
                    path.path_type = PathType::Prefix.to_string();
                }
            }
        }
    }
}

// === impl PathType ===

impl FromStr for PathType {
    type Err = InvalidPathType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Exact" => Ok(Self::Exact),
            "Prefix" => Ok(Self::Prefix),
            "ImplementationSpecific" => Ok(Self::ImplementationSpecific),
            s => Err(InvalidPathType(s.to_string())),
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => "Exact".fmt(f),
            Self::Prefix => "Prefix".fmt(f),
            Self::ImplementationSpecific => "ImplementationSpecific".fmt(f),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidPathType(String);

impl fmt::Display for InvalidPathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid path type: {:?}", self.0)
    }
}

impl std::error::Error for InvalidPathType {}
