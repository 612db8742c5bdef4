#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Data model shared by the configuration synthesis engine and the admission
//! runtime, along with the collaborator interfaces the engine reads through.

pub mod annotations;
pub mod backend;
pub mod configuration;
pub mod server;

pub use self::{
    annotations::Annotations,
    backend::{upstream_name, Backend, BackendPort, Endpoint, TrafficShapingPolicy},
    configuration::{
        BackendConfig, Configuration, L4Backend, L4Service, Protocol, SslPassthroughBackend,
    },
    server::{Certificate, IngressRef, Location, LocationLogs, Server, SslCert},
};
use anyhow::Result;
use mci_ingress_controller_k8s_api::{
    IngressBackend, MultiClusterIngress, ResourceExt, Secret, Service,
};

/// The hostname of the catch-all server.
pub const DEFAULT_SERVER_NAME: &str = "_";

/// The reserved name of the cluster default backend.
pub const DEFAULT_UPSTREAM_NAME: &str = "upstream-default-backend";

pub const ROOT_LOCATION: &str = "/";

/// Where the default backend is served when no default service is configured.
pub const DEFAULT_ENDPOINT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_ENDPOINT_PORT: u16 = 8181;

/// A routing resource paired with the policy parsed from its annotations.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingResource {
    pub mci: MultiClusterIngress,
    pub annotations: Annotations,
}

/// Read access to the cluster state that configuration synthesis depends on.
pub trait ResourceStore {
    /// Lists all routing resources, with their annotations parsed.
    fn list_routing_resources(&self) -> Vec<RoutingResource>;

    /// Looks up a service by its `namespace/name` key.
    fn get_service(&self, key: &str) -> Result<Service>;

    fn get_secret(&self, key: &str) -> Result<Secret>;

    /// Looks up a parsed TLS certificate by its secret's `namespace/name` key.
    fn get_certificate(&self, key: &str) -> Result<SslCert>;

    fn backend_config(&self) -> BackendConfig;

    fn default_certificate(&self) -> Option<SslCert>;
}

/// Resolves the network endpoints that back a service.
pub trait EndpointResolver {
    /// Resolves the ready endpoints of the service port identified by `port`, which
    /// may name the port, its number, or its target port.
    fn resolve_endpoints(&self, service_key: &str, port: &BackendPort) -> Result<Vec<Endpoint>>;

    /// Resolves a single endpoint at the service's cluster address.
    fn resolve_cluster_endpoint(
        &self,
        service_key: &str,
        backend: &IngressBackend,
    ) -> Result<Endpoint>;
}

/// Lists the TCP or UDP services exposed outside of HTTP routing.
pub trait StreamServices {
    fn stream_services(&self, protocol: Protocol) -> Vec<L4Service>;
}

/// Parses a resource's annotations into a policy bundle.
pub trait AnnotationExtractor {
    fn extract(&self, mci: &MultiClusterIngress) -> Annotations;
}

/// Renders a configuration into the data plane's textual format.
pub trait TemplateRenderer {
    fn render(&self, backend: &BackendConfig, config: &Configuration) -> Result<Vec<u8>>;
}

/// Dry-runs a rendered configuration.
#[async_trait::async_trait]
pub trait SyntaxChecker {
    async fn check(&self, content: &[u8]) -> Result<()>;
}

/// Records admission outcomes.
pub trait MetricsSink {
    fn inc_check_count(&self, namespace: &str, name: &str);

    fn inc_check_error_count(&self, namespace: &str, name: &str);

    fn set_admission_metrics(&self, timing: AdmissionTiming);
}

/// Measurements taken while admitting a single resource. Durations are in
/// seconds.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AdmissionTiming {
    pub tested_ingresses: f64,

    /// Synthesis, rendering and the syntax check.
    pub tested_duration: f64,
    pub render_ingresses: f64,

    /// Policy checks and listing the candidate set.
    pub render_duration: f64,
    pub config_size: f64,
    pub roundtrip_duration: f64,
}

// === impl RoutingResource ===

impl RoutingResource {
    pub fn new(mci: MultiClusterIngress, annotations: Annotations) -> Self {
        Self { mci, annotations }
    }

    pub fn namespace(&self) -> String {
        self.mci.namespace().unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.mci.name_any()
    }

    /// The resource's `namespace/name` key.
    pub fn key(&self) -> String {
        resource_key(&self.mci)
    }

    pub fn is_canary(&self) -> bool {
        self.annotations.canary.enabled
    }

    pub fn ingress_ref(&self) -> IngressRef {
        IngressRef {
            namespace: self.namespace(),
            name: self.name(),
            canary: self.annotations.canary.annotation,
        }
    }
}

/// Formats a resource's `namespace/name` key.
pub fn resource_key(mci: &MultiClusterIngress) -> String {
    match mci.namespace() {
        Some(ns) => format!("{}/{}", ns, mci.name_any()),
        None => mci.name_any(),
    }
}
