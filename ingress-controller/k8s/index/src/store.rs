//! An in-memory cache of the cluster resources that synthesis reads, kept
//! current by Kubernetes watches.

use crate::{annotations::Extractor, certificates, metrics::SizedIndex};
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, bail, Result};
use mci_ingress_controller_core::{
    AnnotationExtractor, Annotations, BackendConfig, BackendPort, Endpoint, EndpointResolver,
    L4Service, Protocol, ResourceStore, RoutingResource, SslCert, StreamServices,
};
use mci_ingress_controller_k8s_api::{
    Endpoints, IngressBackend, IntOrString, MultiClusterIngress, ResourceExt, Secret, Service,
    ServicePort,
};
use parking_lot::RwLock;
use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

pub type SharedStore = Arc<RwLock<Store>>;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub annotations_prefix: String,
    pub auth_directory: PathBuf,
    pub backend: BackendConfig,

    /// The `namespace/name` key of the certificate served when no other
    /// certificate applies.
    pub default_certificate: Option<String>,
}

#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    ingresses: HashMap<String, MultiClusterIngress>,
    services: HashMap<String, Service>,
    endpoints: HashMap<String, Endpoints>,
    secrets: HashMap<String, Secret>,
    certificates: HashMap<String, SslCert>,
    tcp_services: Vec<L4Service>,
    udp_services: Vec<L4Service>,
}

// === impl StoreConfig ===

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            annotations_prefix: crate::annotations::DEFAULT_PREFIX.to_string(),
            auth_directory: PathBuf::from("/etc/ingress-controller/auth"),
            backend: BackendConfig::default(),
            default_certificate: None,
        }
    }
}

// === impl Store ===

impl Store {
    pub fn new(mut config: StoreConfig) -> Self {
        config.backend = config.backend.with_checksum();
        Self {
            config,
            ingresses: HashMap::default(),
            services: HashMap::default(),
            endpoints: HashMap::default(),
            secrets: HashMap::default(),
            certificates: HashMap::default(),
            tcp_services: Vec::new(),
            udp_services: Vec::new(),
        }
    }

    pub fn shared(config: StoreConfig) -> SharedStore {
        Arc::new(RwLock::new(Self::new(config)))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn set_backend_config(&mut self, backend: BackendConfig) {
        self.config.backend = backend.with_checksum();
    }

    /// Registers a parsed certificate under its secret's key. Certificates
    /// are normally loaded from watched TLS secrets.
    pub fn insert_certificate(&mut self, cert: SslCert) {
        self.certificates.insert(cert.name.clone(), cert);
    }

    pub fn set_stream_services(&mut self, protocol: Protocol, services: Vec<L4Service>) {
        match protocol {
            Protocol::Tcp => self.tcp_services = services,
            Protocol::Udp => self.udp_services = services,
        }
    }

    pub fn extractor(&self) -> Extractor<'_, Self> {
        Extractor::new(self)
            .with_prefix(self.config.annotations_prefix.clone())
            .with_auth_directory(&self.config.auth_directory)
    }

    /// Returns the ready endpoints for `port`, as published by the service's
    /// `Endpoints` resource.
    fn service_endpoints(&self, key: &str, svc: &Service, port: &ServicePort) -> Vec<Endpoint> {
        let spec = svc.spec.as_ref();
        if spec.and_then(|s| s.type_.as_deref()) == Some("ExternalName") {
            let Some(name) = spec.and_then(|s| s.external_name.clone()) else {
                return Vec::new();
            };
            let port = match &port.target_port {
                Some(IntOrString::Int(p)) if *p > 0 => *p,
                _ => port.port,
            };
            return u16::try_from(port)
                .map(|port| vec![Endpoint::new(name, port)])
                .unwrap_or_default();
        }

        let Some(endpoints) = self.endpoints.get(key) else {
            tracing::debug!(service = %key, "No endpoints found");
            return Vec::new();
        };

        let protocol = port.protocol.as_deref().unwrap_or("TCP");
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for subset in endpoints.subsets.iter().flatten() {
            for ep_port in subset.ports.iter().flatten() {
                if ep_port.protocol.as_deref().unwrap_or("TCP") != protocol {
                    continue;
                }
                // The port name is optional when the service has a single port.
                let target = match port.name.as_deref() {
                    None | Some("") => ep_port.port,
                    Some(name) if ep_port.name.as_deref() == Some(name) => ep_port.port,
                    Some(_) => continue,
                };
                let Ok(target) = u16::try_from(target) else {
                    continue;
                };
                if target == 0 {
                    continue;
                }
                for addr in subset.addresses.iter().flatten() {
                    if seen.insert((addr.ip.clone(), target)) {
                        out.push(Endpoint::new(addr.ip.clone(), target));
                    }
                }
            }
        }
        out
    }
}

impl ResourceStore for Store {
    /// Lists routing resources by creation time, oldest first, with ties broken by key.
    fn list_routing_resources(&self) -> Vec<RoutingResource> {
        let mut mcis = self.ingresses.values().collect::<Vec<_>>();
        mcis.sort_by(|a, b| {
            let ta = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
            let tb = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
            ta.cmp(&tb)
                .then_with(|| a.namespace().cmp(&b.namespace()))
                .then_with(|| a.name_any().cmp(&b.name_any()))
        });

        let extractor = self.extractor();
        mcis.into_iter()
            .map(|mci| RoutingResource::new(mci.clone(), extractor.extract(mci)))
            .collect()
    }

    fn get_service(&self, key: &str) -> Result<Service> {
        self.services
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("service {key} not found"))
    }

    fn get_secret(&self, key: &str) -> Result<Secret> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("secret {key} not found"))
    }

    fn get_certificate(&self, key: &str) -> Result<SslCert> {
        self.certificates
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("local SSL certificate {key} was not found"))
    }

    fn backend_config(&self) -> BackendConfig {
        self.config.backend.clone()
    }

    fn default_certificate(&self) -> Option<SslCert> {
        let key = self.config.default_certificate.as_ref()?;
        self.certificates.get(key).cloned()
    }
}

impl AnnotationExtractor for Store {
    fn extract(&self, mci: &MultiClusterIngress) -> Annotations {
        self.extractor().extract(mci)
    }
}

impl EndpointResolver for Store {
    fn resolve_endpoints(&self, service_key: &str, port: &BackendPort) -> Result<Vec<Endpoint>> {
        let svc = self.get_service(service_key)?;
        let ports = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .ok_or_else(|| anyhow!("service {service_key} has no ports"))?;

        let mut out = Vec::new();
        for sp in ports.iter().filter(|sp| port_matches(sp, port)) {
            out.extend(self.service_endpoints(service_key, &svc, sp));
        }
        Ok(out)
    }

    fn resolve_cluster_endpoint(
        &self,
        service_key: &str,
        backend: &IngressBackend,
    ) -> Result<Endpoint> {
        let svc = self.get_service(service_key)?;
        let spec = svc
            .spec
            .as_ref()
            .ok_or_else(|| anyhow!("service {service_key} has no spec"))?;
        let cluster_ip = match spec.cluster_ip.as_deref() {
            Some(ip) if !ip.is_empty() && ip != "None" => ip,
            _ => bail!("no ClusterIP found for service {service_key}"),
        };

        let port = backend
            .service
            .as_ref()
            .and_then(|s| s.port.as_ref())
            .and_then(BackendPort::from_service_port)
            .ok_or_else(|| anyhow!("backend of service {service_key} has no port"))?;
        let number = match port {
            BackendPort::Number(n) => n,
            BackendPort::Name(ref name) => spec
                .ports
                .iter()
                .flatten()
                .find(|sp| sp.name.as_deref() == Some(name.as_str()))
                .map(|sp| sp.port)
                .ok_or_else(|| anyhow!("service {service_key} has no port named {name}"))?,
        };
        let number = u16::try_from(number)
            .map_err(|_| anyhow!("service {service_key} has an invalid port {number}"))?;

        Ok(Endpoint::new(cluster_ip, number))
    }
}

impl StreamServices for Store {
    fn stream_services(&self, protocol: Protocol) -> Vec<L4Service> {
        match protocol {
            Protocol::Tcp => self.tcp_services.clone(),
            Protocol::Udp => self.udp_services.clone(),
        }
    }
}

/// Matches a service port by its number, its name, or its target port.
fn port_matches(sp: &ServicePort, port: &BackendPort) -> bool {
    match port {
        BackendPort::Number(n) => {
            sp.port == *n || matches!(sp.target_port, Some(IntOrString::Int(t)) if t == *n)
        }
        BackendPort::Name(name) => {
            sp.name.as_deref() == Some(name.as_str())
                || matches!(&sp.target_port, Some(IntOrString::String(t)) if t == name)
        }
    }
}

fn key<R: ResourceExt>(r: &R) -> String {
    format!("{}/{}", r.namespace().unwrap_or_default(), r.name_unchecked())
}

macro_rules! index_by_key {
    ($ty:ty, $field:ident) => {
        impl kubert::index::IndexNamespacedResource<$ty> for Store {
            fn apply(&mut self, resource: $ty) {
                self.$field.insert(key(&resource), resource);
            }

            fn delete(&mut self, namespace: String, name: String) {
                self.$field.remove(&format!("{namespace}/{name}"));
            }
        }

        impl SizedIndex<$ty> for Store {
            fn size(&self, namespace: &str) -> usize {
                self.$field
                    .values()
                    .filter(|r| r.namespace().as_deref() == Some(namespace))
                    .count()
            }
        }
    };
}

index_by_key!(MultiClusterIngress, ingresses);
index_by_key!(Service, services);
index_by_key!(Endpoints, endpoints);

impl kubert::index::IndexNamespacedResource<Secret> for Store {
    fn apply(&mut self, secret: Secret) {
        let key = key(&secret);
        match certificates::from_secret(&key, &secret) {
            Ok(Some(cert)) => {
                tracing::debug!(secret = %key, "Loaded certificate");
                self.certificates.insert(key.clone(), cert);
            }
            Ok(None) => {
                self.certificates.remove(&key);
            }
            Err(error) => {
                tracing::warn!(secret = %key, %error, "Failed to load certificate");
                self.certificates.remove(&key);
            }
        }
        self.secrets.insert(key, secret);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = format!("{namespace}/{name}");
        self.certificates.remove(&key);
        self.secrets.remove(&key);
    }
}

impl SizedIndex<Secret> for Store {
    fn size(&self, namespace: &str) -> usize {
        self.secrets
            .values()
            .filter(|r| r.namespace().as_deref() == Some(namespace))
            .count()
    }
}
