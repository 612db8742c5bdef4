use crate::{
    annotations::{auth, opentracing, redirect, rewrite},
    backend::BackendPort,
};
use chrono::{offset::Utc, DateTime};
use mci_ingress_controller_k8s_api::{PathType, Service};
use serde::Serialize;
use std::net::IpAddr;

/// A virtual host.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub hostname: String,
    pub aliases: Vec<String>,
    pub ssl_cert: Option<SslCert>,
    pub ssl_passthrough: bool,
    pub ssl_ciphers: String,
    pub ssl_prefer_server_ciphers: String,
    pub server_snippet: String,
    pub redirect_from_to_www: bool,
    pub locations: Vec<Location>,
}

/// A path-matching rule within a server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,

    /// The path as written in the owning resource, before normalization.
    pub ingress_path: String,
    pub path_type: PathType,

    /// Set while the location is served by a default backend rather than by
    /// an explicit rule.
    pub is_def_backend: bool,
    pub backend: String,
    pub service: Option<Service>,
    pub port: Option<BackendPort>,

    /// Unset only for the synthesized catch-all root location.
    pub ingress: Option<IngressRef>,

    pub auth: auth::Config,
    pub rewrite: rewrite::Config,
    pub redirect: redirect::Config,
    pub backend_protocol: String,
    pub default_backend: Option<Service>,
    pub default_backend_upstream_name: String,
    pub http2_push_preload: bool,
    pub opentracing: opentracing::Config,
    pub configuration_snippet: String,
    pub logs: LocationLogs,

    /// Why requests to this location are refused, if they are.
    pub denied: Option<String>,
}

/// Identifies the routing resource that owns a location.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IngressRef {
    pub namespace: String,
    pub name: String,

    /// The raw value of the resource's canary annotation: unset when the
    /// annotation is missing, `false` when it is not `true`.
    pub canary: Option<bool>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LocationLogs {
    pub access: bool,
    pub rewrite: bool,
}

/// A TLS certificate loaded from a secret.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SslCert {
    /// The `namespace/name` key of the secret holding the certificate.
    pub name: String,
    pub pem: Vec<u8>,
    pub certificate: Option<Certificate>,
    pub expire_time: DateTime<Utc>,
}

/// The parts of a parsed x509 certificate that hostname validation reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

// === impl Server ===

impl Server {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }
}

// === impl Location ===

impl Location {
    pub fn new(path: impl Into<String>, path_type: PathType, backend: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            ingress_path: path.clone(),
            path,
            path_type,
            is_def_backend: false,
            backend: backend.into(),
            service: None,
            port: None,
            ingress: None,
            auth: Default::default(),
            rewrite: Default::default(),
            redirect: Default::default(),
            backend_protocol: String::new(),
            default_backend: None,
            default_backend_upstream_name: String::new(),
            http2_push_preload: false,
            opentracing: Default::default(),
            configuration_snippet: String::new(),
            logs: LocationLogs::default(),
            denied: None,
        }
    }
}

impl Default for LocationLogs {
    fn default() -> Self {
        Self {
            access: true,
            rewrite: false,
        }
    }
}
