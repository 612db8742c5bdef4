use crate::{
    backend::{Backend, BackendPort, Endpoint},
    server::{Server, SslCert},
};
use mci_ingress_controller_k8s_api::Service;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// The complete, render-ready state of the data plane.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Sorted by name.
    pub backends: Vec<Backend>,

    /// Sorted by hostname.
    pub servers: Vec<Server>,
    pub tcp_endpoints: Vec<L4Service>,
    pub udp_endpoints: Vec<L4Service>,
    pub passthrough_backends: Vec<SslPassthroughBackend>,
    pub backend_config_checksum: String,
    pub default_ssl_certificate: Option<SslCert>,
    pub stream_snippets: Vec<String>,
}

/// Cluster-wide settings that shape synthesis and admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub allow_snippet_annotations: bool,

    /// Comma-separated words that may not appear in annotation values.
    pub annotation_value_word_blocklist: String,
    pub global_rate_limit_memcached_host: String,
    pub load_balancing: String,
    pub enable_access_log_for_default_backend: bool,

    /// A SHA-256 digest of the other fields. See [`BackendConfig::with_checksum`].
    pub checksum: String,
}

/// Routes a server's TLS connections to a backend without terminating them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SslPassthroughBackend {
    pub service: Option<Service>,
    pub backend: String,
    pub hostname: String,
    pub port: Option<BackendPort>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

/// A service exposed on a raw TCP or UDP port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L4Service {
    pub port: u16,
    pub backend: L4Backend,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L4Backend {
    pub port: BackendPort,
    pub name: String,
    pub namespace: String,
    pub protocol: Protocol,
}

// === impl BackendConfig ===

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            allow_snippet_annotations: true,
            annotation_value_word_blocklist: String::new(),
            global_rate_limit_memcached_host: String::new(),
            load_balancing: "round_robin".to_string(),
            enable_access_log_for_default_backend: false,
            checksum: String::new(),
        }
    }
}

impl BackendConfig {
    /// Sets `checksum` from the policy's current contents.
    pub fn with_checksum(mut self) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([u8::from(self.allow_snippet_annotations)]);
        for field in [
            &self.annotation_value_word_blocklist,
            &self.global_rate_limit_memcached_host,
            &self.load_balancing,
        ] {
            // Length-prefixed so that adjacent fields cannot run together.
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update([u8::from(self.enable_access_log_for_default_backend)]);
        self.checksum = format!("{:x}", hasher.finalize());
        self
    }

    /// Splits the annotation word blocklist, skipping empty entries.
    pub fn blocked_words(&self) -> Vec<&str> {
        self.annotation_value_word_blocklist
            .trim()
            .split(',')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_words() {
        let cfg = BackendConfig {
            annotation_value_word_blocklist: " load_module, ,lua_package ,".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.blocked_words(), vec!["load_module", "lua_package"]);

        assert!(BackendConfig::default().blocked_words().is_empty());
    }

    #[test]
    fn checksum_tracks_policy() {
        let default = BackendConfig::default().with_checksum();
        assert_eq!(default.checksum.len(), 64);
        assert_eq!(default.checksum, BackendConfig::default().with_checksum().checksum);
        // Recomputing ignores the previous checksum.
        assert_eq!(default.checksum, default.clone().with_checksum().checksum);

        let ewma = BackendConfig {
            load_balancing: "ewma".to_string(),
            ..Default::default()
        }
        .with_checksum();
        assert_ne!(default.checksum, ewma.checksum);

        let no_snippets = BackendConfig {
            allow_snippet_annotations: false,
            ..Default::default()
        }
        .with_checksum();
        assert_ne!(default.checksum, no_snippets.checksum);

        let shifted = BackendConfig {
            annotation_value_word_blocklist: "a".to_string(),
            global_rate_limit_memcached_host: String::new(),
            ..Default::default()
        }
        .with_checksum();
        let unshifted = BackendConfig {
            annotation_value_word_blocklist: String::new(),
            global_rate_limit_memcached_host: "a".to_string(),
            ..Default::default()
        }
        .with_checksum();
        assert_ne!(shifted.checksum, unshifted.checksum);
    }
}
