use chrono::{offset::Utc, DateTime};
use thiserror::Error;

/// A non-fatal problem encountered while synthesizing a configuration. The
/// affected value is substituted (with an empty endpoint list, the default
/// certificate, or nothing) and synthesis continues.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("failed to resolve endpoints for service {service} (backend {backend}): {reason}")]
    Endpoints {
        backend: String,
        service: String,
        reason: String,
    },

    #[error("failed to resolve a cluster endpoint for service {service}: {reason}")]
    ClusterEndpoint { service: String, reason: String },

    #[error("failed to get service {service}: {reason}")]
    Service { service: String, reason: String },

    #[error("using the default certificate for {host}: {reason}")]
    DefaultCertificate { host: String, reason: String },

    #[error("certificate {secret} for {host} expired at {expires}")]
    CertificateExpired {
        host: String,
        secret: String,
        expires: DateTime<Utc>,
    },

    #[error("certificate {secret} for {host} expires soon, at {expires}")]
    CertificateExpiring {
        host: String,
        secret: String,
        expires: DateTime<Utc>,
    },

    #[error("aliases already configured for {host}; ignoring those of {ingress}")]
    AliasConflict { host: String, ingress: String },

    #[error("server snippet already configured for {host}; ignoring that of {ingress}")]
    ServerSnippetConflict { host: String, ingress: String },

    #[error("location {host}{path} already configured with backend {backend}; ignoring {ingress}")]
    DuplicateLocation {
        host: String,
        path: String,
        backend: String,
        ingress: String,
    },

    #[error("alternative backend {backend} is the primary backend of {host}{path}")]
    CanaryIsPrimary {
        backend: String,
        host: String,
        path: String,
    },

    #[error("no primary backend found for alternative backend {backend}; removing it")]
    UnmergedCanary { backend: String },
}

/// A value paired with the diagnostic explaining why it was substituted.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub diagnostic: Option<Diagnostic>,
}

/// Diagnostics collected over one synthesis pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

// === impl Resolved ===

impl<T> Resolved<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            diagnostic: None,
        }
    }

    pub fn degraded(value: T, diagnostic: Diagnostic) -> Self {
        Self {
            value,
            diagnostic: Some(diagnostic),
        }
    }

    /// Records the diagnostic, if any, and returns the value.
    pub fn record(self, diagnostics: &mut Diagnostics) -> T {
        if let Some(d) = self.diagnostic {
            diagnostics.push(d);
        }
        self.value
    }
}

// === impl Diagnostics ===

impl Diagnostics {
    /// Logs and records a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(%diagnostic);
        self.0.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
