//! Selects the certificate served for a hostname.

use crate::diagnostics::{Diagnostic, Resolved};
use chrono::{offset::Utc, DateTime, Duration};
use mci_ingress_controller_core::{Certificate, ResourceStore, SslCert};
use mci_ingress_controller_k8s_api::MultiClusterIngress;
use std::net::IpAddr;
use thiserror::Error;

/// Certificates expiring within this window are reported.
const EXPIRY_WARNING_WINDOW_HOURS: i64 = 240;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostnameError {
    #[error("certificate is valid for {valid}, not {host}")]
    Mismatch { host: String, valid: String },

    #[error("certificate is not valid for any names, but wanted to match {host}")]
    NoNames { host: String },
}

/// Finds the name of the secret, referenced by the resource's TLS section,
/// whose certificate should be served for `host`.
///
/// A TLS entry listing the host (case-insensitively) wins. Otherwise, the
/// first referenced certificate that is valid for the host is used.
pub fn secret_name_for<S>(host: &str, mci: &MultiClusterIngress, store: &S) -> Option<String>
where
    S: ResourceStore + ?Sized,
{
    let tls = mci.spec.tls.as_deref().unwrap_or_default();
    let host_lower = host.to_lowercase();
    for entry in tls {
        if entry
            .hosts
            .iter()
            .flatten()
            .any(|h| h.to_lowercase() == host_lower)
        {
            return entry.secret_name.clone();
        }
    }

    let namespace = mci.metadata.namespace.as_deref().unwrap_or_default();
    tls.iter()
        .filter_map(|entry| entry.secret_name.as_deref().filter(|s| !s.is_empty()))
        .find(|secret| {
            store
                .get_certificate(&format!("{namespace}/{secret}"))
                .ok()
                .and_then(|cert| cert.certificate)
                .is_some_and(|cert| verify_hostname(&cert, host, false).is_ok())
        })
        .map(str::to_string)
}

/// Resolves the certificate for `host`, substituting the default certificate
/// when no valid certificate is available.
pub(crate) fn resolve<S>(
    host: &str,
    mci: &MultiClusterIngress,
    store: &S,
    default_certificate: Option<&SslCert>,
    now: DateTime<Utc>,
) -> Resolved<Option<SslCert>>
where
    S: ResourceStore + ?Sized,
{
    let fallback = |reason: String| {
        Resolved::degraded(
            default_certificate.cloned(),
            Diagnostic::DefaultCertificate {
                host: host.to_string(),
                reason,
            },
        )
    };

    let Some(secret) = secret_name_for(host, mci, store) else {
        return fallback("no TLS secret matches the host".to_string());
    };
    let key = format!(
        "{}/{}",
        mci.metadata.namespace.as_deref().unwrap_or_default(),
        secret
    );
    let cert = match store.get_certificate(&key) {
        Ok(cert) => cert,
        Err(error) => return fallback(format!("failed to load secret {key}: {error}")),
    };
    let Some(parsed) = cert.certificate.as_ref() else {
        return fallback(format!("secret {key} holds no parsed certificate"));
    };
    if let Err(error) =
        verify_hostname(parsed, host, false).or_else(|_| verify_hostname(parsed, host, true))
    {
        return fallback(format!("secret {key}: {error}"));
    }

    match expiry_diagnostic(host, &cert, now) {
        Some(diagnostic) => Resolved::degraded(Some(cert), diagnostic),
        None => Resolved::ok(Some(cert)),
    }
}

fn expiry_diagnostic(host: &str, cert: &SslCert, now: DateTime<Utc>) -> Option<Diagnostic> {
    if cert.expire_time < now {
        return Some(Diagnostic::CertificateExpired {
            host: host.to_string(),
            secret: cert.name.clone(),
            expires: cert.expire_time,
        });
    }
    if cert.expire_time < now + Duration::hours(EXPIRY_WARNING_WINDOW_HOURS) {
        return Some(Diagnostic::CertificateExpiring {
            host: host.to_string(),
            secret: cert.name.clone(),
            expires: cert.expire_time,
        });
    }
    None
}

/// Checks that the certificate is valid for `host`.
///
/// IP addresses match the certificate's IP SANs. Hostnames match its DNS SANs,
/// and its common name as well when `common_name` is set, with a wildcard
/// permitted only as the whole leftmost label.
pub fn verify_hostname(
    cert: &Certificate,
    host: &str,
    common_name: bool,
) -> Result<(), HostnameError> {
    let candidate = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = candidate.parse::<IpAddr>() {
        if cert.ip_addresses.contains(&ip) {
            return Ok(());
        }
        return Err(mismatch(
            host,
            cert.ip_addresses.iter().map(ToString::to_string),
        ));
    }

    let mut names = cert.dns_names.iter().map(String::as_str).collect::<Vec<_>>();
    if common_name && !cert.common_name.is_empty() {
        names.push(&cert.common_name);
    }
    if names.is_empty() {
        return Err(HostnameError::NoNames {
            host: host.to_string(),
        });
    }
    if names.iter().any(|pattern| match_hostnames(pattern, host)) {
        return Ok(());
    }
    Err(mismatch(host, names.into_iter().map(str::to_string)))
}

fn mismatch(host: &str, valid: impl Iterator<Item = String>) -> HostnameError {
    HostnameError::Mismatch {
        host: host.to_string(),
        valid: valid.collect::<Vec<_>>().join(", "),
    }
}

fn match_hostnames(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    let host = host.trim_end_matches('.');
    if pattern.is_empty() || host.is_empty() {
        return false;
    }

    let pattern = pattern.split('.').collect::<Vec<_>>();
    let host = host.split('.').collect::<Vec<_>>();
    if pattern.len() != host.len() {
        return false;
    }

    pattern.iter().zip(host.iter()).enumerate().all(|(i, (p, h))| {
        (i == 0 && *p == "*" && !h.is_empty()) || p.eq_ignore_ascii_case(h)
    })
}
