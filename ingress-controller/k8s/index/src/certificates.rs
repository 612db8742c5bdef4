//! Loads TLS certificates from `kubernetes.io/tls` secrets.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{offset::Utc, DateTime};
use mci_ingress_controller_core::{Certificate, SslCert};
use mci_ingress_controller_k8s_api::Secret;
use std::net::IpAddr;
use x509_parser::{certificate::X509Certificate, extensions::GeneralName, prelude::FromDer};

const TLS_CERT_KEY: &str = "tls.crt";
const TLS_PRIVATE_KEY: &str = "tls.key";

/// Builds an [`SslCert`] from a secret holding a `tls.crt` entry. Secrets
/// without one do not hold certificates and yield `None`.
pub fn from_secret(key: &str, secret: &Secret) -> Result<Option<SslCert>> {
    let data = secret.data.as_ref();
    let Some(crt) = data.and_then(|d| d.get(TLS_CERT_KEY)) else {
        return Ok(None);
    };
    let Some(private) = data.and_then(|d| d.get(TLS_PRIVATE_KEY)) else {
        bail!("secret {key} has no {TLS_PRIVATE_KEY}");
    };

    let mut pem = crt.0.clone();
    if !pem.ends_with(b"\n") {
        pem.push(b'\n');
    }
    pem.extend_from_slice(&private.0);

    let (certificate, expire_time) =
        parse_pem(&crt.0).with_context(|| format!("secret {key} holds an invalid certificate"))?;
    Ok(Some(SslCert {
        name: key.to_string(),
        pem,
        certificate: Some(certificate),
        expire_time,
    }))
}

/// Parses the leaf (first) certificate of a PEM bundle.
fn parse_pem(pem: &[u8]) -> Result<(Certificate, DateTime<Utc>)> {
    let der = rustls_pemfile::certs(&mut &pem[..])
        .next()
        .ok_or_else(|| anyhow!("no PEM certificate found"))??;
    let (_, cert) =
        X509Certificate::from_der(&der).map_err(|error| anyhow!("invalid x509: {error}"))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    let san = cert
        .subject_alternative_name()
        .map_err(|error| anyhow!("invalid subject alternative names: {error}"))?;
    for name in san.iter().flat_map(|san| san.value.general_names.iter()) {
        match name {
            GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
            GeneralName::IPAddress(bytes) => {
                if let Some(ip) = ip_from_bytes(bytes) {
                    ip_addresses.push(ip);
                }
            }
            _ => {}
        }
    }

    let not_after = cert.validity().not_after.timestamp();
    let expire_time = DateTime::<Utc>::from_timestamp(not_after, 0)
        .ok_or_else(|| anyhow!("expiry {not_after} is out of range"))?;

    Ok((
        Certificate {
            common_name,
            dns_names,
            ip_addresses,
        },
        expire_time,
    ))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}
