use super::*;
use pretty_assertions::assert_eq;

fn mk_tls_store(cert: SslCert) -> Store {
    let mut store = Store::new(StoreConfig {
        default_certificate: Some("ingress/default-tls".to_string()),
        ..Default::default()
    });
    store.insert_certificate(mk_cert("ingress", "default-tls", &["*.local"], in_days(365)));
    store.insert_certificate(cert);
    store
}

fn mk_tls_ingress(hosts: &[&str], secret: &str) -> MultiClusterIngress {
    let mut mci = mk_ingress(
        "ns-0",
        "web",
        BTreeMap::new(),
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    );
    mci.spec.tls = Some(vec![mk_tls(hosts, secret)]);
    mci
}

fn ssl_cert_name(synthesized: &Synthesized, host: &str) -> Option<String> {
    server(&synthesized.configuration, host)
        .ssl_cert
        .as_ref()
        .map(|c| c.name.clone())
}

#[test]
fn certificate_selected_by_tls_host() {
    let mut store = mk_tls_store(mk_cert("ns-0", "a-tls", &["a.com"], in_days(90)));
    store.apply(mk_tls_ingress(&["A.com"], "a-tls"));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        ssl_cert_name(&synthesized, "a.com").as_deref(),
        Some("ns-0/a-tls")
    );
    assert_eq!(
        ssl_cert_name(&synthesized, DEFAULT_SERVER_NAME).as_deref(),
        Some("ingress/default-tls")
    );
    assert!(!synthesized
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::DefaultCertificate { .. })));
}

#[test]
fn certificate_selected_by_subject_alternative_name() {
    let mut store = mk_tls_store(mk_cert("ns-0", "wildcard", &["*.com"], in_days(90)));
    store.apply(mk_tls_ingress(&["b.com"], "wildcard"));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        ssl_cert_name(&synthesized, "a.com").as_deref(),
        Some("ns-0/wildcard")
    );
}

/// A secret whose certificate does not cover the host is replaced by the
/// default certificate.
#[test]
fn invalid_certificate_falls_back_to_default() {
    let mut store = mk_tls_store(mk_cert("ns-0", "a-tls", &["other.com"], in_days(90)));
    store.apply(mk_tls_ingress(&["a.com"], "a-tls"));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        ssl_cert_name(&synthesized, "a.com").as_deref(),
        Some("ingress/default-tls")
    );
    assert!(synthesized.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::DefaultCertificate { host, .. } if host == "a.com"
    )));
}

#[test]
fn missing_secret_falls_back_to_default() {
    let mut store = mk_tls_store(mk_cert("ns-0", "unused", &["a.com"], in_days(90)));
    store.apply(mk_tls_ingress(&["a.com"], "missing"));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        ssl_cert_name(&synthesized, "a.com").as_deref(),
        Some("ingress/default-tls")
    );
}

#[test]
fn expiring_certificate_is_reported() {
    let mut store = mk_tls_store(mk_cert("ns-0", "a-tls", &["a.com"], in_days(3)));
    store.apply(mk_tls_ingress(&["a.com"], "a-tls"));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        ssl_cert_name(&synthesized, "a.com").as_deref(),
        Some("ns-0/a-tls")
    );
    assert!(synthesized.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::CertificateExpiring { secret, .. } if secret == "ns-0/a-tls"
    )));
}

#[test]
fn resources_without_tls_leave_the_server_plain() {
    let mut store = mk_tls_store(mk_cert("ns-0", "a-tls", &["a.com"], in_days(90)));
    store.apply(mk_ingress(
        "ns-0",
        "web",
        BTreeMap::new(),
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(ssl_cert_name(&synthesized, "a.com"), None);
}

fn mk_tls_secret(ns: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(maplit::btreemap! {
            "tls.crt".to_string() => ByteString(include_bytes!("web.crt").to_vec()),
            "tls.key".to_string() => ByteString(include_bytes!("web.key").to_vec()),
        }),
        ..Default::default()
    }
}

#[test]
fn certificates_load_from_watched_secrets() {
    let mut store = Store::new(StoreConfig {
        default_certificate: Some("ingress/default-tls".to_string()),
        ..Default::default()
    });
    store.apply(mk_tls_secret("ingress", "default-tls"));
    store.apply(mk_tls_secret("ns-0", "web-tls"));
    let mut mci = mk_ingress(
        "ns-0",
        "web",
        BTreeMap::new(),
        vec![mk_rule("web.example.com", vec![mk_path("/", "Prefix", "web", 80)])],
    );
    mci.spec.tls = Some(vec![mk_tls(&["web.example.com"], "web-tls")]);
    store.apply(mci);

    assert_eq!(
        store.default_certificate().map(|c| c.name).as_deref(),
        Some("ingress/default-tls")
    );
    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        ssl_cert_name(&synthesized, "web.example.com").as_deref(),
        Some("ns-0/web-tls")
    );

    <Store as IndexNamespacedResource<Secret>>::delete(
        &mut store,
        "ingress".to_string(),
        "default-tls".to_string(),
    );
    assert!(store.default_certificate().is_none());
    assert!(store.get_certificate("ns-0/web-tls").is_ok());
}
