mod tls;

use super::*;
use chrono::{offset::Utc, DateTime, Duration};
use kubert::index::IndexNamespacedResource;
use mci_ingress_controller_core::{
    Backend, BackendConfig, Certificate, Configuration, Endpoint, Location, ResourceStore, Server, SslCert,
    DEFAULT_SERVER_NAME, DEFAULT_UPSTREAM_NAME,
};
use mci_ingress_controller_k8s_api::{
    ByteString, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, HTTPIngressPath,
    HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend, IngressTLS,
    MultiClusterIngress, MultiClusterIngressSpec, ObjectMeta, PathType, Secret,
    Service, ServiceBackendPort, ServicePort, ServiceSpec,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tracing::Level;

#[test]
fn one_backend_per_service_reference() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 80));
    store.apply(mk_endpoints("ns-0", "derived-web", &["10.1.0.1", "10.1.0.2"], 8080));
    store.apply(mk_ingress(
        "ns-0",
        "a",
        BTreeMap::new(),
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));
    store.apply(mk_ingress(
        "ns-0",
        "b",
        BTreeMap::new(),
        vec![
            mk_rule("b.com", vec![mk_path("/", "Prefix", "web", 80)]),
            mk_rule("c.com", vec![mk_path("/", "Prefix", "api", 8080)]),
        ],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let config = &synthesized.configuration;
    assert_eq!(
        backend_names(config),
        vec!["ns-0-api-8080", "ns-0-web-80", DEFAULT_UPSTREAM_NAME]
    );
    assert_eq!(
        server_names(config),
        vec![DEFAULT_SERVER_NAME, "a.com", "b.com", "c.com"]
    );
    assert_eq!(
        backend(config, "ns-0-web-80").endpoints,
        vec![
            Endpoint::new("10.1.0.1", 8080),
            Endpoint::new("10.1.0.2", 8080)
        ]
    );
    assert_eq!(
        backend(config, DEFAULT_UPSTREAM_NAME).endpoints,
        vec![Endpoint::new("127.0.0.1", 8181)]
    );
    assert_eq!(
        backend(config, "ns-0-web-80").load_balancing,
        "round_robin"
    );

    let root = location(server(config, "b.com"), "/", PathType::Prefix);
    assert_eq!(root.backend, "ns-0-web-80");
    assert!(!root.is_def_backend);
    assert_eq!(root.ingress.as_ref().map(|i| i.name.as_str()), Some("b"));

    // The missing api service is reported, but does not fail synthesis.
    assert!(synthesized
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::Service { service, .. } if service == "ns-0/derived-api")));
    assert!(backend(config, "ns-0-api-8080").endpoints.is_empty());

    assert_eq!(
        synthesized.hosts.into_iter().collect::<Vec<_>>(),
        vec!["_", "a.com", "b.com", "c.com"]
    );
}

#[test]
fn synthesis_is_deterministic() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 80));
    for name in ["c", "a", "b"] {
        store.apply(mk_ingress(
            "ns-0",
            name,
            BTreeMap::new(),
            vec![mk_rule(
                &format!("{name}.com"),
                vec![
                    mk_path("/", "Prefix", "web", 80),
                    mk_path("/api", "Prefix", "web", 80),
                    mk_path("/api/v1", "Exact", "web", 80),
                ],
            )],
        ));
    }

    let synthesizer = Synthesizer::new(&store);
    assert_eq!(synthesizer.synthesize_all(), synthesizer.synthesize_all());
}

#[test]
fn duplicate_locations_keep_the_first_owner() {
    let mut store = mk_store();
    store.apply(mk_ingress(
        "ns-0",
        "a",
        BTreeMap::new(),
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));
    store.apply(mk_ingress(
        "ns-0",
        "b",
        BTreeMap::new(),
        vec![mk_rule("a.com", vec![mk_path("", "Prefix", "api", 80)])],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let a = server(&synthesized.configuration, "a.com");
    assert_eq!(a.locations.len(), 1);
    assert_eq!(a.locations[0].backend, "ns-0-web-80");
    assert!(synthesized
        .diagnostics
        .iter()
        .any(|d| *d
            == Diagnostic::DuplicateLocation {
                host: "a.com".to_string(),
                path: "/".to_string(),
                backend: "ns-0-web-80".to_string(),
                ingress: "ns-0/b".to_string(),
            }));
}

#[test]
fn prefix_locations_are_expanded_and_sorted() {
    let mut store = mk_store();
    store.apply(mk_ingress(
        "ns-0",
        "a",
        BTreeMap::new(),
        vec![mk_rule(
            "a.com",
            vec![
                mk_path("/api", "Prefix", "web", 80),
                mk_path("/", "ImplementationSpecific", "web", 80),
                mk_path("/api/v1", "Exact", "web", 80),
            ],
        )],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let a = server(&synthesized.configuration, "a.com");
    assert_eq!(
        a.locations
            .iter()
            .map(|l| (l.path.as_str(), l.path_type))
            .collect::<Vec<_>>(),
        vec![
            ("/api/v1", PathType::Exact),
            ("/api/", PathType::Prefix),
            ("/api", PathType::Exact),
            ("/", PathType::Prefix),
        ]
    );
    assert_eq!(
        location(a, "/api/", PathType::Prefix).ingress_path,
        "/api"
    );
}

#[test]
fn server_fields_are_first_wins() {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .try_init()
        .ok();

    let mut store = mk_store();
    store.apply(mk_ingress(
        "ns-0",
        "a",
        maplit::btreemap! {
            "server-alias" => "www.a.com",
            "server-snippet" => "listen 8443;",
            "ssl-ciphers" => "HIGH",
        },
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));
    store.apply(mk_ingress(
        "ns-0",
        "b",
        maplit::btreemap! {
            "server-alias" => "alt.a.com",
            "server-snippet" => "listen 9443;",
            "ssl-ciphers" => "LOW",
        },
        vec![mk_rule("a.com", vec![mk_path("/b", "Exact", "web", 80)])],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let a = server(&synthesized.configuration, "a.com");
    assert_eq!(a.aliases, vec!["www.a.com".to_string()]);
    assert_eq!(a.server_snippet, "listen 8443;");
    assert_eq!(a.ssl_ciphers, "HIGH");
    assert!(synthesized.hosts.contains("www.a.com"));
    assert!(!synthesized.hosts.contains("alt.a.com"));

    let diagnostics = synthesized.diagnostics.into_vec();
    assert!(diagnostics.contains(&Diagnostic::AliasConflict {
        host: "a.com".to_string(),
        ingress: "ns-0/b".to_string(),
    }));
    assert!(diagnostics.contains(&Diagnostic::ServerSnippetConflict {
        host: "a.com".to_string(),
        ingress: "ns-0/b".to_string(),
    }));
}

#[test]
fn snippets_are_dropped_when_disabled() {
    let mut store = mk_store();
    store.apply(mk_ingress(
        "ns-0",
        "a",
        maplit::btreemap! {
            "stream-snippet" => "server { listen 5000; }",
            "server-snippet" => "listen 8443;",
        },
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        synthesized.configuration.stream_snippets,
        vec!["server { listen 5000; }".to_string()]
    );

    store.set_backend_config(BackendConfig {
        allow_snippet_annotations: false,
        ..Default::default()
    });
    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert!(synthesized.configuration.stream_snippets.is_empty());
    assert_eq!(
        server(&synthesized.configuration, "a.com").server_snippet,
        ""
    );
}

#[test]
fn configuration_carries_backend_config_checksum() {
    let mut store = mk_store();
    let synthesized = Synthesizer::new(&store).synthesize_all();
    let initial = synthesized.configuration.backend_config_checksum;
    assert!(!initial.is_empty());
    assert_eq!(initial, store.backend_config().checksum);

    store.set_backend_config(BackendConfig {
        load_balancing: "ewma".to_string(),
        ..Default::default()
    });
    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert!(!synthesized.configuration.backend_config_checksum.is_empty());
    assert_ne!(synthesized.configuration.backend_config_checksum, initial);
}

#[test]
fn default_backend_resource_replaces_catch_all() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 80));
    store.apply(mk_endpoints("ns-0", "derived-web", &["10.1.0.1"], 8080));
    let mut mci = mk_ingress(
        "ns-0",
        "default",
        maplit::btreemap! { "enable-access-log" => "false" },
        vec![],
    );
    mci.spec.default_backend = Some(mk_backend("web", 80));
    store.apply(mci);

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let root = location(
        server(&synthesized.configuration, DEFAULT_SERVER_NAME),
        "/",
        PathType::Prefix,
    );
    assert_eq!(root.backend, "ns-0-web-80");
    assert!(!root.is_def_backend);
    assert!(!root.logs.access);
    assert_eq!(
        root.ingress.as_ref().map(|i| i.name.as_str()),
        Some("default")
    );
}

/// A resource with no rules routes the catch-all to its custom default
/// backend when its own backend has no endpoints.
#[test]
fn custom_default_backend_without_endpoints() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 80));
    store.apply(mk_service("ns-0", "fallback", 80));
    store.apply(mk_endpoints("ns-0", "fallback", &["10.2.0.1"], 8080));
    let mut mci = mk_ingress(
        "ns-0",
        "default",
        maplit::btreemap! { "default-backend" => "fallback" },
        vec![],
    );
    mci.spec.default_backend = Some(mk_backend("web", 80));
    store.apply(mci);

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let config = &synthesized.configuration;
    let root = location(server(config, DEFAULT_SERVER_NAME), "/", PathType::Prefix);
    assert_eq!(root.backend, "custom-default-backend-ns-0-fallback");
    assert_eq!(
        root.default_backend_upstream_name,
        "custom-default-backend-ns-0-fallback"
    );
    assert!(!root.is_def_backend);
    assert_eq!(
        backend(config, "custom-default-backend-ns-0-fallback").endpoints,
        vec![Endpoint::new("10.2.0.1", 8080)]
    );
}

#[test]
fn custom_default_backend_kept_aside_when_primary_has_endpoints() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 80));
    store.apply(mk_endpoints("ns-0", "derived-web", &["10.1.0.1"], 8080));
    store.apply(mk_service("ns-0", "fallback", 80));
    store.apply(mk_endpoints("ns-0", "fallback", &["10.2.0.1"], 8080));
    for name in ["a", "b"] {
        store.apply(mk_ingress(
            "ns-0",
            name,
            maplit::btreemap! { "default-backend" => "fallback" },
            vec![mk_rule(
                &format!("{name}.com"),
                vec![mk_path("/", "Prefix", "web", 80)],
            )],
        ));
    }

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let config = &synthesized.configuration;
    let root = location(server(config, "a.com"), "/", PathType::Prefix);
    assert_eq!(root.backend, "ns-0-web-80");
    assert_eq!(
        root.default_backend_upstream_name,
        "custom-default-backend-ns-0-fallback"
    );
    assert_eq!(
        config
            .backends
            .iter()
            .filter(|b| b.name.starts_with("custom-default-backend-"))
            .count(),
        1
    );
}

#[test]
fn ssl_passthrough_backends() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 443));
    store.apply(mk_ingress(
        "ns-0",
        "a",
        maplit::btreemap! { "ssl-passthrough" => "true" },
        vec![mk_rule(
            "a.com",
            vec![
                mk_path("/", "Prefix", "web", 443),
                mk_path("/other", "Exact", "web", 443),
            ],
        )],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let config = &synthesized.configuration;
    assert!(backend(config, "ns-0-web-443").ssl_passthrough);
    assert_eq!(config.passthrough_backends.len(), 1);
    let passthrough = &config.passthrough_backends[0];
    assert_eq!(passthrough.hostname, "a.com");
    assert_eq!(passthrough.backend, "ns-0-web-443");
    assert_eq!(
        passthrough.port,
        Some(mci_ingress_controller_core::BackendPort::Number(443))
    );
}

#[test]
fn service_upstream_uses_cluster_address() {
    let mut store = mk_store();
    store.apply(mk_service("ns-0", "derived-web", 80));
    store.apply(mk_endpoints("ns-0", "derived-web", &["10.1.0.1"], 8080));
    store.apply(mk_ingress(
        "ns-0",
        "a",
        maplit::btreemap! { "service-upstream" => "true" },
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    assert_eq!(
        backend(&synthesized.configuration, "ns-0-web-80").endpoints,
        vec![Endpoint::new("10.96.0.10", 80)]
    );
}

#[test]
fn cookie_affinity_is_recorded_per_host() {
    let mut store = mk_store();
    store.apply(mk_ingress(
        "ns-0",
        "a",
        maplit::btreemap! {
            "affinity" => "cookie",
            "session-cookie-name" => "route",
            "server-alias" => "www.a.com",
        },
        vec![mk_rule(
            "a.com",
            vec![
                mk_path("/", "Prefix", "web", 80),
                mk_path("/app", "Prefix", "web", 80),
            ],
        )],
    ));

    let synthesized = Synthesizer::new(&store).synthesize_all();
    let affinity = &backend(&synthesized.configuration, "ns-0-web-80").session_affinity;
    assert_eq!(affinity.affinity_type, "cookie");
    assert_eq!(affinity.affinity_mode, "balanced");
    assert_eq!(affinity.cookie.name, "route");
    let paths = vec!["/".to_string(), "/app".to_string()];
    assert_eq!(affinity.cookie.locations.get("a.com"), Some(&paths));
    assert_eq!(affinity.cookie.locations.get("www.a.com"), Some(&paths));
}

#[test]
fn default_service_backs_the_default_upstream() {
    let mut store = mk_store();
    store.apply(mk_service("ingress", "default-http-backend", 80));
    store.apply(mk_endpoints(
        "ingress",
        "default-http-backend",
        &["10.3.0.1"],
        8080,
    ));

    let synthesized = Synthesizer::new(&store)
        .with_default_service("ingress/default-http-backend")
        .synthesize_all();
    let default = backend(&synthesized.configuration, DEFAULT_UPSTREAM_NAME);
    assert_eq!(default.endpoints, vec![Endpoint::new("10.3.0.1", 8080)]);
    assert!(default.service.is_some());

    let synthesized = Synthesizer::new(&store)
        .with_default_service("ingress/missing")
        .synthesize_all();
    assert_eq!(
        backend(&synthesized.configuration, DEFAULT_UPSTREAM_NAME).endpoints,
        vec![Endpoint::new("127.0.0.1", 8181)]
    );
}

#[test]
fn removed_ingresses_lists_dropped_owners() {
    let mut store = mk_store();
    store.apply(mk_ingress(
        "ns-0",
        "a",
        BTreeMap::new(),
        vec![mk_rule("a.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));
    store.apply(mk_ingress(
        "ns-0",
        "b",
        BTreeMap::new(),
        vec![mk_rule("b.com", vec![mk_path("/", "Prefix", "web", 80)])],
    ));
    let previous = Synthesizer::new(&store).synthesize_all().configuration;

    IndexNamespacedResource::<MultiClusterIngress>::delete(
        &mut store,
        "ns-0".to_string(),
        "b".to_string(),
    );
    let next = Synthesizer::new(&store).synthesize_all().configuration;

    assert_eq!(removed_ingresses(&previous, &next), vec!["ns-0/b"]);
    assert!(removed_ingresses(&next, &previous).is_empty());
}

// === helpers ===

fn mk_store() -> Store {
    Store::new(StoreConfig::default())
}

fn mk_ingress(
    ns: &str,
    name: &str,
    annotations: BTreeMap<&str, &str>,
    rules: Vec<IngressRule>,
) -> MultiClusterIngress {
    let mut mci = MultiClusterIngress::new(
        name,
        MultiClusterIngressSpec {
            rules: Some(rules),
            ..Default::default()
        },
    );
    mci.metadata.namespace = Some(ns.to_string());
    mci.metadata.annotations = Some(
        annotations
            .into_iter()
            .map(|(k, v)| (format!("{}/{}", crate::annotations::DEFAULT_PREFIX, k), v.to_string()))
            .collect(),
    );
    mci
}

fn mk_rule(host: &str, paths: Vec<HTTPIngressPath>) -> IngressRule {
    IngressRule {
        host: Some(host.to_string()),
        http: Some(HTTPIngressRuleValue { paths }),
    }
}

fn mk_path(path: &str, path_type: &str, svc: &str, port: i32) -> HTTPIngressPath {
    HTTPIngressPath {
        path: Some(path.to_string()),
        path_type: path_type.to_string(),
        backend: mk_backend(svc, port),
    }
}

fn mk_backend(svc: &str, port: i32) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: svc.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(port),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

fn mk_service(ns: &str, name: &str, port: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.96.0.10".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_endpoints(ns: &str, name: &str, ips: &[&str], port: i32) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![EndpointPort {
                name: Some("http".to_string()),
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

fn mk_cert(ns: &str, name: &str, dns_names: &[&str], expire_time: DateTime<Utc>) -> SslCert {
    SslCert {
        name: format!("{ns}/{name}"),
        pem: Vec::new(),
        certificate: Some(Certificate {
            common_name: dns_names.first().map(|s| s.to_string()).unwrap_or_default(),
            dns_names: dns_names.iter().map(|s| s.to_string()).collect(),
            ip_addresses: Vec::new(),
        }),
        expire_time,
    }
}

fn mk_tls(hosts: &[&str], secret: &str) -> IngressTLS {
    IngressTLS {
        hosts: Some(hosts.iter().map(|h| h.to_string()).collect()),
        secret_name: Some(secret.to_string()),
    }
}

fn backend_names(config: &Configuration) -> Vec<&str> {
    config.backends.iter().map(|b| b.name.as_str()).collect()
}

fn server_names(config: &Configuration) -> Vec<&str> {
    config.servers.iter().map(|s| s.hostname.as_str()).collect()
}

#[track_caller]
fn backend<'c>(config: &'c Configuration, name: &str) -> &'c Backend {
    config
        .backends
        .iter()
        .find(|b| b.name == name)
        .unwrap_or_else(|| panic!("backend {name} must exist"))
}

#[track_caller]
fn server<'c>(config: &'c Configuration, host: &str) -> &'c Server {
    config
        .servers
        .iter()
        .find(|s| s.hostname == host)
        .unwrap_or_else(|| panic!("server {host} must exist"))
}

#[track_caller]
fn location<'s>(server: &'s Server, path: &str, path_type: PathType) -> &'s Location {
    server
        .locations
        .iter()
        .find(|l| l.path == path && l.path_type == path_type)
        .unwrap_or_else(|| panic!("location {path} ({path_type}) must exist"))
}

fn in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}
