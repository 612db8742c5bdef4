//! Parses routing policy from resource annotations.
//!
//! Each policy reads a handful of `<prefix>/<name>` annotations. A missing
//! annotation leaves the policy at its default; an invalid one is logged and
//! also leaves the default, except where the policy would otherwise be
//! silently weakened (authentication), in which case the location is denied.

mod auth;
pub mod parser;


pub use self::parser::{AnnotatedResource, ParseError, Parser, DEFAULT_PREFIX};
use mci_ingress_controller_core::{
    annotations::{
        canary, opentracing, redirect, rewrite, session_affinity, ssl_cipher, upstream_hash_by,
    },
    AnnotationExtractor, Annotations, LocationLogs, ResourceStore,
};
use mci_ingress_controller_k8s_api::{MultiClusterIngress, Service};
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing::{debug, error, warn};

const DEFAULT_AFFINITY_COOKIE_NAME: &str = "INGRESSCOOKIE";
const DEFAULT_HASH_BY_SUBSET_SIZE: i32 = 3;
const DEFAULT_BACKEND_PROTOCOL: &str = "HTTP";
const DEFAULT_AUTH_DIRECTORY: &str = "/etc/ingress-controller/auth";

/// Builds [`Annotations`] for resources, resolving the services and secrets
/// that policies reference through `store`.
#[derive(Debug)]
pub struct Extractor<'s, S: ?Sized> {
    store: &'s S,
    prefix: String,
    auth_directory: PathBuf,
}

// === impl Extractor ===

impl<'s, S: ResourceStore + ?Sized> Extractor<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            auth_directory: PathBuf::from(DEFAULT_AUTH_DIRECTORY),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_auth_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.auth_directory = dir.as_ref().to_path_buf();
        self
    }

    /// Parses every policy from `resource`'s annotations.
    pub fn extract_from<R: AnnotatedResource>(&self, resource: &R) -> Annotations {
        let p = Parser::new(&self.prefix, resource);
        let meta = resource.object_meta();
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();
        let mut anns = Annotations::default();
        let mut denied = None;

        macro_rules! policy {
            ($field:ident, $kind:literal, $parse:expr) => {
                match $parse {
                    Ok(value) => anns.$field = value,
                    Err(ParseError::MissingAnnotations) => {}
                    Err(ParseError::LocationDenied(reason)) => {
                        if denied.is_none() {
                            error!(%namespace, %name, annotation = $kind, %reason, "Denying location");
                            denied = Some(ParseError::LocationDenied(reason).to_string());
                        } else {
                            debug!(%namespace, %name, annotation = $kind, %reason, "Location already denied");
                        }
                    }
                    Err(error) => {
                        warn!(%namespace, %name, annotation = $kind, %error, "Ignoring annotation");
                    }
                }
            };
        }

        policy!(aliases, "server-alias", server_aliases(&p));
        policy!(
            auth,
            "auth",
            auth::parse(&p, resource, self.store, &self.auth_directory)
        );
        policy!(backend_protocol, "backend-protocol", backend_protocol(&p));
        policy!(canary, "canary", canary(&p));
        policy!(
            configuration_snippet,
            "configuration-snippet",
            p.string("configuration-snippet")
        );
        policy!(
            default_backend,
            "default-backend",
            default_backend(&p, namespace, self.store).map(Some)
        );
        policy!(
            http2_push_preload,
            "http2-push-preload",
            p.bool("http2-push-preload")
        );
        policy!(load_balancing, "load-balance", p.string("load-balance"));
        policy!(logs, "logs", Ok::<_, ParseError>(logs(&p)));
        policy!(opentracing, "opentracing", Ok::<_, ParseError>(opentracing(&p)));
        policy!(redirect, "redirect", redirect(&p));
        policy!(rewrite, "rewrite", Ok::<_, ParseError>(rewrite(&p)));
        policy!(server_snippet, "server-snippet", p.string("server-snippet"));
        policy!(service_upstream, "service-upstream", p.bool("service-upstream"));
        policy!(
            session_affinity,
            "session-affinity",
            Ok::<_, ParseError>(session_affinity(&p))
        );
        policy!(ssl_cipher, "ssl-ciphers", ssl_cipher(&p));
        policy!(ssl_passthrough, "ssl-passthrough", p.bool("ssl-passthrough"));
        policy!(stream_snippet, "stream-snippet", p.string("stream-snippet"));
        policy!(
            upstream_hash_by,
            "upstream-hash-by",
            Ok::<_, ParseError>(upstream_hash_by(&p))
        );

        anns.denied = denied;
        anns
    }
}

impl<S: ResourceStore + ?Sized> AnnotationExtractor for Extractor<'_, S> {
    fn extract(&self, mci: &MultiClusterIngress) -> Annotations {
        self.extract_from(mci)
    }
}

/// Clears every snippet directive from `anns`.
pub fn drop_snippet_directives(anns: &mut Annotations, ingress: &str) {
    if !anns.configuration_snippet.is_empty() {
        warn!(%ingress, "Configuration snippets are disabled; ignoring");
        anns.configuration_snippet.clear();
    }
    if !anns.server_snippet.is_empty() {
        warn!(%ingress, "Server snippets are disabled; ignoring");
        anns.server_snippet.clear();
    }
    if !anns.stream_snippet.is_empty() {
        warn!(%ingress, "Stream snippets are disabled; ignoring");
        anns.stream_snippet.clear();
    }
}

fn server_aliases(p: &Parser<'_>) -> Result<Vec<String>, ParseError> {
    let mut aliases = p.list("server-alias")?;
    aliases.sort();
    aliases.dedup();
    Ok(aliases)
}

fn backend_protocol(p: &Parser<'_>) -> Result<String, ParseError> {
    static VALID: OnceLock<Regex> = OnceLock::new();
    let valid = VALID.get_or_init(|| {
        Regex::new(r"^(AUTO_HTTP|HTTP|HTTPS|AJP|GRPC|GRPCS|FCGI)$").expect("regex must compile")
    });

    let proto = match p.string("backend-protocol") {
        Ok(proto) => proto.trim().to_ascii_uppercase(),
        Err(_) => return Ok(DEFAULT_BACKEND_PROTOCOL.to_string()),
    };
    if !valid.is_match(&proto) {
        warn!(%proto, "Invalid backend-protocol annotation; using HTTP");
        return Ok(DEFAULT_BACKEND_PROTOCOL.to_string());
    }
    Ok(proto)
}

fn canary(p: &Parser<'_>) -> Result<canary::Config, ParseError> {
    let annotation = match p.bool("canary") {
        Ok(enabled) => Some(enabled),
        Err(ParseError::MissingAnnotations) => None,
        Err(_) => Some(false),
    };
    let config = canary::Config {
        enabled: annotation.unwrap_or(false),
        weight: p.int("canary-weight").unwrap_or_default(),
        weight_total: p
            .int("canary-weight-total")
            .unwrap_or(canary::DEFAULT_WEIGHT_TOTAL),
        header: p.string_or("canary-by-header", ""),
        header_value: p.string_or("canary-by-header-value", ""),
        header_pattern: p.string_or("canary-by-header-pattern", ""),
        cookie: p.string_or("canary-by-cookie", ""),
        annotation,
    };

    if !config.enabled
        && (config.weight > 0
            || !config.header.is_empty()
            || !config.header_value.is_empty()
            || !config.header_pattern.is_empty()
            || !config.cookie.is_empty())
    {
        return Err(ParseError::InvalidConfiguration {
            name: "canary".to_string(),
            reason: "configured but not enabled".to_string(),
        });
    }

    Ok(config)
}

fn default_backend<S: ResourceStore + ?Sized>(
    p: &Parser<'_>,
    namespace: &str,
    store: &S,
) -> Result<Service, ParseError> {
    let name = p.string("default-backend")?;
    let key = format!("{namespace}/{name}");
    store
        .get_service(&key)
        .map_err(|error| ParseError::InvalidConfiguration {
            name: "default-backend".to_string(),
            reason: format!("unexpected error reading service {key}: {error}"),
        })
}

fn logs(p: &Parser<'_>) -> LocationLogs {
    LocationLogs {
        access: p.bool_or("enable-access-log", true),
        rewrite: p.bool_or("enable-rewrite-log", false),
    }
}

fn opentracing(p: &Parser<'_>) -> opentracing::Config {
    let enabled = match p.bool("enable-opentracing") {
        Ok(enabled) => enabled,
        Err(_) => return opentracing::Config::default(),
    };
    match p.bool("opentracing-trust-incoming-span") {
        Ok(trust) => opentracing::Config {
            enabled,
            set: true,
            trust_enabled: trust,
            trust_set: true,
        },
        Err(_) => opentracing::Config {
            enabled,
            set: true,
            ..Default::default()
        },
    }
}

fn redirect(p: &Parser<'_>) -> Result<redirect::Config, ParseError> {
    let from_to_www = p.bool_or("from-to-www-redirect", false);

    if let Ok(url) = p.string("temporal-redirect") {
        validate_url(p, "temporal-redirect", &url)?;
        return Ok(redirect::Config {
            url,
            code: 302,
            from_to_www,
        });
    }

    if let Ok(url) = p.string("permanent-redirect") {
        validate_url(p, "permanent-redirect", &url)?;
        let code = match p.int("permanent-redirect-code") {
            Ok(code @ 300..=308) => code as u16,
            _ => 301,
        };
        return Ok(redirect::Config {
            url,
            code,
            from_to_www,
        });
    }

    if from_to_www {
        return Ok(redirect::Config {
            from_to_www,
            ..Default::default()
        });
    }

    Err(ParseError::MissingAnnotations)
}

fn validate_url(p: &Parser<'_>, name: &str, url: &str) -> Result<(), ParseError> {
    match url.parse::<http::Uri>() {
        Ok(uri) if uri.scheme().is_some() && uri.authority().is_some() => Ok(()),
        _ => Err(ParseError::InvalidContent {
            name: p.key(name),
            value: url.to_string(),
        }),
    }
}

fn rewrite(p: &Parser<'_>) -> rewrite::Config {
    rewrite::Config {
        target: p.string_or("rewrite-target", ""),
        ssl_redirect: p.bool_or("ssl-redirect", true),
        force_ssl_redirect: p.bool_or("force-ssl-redirect", false),
        app_root: p.string_or("app-root", ""),
        use_regex: p.bool_or("use-regex", false),
    }
}

fn session_affinity(p: &Parser<'_>) -> session_affinity::Config {
    let affinity_type = p.string_or("affinity", "");
    let mode = match p.string("affinity-mode").as_deref() {
        Ok("persistent") => "persistent",
        _ => "balanced",
    };
    let canary_behavior = match p.string("affinity-canary-behavior").as_deref() {
        Ok("legacy") => "legacy",
        _ => "sticky",
    };

    let cookie = if affinity_type == "cookie" {
        session_affinity::Cookie {
            name: p.string_or("session-cookie-name", DEFAULT_AFFINITY_COOKIE_NAME),
            expires: numeric_or_empty(p, "session-cookie-expires"),
            max_age: numeric_or_empty(p, "session-cookie-max-age"),
            path: p.string_or("session-cookie-path", ""),
            secure: p.bool_or("session-cookie-secure", false),
            same_site: p.string_or("session-cookie-samesite", ""),
            conditional_same_site_none: p.bool_or("session-cookie-conditional-samesite-none", false),
            change_on_failure: p.bool_or("session-cookie-change-on-failure", false),
        }
    } else {
        if !affinity_type.is_empty() {
            warn!(affinity = %affinity_type, "Unsupported session affinity type");
        }
        session_affinity::Cookie::default()
    };

    session_affinity::Config {
        affinity_type,
        mode: mode.to_string(),
        canary_behavior: canary_behavior.to_string(),
        cookie,
    }
}

fn numeric_or_empty(p: &Parser<'_>, name: &str) -> String {
    match p.string(name) {
        Ok(v) if v.chars().all(|c| c.is_ascii_digit()) => v,
        Ok(v) => {
            warn!(annotation = %p.key(name), value = %v, "Invalid cookie duration; ignoring");
            String::new()
        }
        Err(_) => String::new(),
    }
}

fn ssl_cipher(p: &Parser<'_>) -> Result<ssl_cipher::Config, ParseError> {
    static VALID: OnceLock<Regex> = OnceLock::new();
    let valid =
        VALID.get_or_init(|| Regex::new(r"^[A-Za-z0-9\+:_\-!]*$").expect("regex must compile"));

    let prefer_server_ciphers = match p.bool("ssl-prefer-server-ciphers") {
        Ok(true) => "on".to_string(),
        Ok(false) => "off".to_string(),
        Err(_) => String::new(),
    };
    let ciphers = match p.string("ssl-ciphers") {
        Ok(ciphers) if valid.is_match(&ciphers) => ciphers,
        Ok(ciphers) => {
            return Err(ParseError::InvalidContent {
                name: p.key("ssl-ciphers"),
                value: ciphers,
            })
        }
        Err(_) if prefer_server_ciphers.is_empty() => return Err(ParseError::MissingAnnotations),
        Err(_) => String::new(),
    };

    Ok(ssl_cipher::Config {
        ciphers,
        prefer_server_ciphers,
    })
}

fn upstream_hash_by(p: &Parser<'_>) -> upstream_hash_by::Config {
    upstream_hash_by::Config {
        hash_by: p.string_or("upstream-hash-by", ""),
        subset: p.bool_or("upstream-hash-by-subset", false),
        subset_size: p
            .int("upstream-hash-by-subset-size")
            .unwrap_or(DEFAULT_HASH_BY_SUBSET_SIZE),
    }
}
