//! Policy parsed from a routing resource's annotations.

use crate::server::LocationLogs;
use mci_ingress_controller_k8s_api::Service;
use serde::Serialize;

/// Every policy a routing resource can carry.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    pub aliases: Vec<String>,
    pub auth: auth::Config,
    pub backend_protocol: String,
    pub canary: canary::Config,
    pub configuration_snippet: String,

    /// The service named by the custom default backend annotation.
    pub default_backend: Option<Service>,

    /// Set when a policy could not be honored and matching requests must be
    /// refused.
    pub denied: Option<String>,
    pub http2_push_preload: bool,
    pub load_balancing: String,
    pub logs: LocationLogs,
    pub opentracing: opentracing::Config,
    pub redirect: redirect::Config,
    pub rewrite: rewrite::Config,
    pub server_snippet: String,
    pub service_upstream: bool,
    pub session_affinity: session_affinity::Config,
    pub ssl_cipher: ssl_cipher::Config,
    pub ssl_passthrough: bool,
    pub stream_snippet: String,
    pub upstream_hash_by: upstream_hash_by::Config,
}

pub mod auth {
    use serde::Serialize;

    /// Basic or digest authentication backed by an htpasswd file.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub auth_type: String,
        pub realm: String,
        pub file: String,
        pub secured: bool,
        pub secret: String,
        pub secret_type: String,

        /// The htpasswd contents to be written to `file` before the
        /// configuration is checked.
        #[serde(skip)]
        pub contents: Vec<u8>,
    }
}

pub mod canary {
    use serde::Serialize;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub enabled: bool,
        pub weight: i32,
        pub weight_total: i32,
        pub header: String,
        pub header_value: String,
        pub header_pattern: String,
        pub cookie: String,

        /// The raw `canary` annotation: unset when missing, `false` when it
        /// is present but not `true`.
        pub annotation: Option<bool>,
    }

    pub const DEFAULT_WEIGHT_TOTAL: i32 = 100;

    impl Default for Config {
        fn default() -> Self {
            Self {
                enabled: false,
                weight: 0,
                weight_total: DEFAULT_WEIGHT_TOTAL,
                header: String::new(),
                header_value: String::new(),
                header_pattern: String::new(),
                cookie: String::new(),
                annotation: None,
            }
        }
    }
}

pub mod opentracing {
    use serde::Serialize;

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub enabled: bool,

        /// Whether `enabled` was set explicitly, rather than inherited.
        pub set: bool,
        pub trust_enabled: bool,
        pub trust_set: bool,
    }
}

pub mod redirect {
    use serde::Serialize;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub url: String,
        pub code: u16,
        pub from_to_www: bool,
    }
}

pub mod rewrite {
    use serde::Serialize;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub target: String,
        pub ssl_redirect: bool,
        pub force_ssl_redirect: bool,
        pub app_root: String,
        pub use_regex: bool,
    }
}

pub mod session_affinity {
    use serde::Serialize;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub affinity_type: String,
        pub mode: String,

        /// `legacy` keeps canary backends from inheriting the primary's
        /// affinity.
        pub canary_behavior: String,
        pub cookie: Cookie,
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Cookie {
        pub name: String,
        pub expires: String,
        pub max_age: String,
        pub path: String,
        pub secure: bool,
        pub same_site: String,
        pub conditional_same_site_none: bool,
        pub change_on_failure: bool,
    }
}

pub mod ssl_cipher {
    use serde::Serialize;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub ciphers: String,
        pub prefer_server_ciphers: String,
    }
}

pub mod upstream_hash_by {
    use serde::Serialize;

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Config {
        pub hash_by: String,
        pub subset: bool,
        pub subset_size: i32,
    }
}
