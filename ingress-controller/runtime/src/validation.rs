use crate::{core::BackendConfig, index::annotations::DEFAULT_PREFIX, k8s::MultiClusterIngress};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PolicyError {
    #[error(
        "this deployment is trying to create a catch-all multiclusteringress while catch-all \
         resources are disabled. Remove '.spec.defaultBackend' or enable catch-all resources"
    )]
    CatchAllDisabled,

    /// Annotations must use the configured prefix rather than the default one.
    #[error(
        "this deployment has a custom annotation prefix defined. Use '{custom}' instead of '{}'",
        DEFAULT_PREFIX
    )]
    DefaultAnnotationPrefix { custom: String },

    #[error("{key} annotation contains invalid word {word}")]
    ForbiddenWord { key: String, word: String },

    #[error("{key} annotation cannot be used. Snippet directives are disabled by the administrator")]
    SnippetsDisabled { key: String },

    #[error(
        "'global-rate-limit*' annotations require 'global-rate-limit-memcached-host' to be configured"
    )]
    GlobalRateLimitUnconfigured,
}

/// Checks a resource against the cluster's admission policy, before any
/// configuration is synthesized for it.
pub(crate) fn check_policy(
    mci: &MultiClusterIngress,
    disable_catch_all: bool,
    prefix: &str,
    backend: &BackendConfig,
) -> Result<(), PolicyError> {
    if disable_catch_all && mci.spec.default_backend.is_some() {
        return Err(PolicyError::CatchAllDisabled);
    }

    let Some(annotations) = mci.metadata.annotations.as_ref() else {
        return Ok(());
    };

    let default_prefix = format!("{DEFAULT_PREFIX}/");
    let prefixed = format!("{prefix}/");
    let rate_limit = format!("{prefix}/global-rate-limit");
    let blocked = backend.blocked_words();

    for (key, value) in annotations {
        if prefix != DEFAULT_PREFIX && key.starts_with(&default_prefix) {
            return Err(PolicyError::DefaultAnnotationPrefix {
                custom: prefix.to_string(),
            });
        }

        if key.starts_with(&prefixed) {
            if let Some(word) = blocked.iter().find(|w| value.contains(*w)) {
                return Err(PolicyError::ForbiddenWord {
                    key: key.clone(),
                    word: word.to_string(),
                });
            }
        }

        if !backend.allow_snippet_annotations && key.ends_with("-snippet") {
            return Err(PolicyError::SnippetsDisabled { key: key.clone() });
        }

        if backend.global_rate_limit_memcached_host.is_empty() && key.starts_with(&rate_limit) {
            return Err(PolicyError::GlobalRateLimitUnconfigured);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::IngressBackend;
    use maplit::btreemap;
    use std::collections::BTreeMap;

    fn mk_mci(annotations: BTreeMap<&str, &str>) -> MultiClusterIngress {
        let mut mci = MultiClusterIngress::new("web", Default::default());
        mci.metadata.namespace = Some("ns-0".to_string());
        mci.metadata.annotations = Some(
            annotations
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        mci
    }

    fn key(name: &str) -> String {
        format!("{DEFAULT_PREFIX}/{name}")
    }

    #[test]
    fn accepts_plain_resources() {
        let rewrite = key("rewrite-target");
        let mci = mk_mci(btreemap! { rewrite.as_str() => "/" });
        assert_eq!(
            check_policy(&mci, true, DEFAULT_PREFIX, &BackendConfig::default()),
            Ok(())
        );
    }

    #[test]
    fn catch_all_disabled() {
        let mut mci = mk_mci(btreemap! {});
        mci.spec.default_backend = Some(IngressBackend::default());
        assert_eq!(
            check_policy(&mci, true, DEFAULT_PREFIX, &BackendConfig::default()),
            Err(PolicyError::CatchAllDisabled)
        );
        assert_eq!(
            check_policy(&mci, false, DEFAULT_PREFIX, &BackendConfig::default()),
            Ok(())
        );
    }

    #[test]
    fn custom_prefix_rejects_default_prefix() {
        let ssl = key("ssl-redirect");
        let mci = mk_mci(btreemap! { ssl.as_str() => "false" });
        assert_eq!(
            check_policy(&mci, false, "custom.io", &BackendConfig::default()),
            Err(PolicyError::DefaultAnnotationPrefix {
                custom: "custom.io".to_string()
            })
        );
    }

    #[test]
    fn blocked_words() {
        let backend = BackendConfig {
            annotation_value_word_blocklist: "load_module, lua_package".to_string(),
            ..Default::default()
        };
        let snippet = key("configuration-snippet");
        let mci = mk_mci(btreemap! { snippet.as_str() => "lua_package_path '/tmp';" });
        assert_eq!(
            check_policy(&mci, false, DEFAULT_PREFIX, &backend),
            Err(PolicyError::ForbiddenWord {
                key: snippet.clone(),
                word: "lua_package".to_string(),
            })
        );

        // Only prefixed annotations are checked.
        let mci = mk_mci(btreemap! { "other.io/notes" => "load_module" });
        assert_eq!(check_policy(&mci, false, DEFAULT_PREFIX, &backend), Ok(()));
    }

    #[test]
    fn snippets_disabled() {
        let backend = BackendConfig {
            allow_snippet_annotations: false,
            ..Default::default()
        };
        let snippet = key("server-snippet");
        let mci = mk_mci(btreemap! { snippet.as_str() => "listen 8080;" });
        assert_eq!(
            check_policy(&mci, false, DEFAULT_PREFIX, &backend),
            Err(PolicyError::SnippetsDisabled { key: snippet.clone() })
        );
    }

    #[test]
    fn global_rate_limit_requires_memcached() {
        let limit = key("global-rate-limit");
        let mci = mk_mci(btreemap! { limit.as_str() => "100" });
        assert_eq!(
            check_policy(&mci, false, DEFAULT_PREFIX, &BackendConfig::default()),
            Err(PolicyError::GlobalRateLimitUnconfigured)
        );

        let backend = BackendConfig {
            global_rate_limit_memcached_host: "memcached.ingress".to_string(),
            ..Default::default()
        };
        assert_eq!(check_policy(&mci, false, DEFAULT_PREFIX, &backend), Ok(()));
    }
}
