use crate::{
    admission::Admission,
    checker::{CommandChecker, JsonChecker},
    core::{BackendConfig, SyntaxChecker},
    index::{Store, StoreConfig, StoreMetrics},
    k8s::{self, MultiClusterIngress},
    metrics::AdmissionMetrics,
    render::JsonRenderer,
    validator::{Validator, ValidatorConfig},
};
use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use futures::prelude::*;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "mci-ingress-controller",
    about = "Synthesizes and validates MultiClusterIngress routing configuration"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "mci_ingress_controller=info,warn",
        env = "MCI_INGRESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Restricts watches to a single namespace. Resources in other namespaces
    /// are admitted without being checked.
    #[clap(long, env = "MCI_INGRESS_CONTROLLER_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Rejects resources that declare a default backend.
    #[clap(long)]
    disable_catch_all: bool,

    /// Checks only the admitted resource rather than the whole configuration.
    #[clap(long)]
    disable_full_validation_test: bool,

    #[clap(long, default_value = crate::index::annotations::DEFAULT_PREFIX)]
    annotations_prefix: String,

    /// The `namespace/name` of the service behind the default backend.
    #[clap(long)]
    default_backend_service: Option<String>,

    /// The `namespace/name` of the secret holding the default certificate.
    #[clap(long)]
    default_ssl_certificate: Option<String>,

    /// Where authentication files are written.
    #[clap(long, default_value = "/etc/ingress-controller/auth")]
    auth_directory: PathBuf,

    /// A command that checks rendered configurations. The configuration's
    /// path is appended to its arguments. When unset, configurations are
    /// only checked to be well-formed JSON.
    #[clap(long)]
    checker_binary: Option<PathBuf>,

    #[clap(long, value_delimiter = ',', allow_hyphen_values = true)]
    checker_args: Vec<String>,

    #[clap(long, default_value = "true", action = ArgAction::Set)]
    allow_snippet_annotations: bool,

    /// Comma-separated words that may not appear in annotation values.
    #[clap(long, default_value = "")]
    annotation_value_word_blocklist: String,

    #[clap(long, default_value = "")]
    global_rate_limit_memcached_host: String,

    #[clap(long, default_value = "round_robin")]
    load_balance: String,

    #[clap(long)]
    enable_access_log_for_default_backend: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            watch_namespace,
            disable_catch_all,
            disable_full_validation_test,
            annotations_prefix,
            default_backend_service,
            default_ssl_certificate,
            auth_directory,
            checker_binary,
            checker_args,
            allow_snippet_annotations,
            annotation_value_word_blocklist,
            global_rate_limit_memcached_host,
            load_balance,
            enable_access_log_for_default_backend,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let store = Store::shared(StoreConfig {
            annotations_prefix,
            auth_directory,
            backend: BackendConfig {
                allow_snippet_annotations,
                annotation_value_word_blocklist,
                global_rate_limit_memcached_host,
                load_balancing: load_balance,
                enable_access_log_for_default_backend,
                ..Default::default()
            },
            default_certificate: default_ssl_certificate,
        });

        let mut prom = <Registry>::default();
        let index = StoreMetrics::register(store.clone(), prom.sub_registry_with_prefix("store"))
            .shared();
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // Spawn resource watches.

        macro_rules! watch {
            ($ty:ty) => {
                match watch_namespace.as_deref() {
                    Some(ns) => runtime
                        .watch_namespaced::<$ty>(ns.to_string(), watcher::Config::default())
                        .boxed(),
                    None => runtime.watch_all::<$ty>(watcher::Config::default()).boxed(),
                }
            };
        }

        let ingresses = watch!(MultiClusterIngress);
        tokio::spawn(
            kubert::index::namespaced(index.clone(), ingresses)
                .instrument(info_span!("multiclusteringresses")),
        );

        let services = watch!(k8s::Service);
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let endpoints = watch!(k8s::Endpoints);
        tokio::spawn(
            kubert::index::namespaced(index.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let secrets = watch!(k8s::Secret);
        tokio::spawn(
            kubert::index::namespaced(index, secrets).instrument(info_span!("secrets")),
        );

        let validator = Validator::new(
            store,
            ValidatorConfig {
                watch_namespace,
                disable_catch_all,
                disable_full_validation_test,
                default_service: default_backend_service,
            },
            Arc::new(JsonRenderer::default()),
            syntax_checker(checker_binary, checker_args),
            Arc::new(admission_metrics),
        );
        let admission = Admission::new(validator);
        let runtime = runtime.spawn_server(move || admission.clone());
        info!("Watching resources");

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn syntax_checker(
    binary: Option<PathBuf>,
    args: Vec<String>,
) -> Arc<dyn SyntaxChecker + Send + Sync> {
    match binary {
        Some(binary) => Arc::new(CommandChecker::new(binary, args)),
        None => Arc::new(JsonChecker::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Configuration, TemplateRenderer};

    #[tokio::test]
    async fn default_checker_accepts_rendered_configurations() {
        let content = JsonRenderer::default()
            .render(&BackendConfig::default(), &Configuration::default())
            .expect("configuration must render");
        syntax_checker(None, Vec::new())
            .check(&content)
            .await
            .expect("default checker must accept rendered configurations");
    }

    #[tokio::test]
    async fn checker_binary_runs_a_command() {
        let checker = syntax_checker(Some(PathBuf::from("false")), Vec::new());
        assert!(checker.check(b"{}").await.is_err());
    }
}
