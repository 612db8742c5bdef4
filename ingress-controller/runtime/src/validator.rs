//! Admission-time validation of `MultiClusterIngress` resources.
//!
//! A candidate resource is checked against the cluster's admission policy
//! and then synthesized together with every other known resource. The
//! resulting configuration must not route any of the candidate's host/paths
//! to another resource, and it must render and pass the data plane's syntax
//! check. Nothing is applied: the store is only read.

use crate::{
    core::{
        resource_key, AdmissionTiming, AnnotationExtractor, BackendConfig, Configuration, IngressRef,
        MetricsSink, ResourceStore, RoutingResource, SyntaxChecker, TemplateRenderer,
        DEFAULT_SERVER_NAME, ROOT_LOCATION,
    },
    index::{SharedStore, Store, Synthesizer},
    k8s::{set_default_path_type, MultiClusterIngress, ResourceExt},
    validation::{self, PolicyError},
};
use anyhow::Context;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct Validator {
    store: SharedStore,
    config: ValidatorConfig,
    renderer: Arc<dyn TemplateRenderer + Send + Sync>,
    checker: Arc<dyn SyntaxChecker + Send + Sync>,
    metrics: Arc<dyn MetricsSink + Send + Sync>,
}

#[derive(Clone, Debug, Default)]
pub struct ValidatorConfig {
    /// When set, resources in other namespaces are admitted unchecked.
    pub watch_namespace: Option<String>,
    pub disable_catch_all: bool,

    /// Renders and checks only the candidate rather than the whole candidate
    /// set.
    pub disable_full_validation_test: bool,

    /// The `namespace/name` key of the service behind the default upstream.
    pub default_service: Option<String>,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Rejected(#[from] PolicyError),

    #[error("host \"{host}\" and path \"{path}\" is already defined in multiclusteringress {namespace}/{name}")]
    Conflict {
        host: String,
        path: String,
        namespace: String,
        name: String,
    },

    #[error("failed to render configuration: {0}")]
    Render(anyhow::Error),

    #[error("configuration check failed: {0}")]
    Check(anyhow::Error),
}

/// A synthesized candidate configuration, ready to be rendered.
struct Prepared {
    configuration: Configuration,
    backend_config: BackendConfig,
    tested: usize,
    rendered: usize,
}

// === impl Validator ===

impl Validator {
    pub fn new(
        store: SharedStore,
        config: ValidatorConfig,
        renderer: Arc<dyn TemplateRenderer + Send + Sync>,
        checker: Arc<dyn SyntaxChecker + Send + Sync>,
        metrics: Arc<dyn MetricsSink + Send + Sync>,
    ) -> Self {
        Self {
            store,
            config,
            renderer,
            checker,
            metrics,
        }
    }

    /// Checks whether `candidate` may be admitted. An absent candidate is a
    /// no-op and is always admitted.
    #[instrument(skip_all)]
    pub async fn check(&self, candidate: Option<&MultiClusterIngress>) -> Result<(), CheckError> {
        let started = Instant::now();
        let Some(candidate) = candidate else {
            return Ok(());
        };
        let ingress = resource_key(candidate);

        if candidate.metadata.deletion_timestamp.is_some() {
            debug!(%ingress, "Skipping deleted resource");
            return Ok(());
        }

        if let Some(watched) = self.config.watch_namespace.as_deref() {
            if candidate.namespace().as_deref() != Some(watched) {
                warn!(%ingress, namespace = %watched, "Ignoring resource outside of the watched namespace");
                return Ok(());
            }
        }

        let namespace = candidate.namespace().unwrap_or_default();
        let name = candidate.name_any();
        match self.check_candidate(candidate, started).await {
            Ok(timing) => {
                self.metrics.inc_check_count(&namespace, &name);
                self.metrics.set_admission_metrics(timing);
                info!(%ingress, "Admitted");
                Ok(())
            }
            Err(error) => {
                self.metrics.inc_check_error_count(&namespace, &name);
                info!(%ingress, %error, "Rejected");
                Err(error)
            }
        }
    }

    async fn check_candidate(
        &self,
        candidate: &MultiClusterIngress,
        started: Instant,
    ) -> Result<AdmissionTiming, CheckError> {
        // The store lock is released before the check runs.
        let (prepared, render_duration, test_started) = {
            let store = self.store.read();
            let collect_started = Instant::now();
            let (candidate, resources) = self.collect(&store, candidate)?;
            let test_started = Instant::now();
            let prepared = self.synthesize(&store, candidate, resources)?;
            (prepared, test_started - collect_started, test_started)
        };

        write_auth_files(&prepared.configuration)
            .await
            .map_err(CheckError::Render)?;
        let content = self
            .renderer
            .render(&prepared.backend_config, &prepared.configuration)
            .map_err(CheckError::Render)?;
        self.checker
            .check(&content)
            .await
            .map_err(CheckError::Check)?;

        let finished = Instant::now();
        Ok(AdmissionTiming {
            tested_ingresses: prepared.tested as f64,
            tested_duration: (finished - test_started).as_secs_f64(),
            render_ingresses: prepared.rendered as f64,
            render_duration: render_duration.as_secs_f64(),
            config_size: content.len() as f64,
            roundtrip_duration: (finished - started).as_secs_f64(),
        })
    }

    /// Checks the candidate against the admission policy and lists the
    /// resources that would exist if it were admitted.
    fn collect(
        &self,
        store: &Store,
        candidate: &MultiClusterIngress,
    ) -> Result<(RoutingResource, Vec<RoutingResource>), CheckError> {
        validation::check_policy(
            candidate,
            self.config.disable_catch_all,
            &store.config().annotations_prefix,
            &store.config().backend,
        )?;

        let mut candidate = candidate.clone();
        set_default_path_type(&mut candidate);
        let key = resource_key(&candidate);
        let annotations = store.extract(&candidate);
        let candidate = RoutingResource::new(candidate, annotations);

        let mut resources = store
            .list_routing_resources()
            .into_iter()
            .filter(|r| r.key() != key)
            .collect::<Vec<_>>();
        resources.push(candidate.clone());
        Ok((candidate, resources))
    }

    /// Synthesizes the configuration that would result from admitting the
    /// candidate.
    fn synthesize(
        &self,
        store: &Store,
        candidate: RoutingResource,
        resources: Vec<RoutingResource>,
    ) -> Result<Prepared, CheckError> {
        let mut synthesizer = Synthesizer::new(store);
        if let Some(service) = self.config.default_service.as_deref() {
            synthesizer = synthesizer.with_default_service(service);
        }
        let synthesized = synthesizer.synthesize(&resources);
        check_overlap(&candidate, &synthesized.configuration)?;

        let backend_config = store.backend_config();
        let rendered = resources.len();
        if self.config.disable_full_validation_test {
            return Ok(Prepared {
                configuration: synthesizer.synthesize(&[candidate]).configuration,
                backend_config,
                tested: 1,
                rendered,
            });
        }

        Ok(Prepared {
            configuration: synthesized.configuration,
            backend_config,
            tested: rendered,
            rendered,
        })
    }
}

/// Fails if one of the candidate's host/paths is already served by another
/// resource and neither carries a canary annotation. Canary resources never
/// own locations, so they are never reported as owners.
fn check_overlap(candidate: &RoutingResource, config: &Configuration) -> Result<(), CheckError> {
    let this = candidate.ingress_ref();
    for rule in candidate.mci.spec.rules.iter().flatten() {
        let Some(http) = rule.http.as_ref() else {
            continue;
        };
        let host = match rule.host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ => DEFAULT_SERVER_NAME,
        };

        for path in &http.paths {
            if path.backend.service.is_none() {
                debug!(ingress = %candidate.key(), ?path.path, "Path has no service backend");
                continue;
            }
            let path = match path.path.as_deref() {
                Some(path) if !path.is_empty() => path,
                _ => ROOT_LOCATION,
            };

            let existing = owners(config, host, path);
            if existing.iter().any(|e| same_resource(e, &this)) {
                continue;
            }
            if let Some(conflict) = existing
                .into_iter()
                .find(|e| this.canary.is_none() && e.canary.is_none())
            {
                return Err(CheckError::Conflict {
                    host: host.to_string(),
                    path: path.to_string(),
                    namespace: conflict.namespace.clone(),
                    name: conflict.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Writes the htpasswd files that the configuration's locations reference.
async fn write_auth_files(config: &Configuration) -> anyhow::Result<()> {
    let files = config
        .servers
        .iter()
        .flat_map(|s| s.locations.iter())
        .filter(|l| l.auth.secured && !l.auth.file.is_empty())
        .map(|l| (l.auth.file.as_str(), l.auth.contents.as_slice()))
        .collect::<BTreeMap<_, _>>();
    for (file, contents) in files {
        tokio::fs::write(file, contents)
            .await
            .with_context(|| format!("failed to write authentication file {file}"))?;
    }
    Ok(())
}

/// Lists the resources that own locations at `host` and `path`, ignoring
/// default backends.
fn owners<'c>(config: &'c Configuration, host: &str, path: &str) -> Vec<&'c IngressRef> {
    config
        .servers
        .iter()
        .filter(|s| s.hostname == host)
        .flat_map(|s| s.locations.iter())
        .filter(|l| l.path == path && !l.is_def_backend)
        .filter_map(|l| l.ingress.as_ref())
        .collect()
}

fn same_resource(a: &IngressRef, b: &IngressRef) -> bool {
    a.namespace == b.namespace && a.name == b.name
}
