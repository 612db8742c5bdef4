use crate::core::{BackendConfig, Configuration, TemplateRenderer};
use anyhow::Result;
use serde::Serialize;

/// Renders configurations as JSON documents.
#[derive(Clone, Debug, Default)]
pub struct JsonRenderer(());

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<'a> {
    backend_config: &'a BackendConfig,
    configuration: &'a Configuration,
}

// === impl JsonRenderer ===

impl TemplateRenderer for JsonRenderer {
    fn render(&self, backend_config: &BackendConfig, configuration: &Configuration) -> Result<Vec<u8>> {
        let doc = Document {
            backend_config,
            configuration,
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }
}
