use crate::core::SyntaxChecker;
use anyhow::{bail, Context, Result};
use std::{io::Write, path::PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Checks that rendered configurations are well-formed JSON documents, as
/// produced by [`JsonRenderer`](crate::JsonRenderer).
#[derive(Clone, Debug, Default)]
pub struct JsonChecker(());

/// Checks rendered configurations by running an external command against
/// them.
///
/// The configuration is written to a temporary file, whose path is passed as
/// the command's last argument. The check fails when the command exits
/// unsuccessfully.
#[derive(Clone, Debug)]
pub struct CommandChecker {
    binary: PathBuf,
    args: Vec<String>,
}

// === impl CommandChecker ===

impl CommandChecker {
    pub fn new(binary: impl Into<PathBuf>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            binary: binary.into(),
            args: args.into_iter().collect(),
        }
    }
}

// === impl JsonChecker ===

#[async_trait::async_trait]
impl SyntaxChecker for JsonChecker {
    async fn check(&self, content: &[u8]) -> Result<()> {
        let doc = serde_json::from_slice::<serde_json::Value>(content)
            .context("configuration is not valid JSON")?;
        if !doc.is_object() {
            bail!("configuration must be a JSON object");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyntaxChecker for CommandChecker {
    async fn check(&self, content: &[u8]) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("mci-ingress-")
            .suffix(".conf")
            .tempfile()
            .context("failed to create temporary configuration file")?;
        file.write_all(content)?;
        file.flush()?;

        let output = Command::new(&self.binary)
            .args(&self.args)
            .arg(file.path())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;
        debug!(status = %output.status, binary = %self.binary.display(), "Checked configuration");

        if !output.status.success() {
            bail!(
                "configuration check failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandChecker {
        CommandChecker::new("sh", ["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn passes_the_rendered_file() {
        // `sh -c` binds the trailing file argument to `$0`.
        let checker = sh(r#"grep -q '"servers"' "$0""#);
        checker
            .check(br#"{"servers": []}"#)
            .await
            .expect("check must pass");
    }

    #[tokio::test]
    async fn failures_carry_stderr() {
        let checker = sh("echo 'unexpected end of file' >&2; exit 1");
        let error = checker
            .check(b"server {")
            .await
            .expect_err("check must fail");
        assert!(
            error.to_string().contains("unexpected end of file"),
            "{error}"
        );
    }

    #[tokio::test]
    async fn json_checker_accepts_rendered_configurations() {
        use crate::core::{BackendConfig, Configuration, TemplateRenderer};

        let content = crate::JsonRenderer::default()
            .render(&BackendConfig::default(), &Configuration::default())
            .expect("configuration must render");
        JsonChecker::default()
            .check(&content)
            .await
            .expect("rendered configuration must pass");

        assert!(JsonChecker::default().check(b"server {").await.is_err());
        assert!(JsonChecker::default().check(b"[]").await.is_err());
    }

    #[tokio::test]
    async fn missing_binary() {
        let checker = CommandChecker::new("/nonexistent/checker", Vec::new());
        assert!(checker.check(b"").await.is_err());
    }
}
