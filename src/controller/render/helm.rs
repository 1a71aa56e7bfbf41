//! # Helm Rendering
//!
//! Renders charts client side with `helm template`. Nothing is installed
//! through helm and no release secrets are written; the rendered resources
//! go through the same diff and sync as every other kind.

use crate::controller::render::{run_tool, RenderContext, Renderer};
use crate::crd::Values;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, field, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct HelmRenderer {
    helm_bin: String,
}

impl HelmRenderer {
    #[must_use]
    pub fn new(helm_bin: &str) -> Self {
        Self {
            helm_bin: helm_bin.to_string(),
        }
    }
}

#[async_trait]
impl Renderer for HelmRenderer {
    async fn render(&self, ctx: RenderContext<'_>, source: &Path, values: &Values) -> Result<String> {
        let span = info_span!(
            "render.helm",
            release = ctx.release,
            namespace = ctx.namespace,
            chart = %source.display(),
            operation.success = field::Empty,
        );

        let result = async {
            let values_file = write_values_file(values)?;
            debug!("Running helm template for {}", source.display());
            run_tool(
                "helm",
                Command::new(&self.helm_bin)
                    .arg("template")
                    .arg(ctx.release)
                    .arg(source)
                    .arg("--namespace")
                    .arg(ctx.namespace)
                    .arg("--include-crds")
                    .arg("--values")
                    .arg(values_file.path()),
            )
            .await
        }
        .instrument(span.clone())
        .await;

        span.record("operation.success", result.is_ok());
        result
    }
}

/// Values serialized into a temporary YAML file for `--values`
fn write_values_file(values: &Values) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("values-")
        .suffix(".yaml")
        .tempfile()
        .context("Failed to create values file")?;
    let yaml = serde_yaml::to_string(values).context("Failed to serialize values")?;
    file.write_all(yaml.as_bytes())
        .context("Failed to write values file")?;
    file.flush().context("Failed to write values file")?;
    Ok(file)
}
