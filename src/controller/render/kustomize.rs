//! # Kustomize Rendering
//!
//! Executes `kustomize build` on the resolved source tree. Values are not
//! consumed: overlays carry their own configuration.

use crate::controller::artifact::extract;
use crate::controller::render::{run_tool, RenderContext, Renderer};
use crate::crd::Values;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, field, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    kustomize_bin: String,
}

impl KustomizeRenderer {
    #[must_use]
    pub fn new(kustomize_bin: &str) -> Self {
        Self {
            kustomize_bin: kustomize_bin.to_string(),
        }
    }
}

#[async_trait]
impl Renderer for KustomizeRenderer {
    async fn render(&self, ctx: RenderContext<'_>, source: &Path, _values: &Values) -> Result<String> {
        let span = info_span!(
            "render.kustomize",
            release = ctx.release,
            path = %source.display(),
            operation.success = field::Empty,
        );

        let result = async {
            // A cached archive is unpacked before building
            let unpacked;
            let dir = if source.is_file() {
                unpacked = tempfile::Builder::new()
                    .prefix(".kustomize-")
                    .tempdir()
                    .context("Failed to create build directory")?;
                let archive = source.to_path_buf();
                let into = unpacked.path().to_path_buf();
                tokio::task::spawn_blocking(move || extract::extract_file(&archive, "", &into))
                    .await
                    .context("Extract task failed")??;
                unpacked.path().to_path_buf()
            } else {
                source.to_path_buf()
            };

            debug!("Running kustomize build in {}", dir.display());
            run_tool(
                "kustomize",
                Command::new(&self.kustomize_bin).arg("build").arg(&dir),
            )
            .await
        }
        .instrument(span.clone())
        .await;

        span.record("operation.success", result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_failure_is_reported() {
        let renderer = KustomizeRenderer::new("/nonexistent/kustomize");
        let dir = tempfile::tempdir().unwrap();
        let ctx = RenderContext {
            release: "app",
            namespace: "default",
        };
        let err = renderer
            .render(ctx, dir.path(), &Values::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kustomize"));
    }
}
