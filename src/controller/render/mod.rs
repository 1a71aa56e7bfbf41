//! # Rendering
//!
//! Turns a resolved bundle source plus its values into a YAML stream of
//! Kubernetes resources.
//!
//! Rendering is opaque to the rest of the controller: each [`BundleKind`]
//! maps to a [`Renderer`] in a [`Renderers`] table built once at startup.
//!
//! ## Module Structure
//!
//! - `helm.rs` - `helm template`
//! - `kustomize.rs` - `kustomize build`
//! - `template.rs` - plain manifests concatenated from the source tree
//! - `manifest.rs` - YAML stream splitting and namespace defaulting

pub mod helm;
pub mod kustomize;
pub mod manifest;
pub mod template;

pub use helm::HelmRenderer;
pub use kustomize::KustomizeRenderer;
pub use manifest::{set_namespace_if_unset, split_yaml};
pub use template::TemplateRenderer;

use crate::config::ControllerConfig;
use crate::controller::artifact::ResolvedSource;
use crate::crd::{Bundle, BundleKind, SourceDescriptor, Values};
use crate::observability::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;

/// Release identity passed to renderers
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Release name, the bundle name
    pub release: &'a str,
    /// Namespace resources are installed into
    pub namespace: &'a str,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render the source at `source` (directory, or packaged chart) with `values`
    async fn render(&self, ctx: RenderContext<'_>, source: &Path, values: &Values) -> Result<String>;
}

/// Renderer per bundle kind
#[derive(Clone)]
pub struct Renderers {
    table: HashMap<BundleKind, Arc<dyn Renderer>>,
}

impl std::fmt::Debug for Renderers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderers")
            .field("kinds", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Renderers {
    /// Table with no renderers registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// The helm, kustomize and template renderers using the configured binaries
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::empty()
            .with(BundleKind::Helm, HelmRenderer::new(&config.helm_bin))
            .with(BundleKind::Kustomize, KustomizeRenderer::new(&config.kustomize_bin))
            .with(BundleKind::Template, TemplateRenderer)
    }

    #[must_use]
    pub fn with(mut self, kind: BundleKind, renderer: impl Renderer + 'static) -> Self {
        self.table.insert(kind, Arc::new(renderer));
        self
    }

    /// Render with the renderer registered for `kind`, recording metrics
    pub async fn render(
        &self,
        kind: BundleKind,
        ctx: RenderContext<'_>,
        source: &Path,
        values: &Values,
    ) -> Result<String> {
        let renderer = self
            .table
            .get(&kind)
            .context(format!("no renderer registered for kind {kind}"))?;

        let start = Instant::now();
        let result = renderer.render(ctx, source, values).await;
        match &result {
            Ok(_) => metrics::observe_render_duration(kind.as_str(), start.elapsed().as_secs_f64()),
            Err(_) => metrics::increment_render_errors_total(kind.as_str()),
        }
        result
    }
}

/// Kind used to render `bundle` from `resolved`.
///
/// An explicit `spec.kind` wins. Helm sources and packaged charts are helm.
/// Otherwise the tree decides: `Chart.yaml` is helm, a kustomization is
/// kustomize and anything else is plain manifests.
#[must_use]
pub fn detect_kind(bundle: &Bundle, resolved: &ResolvedSource) -> BundleKind {
    if let Some(kind) = bundle.spec.kind {
        return kind;
    }
    if matches!(bundle.spec.source, Some(SourceDescriptor::Helm(_))) || resolved.is_archive() {
        return BundleKind::Helm;
    }
    detect_kind_from_dir(&resolved.path)
}

/// Kind of the source tree at `path`
#[must_use]
pub fn detect_kind_from_dir(path: &Path) -> BundleKind {
    if path.join("Chart.yaml").is_file() {
        BundleKind::Helm
    } else if ["kustomization.yaml", "kustomization.yml", "Kustomization"]
        .iter()
        .any(|name| path.join(name).is_file())
    {
        BundleKind::Kustomize
    } else {
        BundleKind::Template
    }
}

/// Run an external renderer and return its stdout
pub(crate) async fn run_tool(tool: &str, cmd: &mut Command) -> Result<String> {
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("Failed to execute {tool}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("{tool} failed: {}", stderr.trim()));
    }
    String::from_utf8(output.stdout).context(format!("{tool} produced non UTF-8 output"))
}
