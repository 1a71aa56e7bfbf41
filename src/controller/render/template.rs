//! # Plain Manifests
//!
//! Bundles that are neither charts nor kustomizations: every `.yaml`,
//! `.yml` and `.json` file in the tree, in path order, joined into one
//! stream.

use crate::controller::render::{RenderContext, Renderer};
use crate::crd::Values;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

#[async_trait]
impl Renderer for TemplateRenderer {
    async fn render(&self, _ctx: RenderContext<'_>, source: &Path, _values: &Values) -> Result<String> {
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || concatenate(&source))
            .await
            .context("Render task failed")?
    }
}

fn concatenate(dir: &Path) -> Result<String> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| is_manifest(path))
        .collect();
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let content = std::fs::read_to_string(&path)
            .context(format!("Failed to read {}", path.display()))?;
        documents.push(content);
    }
    Ok(documents.join("\n---\n"))
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}
