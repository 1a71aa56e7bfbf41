//! # Command Line
//!
//! Offline commands working on bundle manifests instead of the cluster.
//!
//! ```bash
//! # Fetch every bundle in a file into the cache
//! bundle-controller -c bundles download redis.yaml
//!
//! # Render a bundle to stdout
//! bundle-controller template redis.yaml
//!
//! # Render a chart or kustomization directory
//! bundle-controller template ./deploy/app
//!
//! # Read bundles from stdin
//! cat bundles.yaml | bundle-controller template -
//! ```

use crate::controller::artifact::{ResolvedSource, SourceResolver};
use crate::controller::reconciler::values::prune_nulls;
use crate::controller::render::{self, detect_kind_from_dir, RenderContext, Renderers};
use crate::crd::{Bundle, BundleSpec, LocalSource, SourceDescriptor};
use anyhow::{Context, Result};
use kube::ResourceExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load bundles from manifest files, directories or `-` for stdin
pub fn load_bundles(paths: &[String]) -> Result<Vec<Bundle>> {
    if paths.len() == 1 && paths[0] == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        return parse_bundles(&content);
    }

    let mut bundles = Vec::new();
    for path in paths {
        let path = Path::new(path);
        if path.is_dir() {
            bundles.push(bundle_from_dir(path)?);
            continue;
        }
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read {}", path.display()))?;
        bundles.extend(parse_bundles(&content)?);
    }
    Ok(bundles)
}

/// Every `Bundle` document in a YAML stream. Other kinds are ignored.
pub fn parse_bundles(content: &str) -> Result<Vec<Bundle>> {
    render::manifest::documents(content)?
        .into_iter()
        .filter(|doc| doc.get("kind").and_then(serde_json::Value::as_str) == Some("Bundle"))
        .map(|doc| serde_json::from_value(doc).context("invalid Bundle"))
        .collect()
}

/// Bundle for a chart, kustomization or manifest directory
pub fn bundle_from_dir(dir: &Path) -> Result<Bundle> {
    let dir = dir
        .canonicalize()
        .context(format!("Failed to resolve {}", dir.display()))?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .context(format!("{} has no directory name", dir.display()))?;
    let mut bundle = Bundle::new(
        &name,
        BundleSpec {
            kind: Some(detect_kind_from_dir(&dir)),
            source: Some(SourceDescriptor::Local(LocalSource {
                path: dir.display().to_string(),
            })),
            ..BundleSpec::default()
        },
    );
    bundle.metadata.namespace = Some("default".to_string());
    Ok(bundle)
}

/// Local directory sources are used in place so edits show up immediately
fn in_place_source(bundle: &Bundle) -> Option<PathBuf> {
    match &bundle.spec.source {
        Some(SourceDescriptor::Local(local)) => {
            let path = PathBuf::from(&local.path);
            path.is_dir().then_some(path)
        }
        _ => None,
    }
}

/// Resolve every bundle into the cache
pub async fn download(resolver: &SourceResolver, bundles: &[Bundle]) -> Result<Vec<ResolvedSource>> {
    let mut resolved = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let source = resolver
            .resolve(bundle)
            .await
            .context(format!("download {}", bundle.name_any()))?;
        info!("{} -> {}", bundle.name_any(), source.path.display());
        resolved.push(source);
    }
    Ok(resolved)
}

/// Render every bundle with its inline values and join the output
pub async fn template(
    resolver: &SourceResolver,
    renderers: &Renderers,
    bundles: &[Bundle],
) -> Result<String> {
    let mut documents = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let name = bundle.name_any();
        if !bundle.spec.values_ref.is_empty() {
            warn!("{}: valuesRef needs a cluster and is ignored", name);
        }
        let mut values = bundle.spec.values.clone();
        prune_nulls(&mut values);

        let resolved = match in_place_source(bundle) {
            Some(path) => ResolvedSource {
                path,
                cache_hit: true,
                version: None,
            },
            None => resolver
                .resolve(bundle)
                .await
                .context(format!("download {name}"))?,
        };
        let kind = render::detect_kind(bundle, &resolved);
        let namespace = bundle.install_namespace();
        let ctx = RenderContext {
            release: &name,
            namespace: &namespace,
        };
        let rendered = renderers
            .render(kind, ctx, &resolved.path, &values)
            .await
            .context(format!("template {name}"))?;
        documents.push(rendered.trim_end().to_string());
    }
    Ok(documents.join("\n---\n") + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BundleKind;
    use crate::controller::render::TemplateRenderer;
    use std::fs;

    #[test]
    fn test_parse_bundles_ignores_other_kinds() {
        let content = r"
apiVersion: v1
kind: ConfigMap
metadata:
  name: not-a-bundle
---
apiVersion: bundle.kubegems.io/v1beta1
kind: Bundle
metadata:
  name: redis
  namespace: cache
spec:
  kind: helm
  source:
    type: helm
    repo: https://charts.example.com
    chart: redis
";
        let bundles = parse_bundles(content).unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].name_any(), "redis");
        assert_eq!(bundles[0].spec.kind, Some(BundleKind::Helm));
    }

    #[test]
    fn test_bundle_from_dir_detects_kind() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("overlay");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("kustomization.yaml"), "resources: []").unwrap();

        let bundle = bundle_from_dir(&dir).unwrap();
        assert_eq!(bundle.name_any(), "overlay");
        assert_eq!(bundle.spec.kind, Some(BundleKind::Kustomize));
        assert!(in_place_source(&bundle).is_some());
    }

    #[tokio::test]
    async fn test_template_renders_directory_in_place() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("manifests");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("cm.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
        )
        .unwrap();

        let cache = tempfile::tempdir().unwrap();
        let resolver = SourceResolver::new(cache.path(), Vec::new(), "git").unwrap();
        let renderers = Renderers::empty().with(BundleKind::Template, TemplateRenderer);
        let bundles = load_bundles(&[dir.display().to_string()]).unwrap();

        let output = template(&resolver, &renderers, &bundles).await.unwrap();
        assert!(output.contains("name: a"));
        // nothing was copied into the cache
        assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
    }
}
