//! # Helm Charts
//!
//! Locates a chart in a helm repository index, downloads the package and
//! unpacks it. Dependencies declared in `Chart.yaml` that are not vendored
//! under `charts/` are fetched the same way.

use crate::controller::artifact::extract;
use crate::controller::artifact::http::{download_to_file, verify_checksum};
use crate::controller::artifact::local;
use crate::controller::artifact::SourceError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct IndexFile {
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartVersion {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetch `chart` from `repo` and unpack it into `into`.
///
/// Returns the version that was installed.
pub fn fetch_chart<'a>(
    client: &'a reqwest::Client,
    repo: &'a str,
    chart: &'a str,
    version: Option<&'a str>,
    into: &'a Path,
) -> BoxFuture<'a, Result<String, SourceError>> {
    Box::pin(async move {
        if repo.starts_with("oci://") {
            return Err(SourceError::Unsupported(format!(
                "oci chart repository {repo}"
            )));
        }

        let index_raw = read_location(client, &join_location(repo, "index.yaml")).await?;
        let index: IndexFile = serde_yaml::from_slice(&index_raw)
            .context(format!("Failed to parse index.yaml of {repo}"))?;
        let entry = select_version(&index, chart, version).ok_or_else(|| {
            SourceError::NotFound(format!(
                "chart {chart} version {} not found in {repo}",
                version.unwrap_or("latest")
            ))
        })?;
        let package_url = entry.urls.first().ok_or_else(|| {
            SourceError::NotFound(format!("chart {chart} {} has no urls", entry.version))
        })?;
        let package_url = if is_absolute(package_url) {
            package_url.clone()
        } else {
            join_location(repo, package_url)
        };

        info!("Fetching chart {} {} from {}", chart, entry.version, package_url);

        let staging = tempfile::Builder::new()
            .prefix(".chart-")
            .tempdir()
            .context("Failed to create download directory")?;
        let package = match local::local_path(&package_url)? {
            Some(path) => path,
            None => {
                let path = staging.path().join(format!("{chart}-{}.tgz", entry.version));
                download_to_file(client, &package_url, &path).await?;
                path
            }
        };
        if let Some(digest) = entry.digest.as_deref().filter(|d| !d.is_empty()) {
            verify_checksum(&package, digest)?;
        }

        let prefix = format!("{chart}/");
        let destination = into.to_path_buf();
        tokio::task::spawn_blocking(move || extract::extract_file(&package, &prefix, &destination))
            .await
            .context("Extraction task failed")??;

        fetch_missing_dependencies(client, into).await?;
        Ok(entry.version.clone())
    })
}

/// Fetch every dependency declared in `chart_dir/Chart.yaml` that is not
/// present under `charts/`
pub async fn fetch_missing_dependencies(
    client: &reqwest::Client,
    chart_dir: &Path,
) -> Result<(), SourceError> {
    let metadata = load_chart_metadata(chart_dir)?;
    for dep in missing_dependencies(chart_dir, &metadata) {
        let repository = dep.repository.as_deref().unwrap_or_default();
        let target = chart_dir.join("charts").join(&dep.name);
        debug!("Resolving dependency {} of {}", dep.name, metadata.name);

        if repository.is_empty() {
            return Err(SourceError::NotFound(format!(
                "dependency {} of chart {} has no repository and is not vendored",
                dep.name, metadata.name
            )));
        }
        if let Some(relative) = repository.strip_prefix("file://") {
            let source = chart_dir.join(relative);
            let target = target.clone();
            tokio::task::spawn_blocking(move || local::copy_tree(&source, "", &target))
                .await
                .context("Copy task failed")??;
            continue;
        }
        if repository.starts_with('@') || !repository.contains("://") {
            return Err(SourceError::Unsupported(format!(
                "repository alias {repository} for dependency {}",
                dep.name
            )));
        }
        fetch_chart(client, repository, &dep.name, dep.version.as_deref(), &target).await?;
    }
    Ok(())
}

/// Parse `Chart.yaml` in `chart_dir`
pub fn load_chart_metadata(chart_dir: &Path) -> Result<ChartMetadata> {
    let path = chart_dir.join("Chart.yaml");
    let raw = std::fs::read(&path).context(format!("Failed to read {}", path.display()))?;
    serde_yaml::from_slice(&raw).context(format!("Failed to parse {}", path.display()))
}

fn missing_dependencies(chart_dir: &Path, metadata: &ChartMetadata) -> Vec<ChartDependency> {
    let charts = chart_dir.join("charts");
    let packaged: Vec<String> = std::fs::read_dir(&charts)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();

    metadata
        .dependencies
        .iter()
        .filter(|dep| {
            let vendored_dir = charts.join(&dep.name).is_dir();
            let vendored_package = packaged.iter().any(|name| {
                name.starts_with(&format!("{}-", dep.name))
                    && (name.ends_with(".tgz") || name.ends_with(".tar.gz"))
            });
            !vendored_dir && !vendored_package
        })
        .cloned()
        .collect()
}

/// Pick a chart version from the index.
///
/// Without a version the first entry is used since repository indexes list
/// the newest version first. A plain version must match exactly (a leading
/// `v` is ignored). Anything else is a constraint such as `^1.2`, `~3`,
/// `>=1 <2` or `1.x || 2.x`, and the highest matching version wins.
pub fn select_version<'a>(
    index: &'a IndexFile,
    chart: &str,
    version: Option<&str>,
) -> Option<&'a ChartVersion> {
    let versions = index.entries.get(chart)?;
    let Some(wanted) = version.map(str::trim).filter(|v| !v.is_empty()) else {
        return versions.first();
    };
    let normalized = wanted.trim_start_matches('v');
    if let Some(exact) = versions
        .iter()
        .find(|v| v.version.trim_start_matches('v') == normalized)
    {
        return Some(exact);
    }
    if semver::Version::parse(normalized).is_ok() {
        return None;
    }

    let Some(requirements) = parse_constraint(wanted) else {
        warn!("Invalid version constraint {} for chart {}", wanted, chart);
        return None;
    };
    versions
        .iter()
        .filter_map(|entry| {
            semver::Version::parse(entry.version.trim_start_matches('v'))
                .ok()
                .map(|parsed| (parsed, entry))
        })
        .filter(|(parsed, _)| requirements.iter().any(|req| req.matches(parsed)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, entry)| entry)
}

/// Alternatives of a `||` constraint, each with space or comma separated
/// comparators
fn parse_constraint(constraint: &str) -> Option<Vec<semver::VersionReq>> {
    constraint
        .split("||")
        .map(|alternative| {
            let mut comparators = Vec::new();
            let mut pending = String::new();
            for token in alternative.split([' ', ',']).filter(|t| !t.is_empty()) {
                pending.push_str(token);
                // `>= 1.0` splits the operator from its version
                if token.chars().all(|c| matches!(c, '^' | '~' | '>' | '<' | '=')) {
                    continue;
                }
                comparators.push(std::mem::take(&mut pending));
            }
            semver::VersionReq::parse(&comparators.join(", ")).ok()
        })
        .collect()
}

fn is_absolute(location: &str) -> bool {
    url::Url::parse(location).is_ok_and(|u| u.scheme().len() > 1)
}

fn join_location(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches("./")
    )
}

async fn read_location(client: &reqwest::Client, location: &str) -> Result<Vec<u8>, SourceError> {
    if let Some(path) = local::local_path(location)? {
        return Ok(tokio::fs::read(&path)
            .await
            .context(format!("Failed to read {}", path.display()))?);
    }
    let response = client
        .get(location)
        .send()
        .await
        .context(format!("Failed to fetch {location}"))?;
    if !response.status().is_success() {
        return Err(SourceError::Transport(anyhow::anyhow!(
            "Failed to fetch {location}: HTTP {}",
            response.status().as_u16()
        )));
    }
    Ok(response
        .bytes()
        .await
        .context(format!("Failed to read {location}"))?
        .to_vec())
}
