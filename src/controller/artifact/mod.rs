//! # Artifact Resolution
//!
//! Makes a bundle's content available on local disk.
//!
//! Bundles are cached under `<cacheDir>/<name>-<version>/`. Search
//! directories are probed first, then the cache directory, then a pre-built
//! `<name>-<version>.tgz` next to the cache entry. Only a full miss touches
//! the network.
//!
//! ## Module Structure
//!
//! - `extract.rs` - tar+gzip and zip extraction with subpath filtering
//! - `http.rs` - streaming downloads and archive fetches
//! - `helm.rs` - helm repository index lookup and chart dependencies
//! - `git.rs` - shallow clones through the git CLI
//! - `local.rs` - `file://` and bare path sources

pub mod extract;
pub mod git;
pub mod helm;
pub mod http;
pub mod local;

use crate::constants::{DEFAULT_CACHE_DIR, DEFAULT_CACHE_VERSION, DEFAULT_HTTP_TIMEOUT_SECS};
use crate::crd::{Bundle, SourceDescriptor};
use crate::observability::metrics;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unknown download source")]
    UnknownSource,
    #[error("unsupported http file type {0}")]
    UnsupportedFileType(String),
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("invalid source location: {0}")]
    InvalidLocation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl SourceError {
    /// Errors that retrying cannot fix without a spec change
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, SourceError::Transport(_) | SourceError::NotFound(_))
    }
}

/// Local copy of a bundle's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Directory, or a packaged `.tgz` when the cache held an archive
    pub path: PathBuf,
    /// Served from a search directory or the cache without fetching
    pub cache_hit: bool,
    /// Version reported by the source (the chart version for helm)
    pub version: Option<String>,
}

impl ResolvedSource {
    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.path.is_file()
    }
}

/// Cache entry name: `<name>-<version>`.
///
/// The name is the chart name for helm sources and the bundle name
/// otherwise. The version falls back to `latest`. Both parts are reduced to
/// a single path component, so `release/1.0` becomes `release_1.0`.
#[must_use]
pub fn cache_key(bundle: &Bundle) -> String {
    let name = match &bundle.spec.source {
        Some(SourceDescriptor::Helm(helm)) if !helm.chart.is_empty() => helm.chart.as_str(),
        _ => bundle.metadata.name.as_deref().unwrap_or_default(),
    };
    let version = bundle.source_version().unwrap_or(DEFAULT_CACHE_VERSION);
    format!("{}-{}", file_name_part(name), file_name_part(version))
}

fn file_name_part(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Probe search directories and the cache for `key`
#[must_use]
pub fn probe_cache(key: &str, cache_dir: &Path, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in search_dirs.iter().map(PathBuf::as_path).chain([cache_dir]) {
        let candidate = dir.join(key);
        if is_non_empty_dir(&candidate) {
            debug!("Found {} in {}", key, dir.display());
            return Some(candidate);
        }
    }
    for ext in ["tgz", "tar.gz"] {
        let archive = cache_dir.join(format!("{key}.{ext}"));
        if archive.is_file() {
            debug!("Found packaged {}", archive.display());
            return Some(archive);
        }
    }
    None
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}

/// Move a completed `staging` directory to `destination`.
///
/// Returns `false` when another fetch of the same key already populated
/// `destination`; that entry is kept and `staging` is discarded.
async fn commit(staging: tempfile::TempDir, destination: &Path) -> anyhow::Result<bool> {
    if is_non_empty_dir(destination) {
        return Ok(false);
    }
    if destination.is_dir() {
        tokio::fs::remove_dir(destination).await.context(format!(
            "Failed to clear empty cache entry {}",
            destination.display()
        ))?;
    } else if destination.exists() {
        tokio::fs::remove_file(destination).await.context(format!(
            "Failed to clear stale cache entry {}",
            destination.display()
        ))?;
    }
    match tokio::fs::rename(staging.path(), destination).await {
        Ok(()) => Ok(true),
        Err(_) if is_non_empty_dir(destination) => Ok(false),
        Err(e) => Err(e).context(format!(
            "Failed to move {} into the cache",
            destination.display()
        )),
    }
}

/// Resolves bundle sources into the local cache
#[derive(Debug, Clone)]
pub struct SourceResolver {
    cache_dir: PathBuf,
    search_dirs: Vec<PathBuf>,
    git_bin: String,
    client: reqwest::Client,
}

impl SourceResolver {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        search_dirs: Vec<PathBuf>,
        git_bin: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let mut cache_dir = cache_dir.into();
        if cache_dir.as_os_str().is_empty() {
            cache_dir = PathBuf::from(DEFAULT_CACHE_DIR);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            cache_dir,
            search_dirs,
            git_bin: git_bin.into(),
            client,
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Return a local path holding the bundle's content, fetching on a miss
    pub async fn resolve(&self, bundle: &Bundle) -> Result<ResolvedSource, SourceError> {
        let key = cache_key(bundle);
        let span = info_span!("artifact.resolve", artifact.key = %key);

        async {
            if let Some(path) = probe_cache(&key, &self.cache_dir, &self.search_dirs) {
                metrics::increment_cache_hits_total();
                return Ok(ResolvedSource {
                    path,
                    cache_hit: true,
                    version: bundle.source_version().map(str::to_string),
                });
            }

            let source = bundle.spec.source.as_ref().ok_or(SourceError::UnknownSource)?;
            let destination = self.cache_dir.join(&key);
            info!("Downloading {} source into {}", source.type_name(), destination.display());

            // Fetch into a sibling staging directory and rename once complete,
            // so an interrupted fetch never looks like a cache hit.
            tokio::fs::create_dir_all(&self.cache_dir).await.context(format!(
                "Failed to create cache directory: {}",
                self.cache_dir.display()
            ))?;
            let staging = tempfile::Builder::new()
                .prefix(&format!(".{key}-"))
                .tempdir_in(&self.cache_dir)
                .context("Failed to create staging directory")?;

            let version = self.fetch(source, staging.path()).await?;

            let fetched = commit(staging, &destination).await?;
            if !fetched {
                debug!("{} was fetched concurrently, using that copy", key);
            }
            Ok(ResolvedSource {
                path: destination,
                cache_hit: !fetched,
                version: version.or_else(|| bundle.source_version().map(str::to_string)),
            })
        }
        .instrument(span)
        .await
    }

    /// Fetch `source` into `into`, returning the version the source reported
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        into: &Path,
    ) -> Result<Option<String>, SourceError> {
        match source {
            SourceDescriptor::Helm(helm) => {
                let version = helm::fetch_chart(
                    &self.client,
                    &helm.repo,
                    &helm.chart,
                    helm.version.as_deref(),
                    into,
                )
                .await?;
                Ok(Some(version))
            }
            SourceDescriptor::Git(git) => {
                git::fetch_git(
                    &self.git_bin,
                    &git.url,
                    git.revision.as_deref(),
                    git.path.as_deref().unwrap_or_default(),
                    into,
                )
                .await?;
                Ok(None)
            }
            SourceDescriptor::Http(http) => {
                let subpath = http.path.as_deref().unwrap_or_default();
                if let Some(path) = local::local_path(&http.url)? {
                    self.copy_local(path, subpath, into).await?;
                    return Ok(None);
                }
                http::fetch_archive(&self.client, &http.url, subpath, into).await?;
                Ok(None)
            }
            SourceDescriptor::Local(local) => {
                let path = local::local_path(&local.path)?
                    .ok_or_else(|| SourceError::InvalidLocation(local.path.clone()))?;
                self.copy_local(path, "", into).await?;
                Ok(None)
            }
            SourceDescriptor::ObjectStorage(storage) => Err(SourceError::Unsupported(format!(
                "object storage bucket {}",
                storage.bucket
            ))),
        }
    }

    async fn copy_local(&self, path: PathBuf, subpath: &str, into: &Path) -> Result<(), SourceError> {
        if !path.exists() {
            return Err(SourceError::NotFound(format!(
                "local source {} does not exist",
                path.display()
            )));
        }
        let subpath = subpath.to_string();
        let into = into.to_path_buf();
        tokio::task::spawn_blocking(move || local::fetch_local(&path, &subpath, &into))
            .await
            .context("Copy task failed")??;
        Ok(())
    }
}
