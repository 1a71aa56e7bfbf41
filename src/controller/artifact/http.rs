//! # HTTP Downloads
//!
//! Streams remote archives to disk and unpacks them.

use crate::controller::artifact::extract::{self, ArchiveKind};
use crate::controller::artifact::SourceError;
use crate::observability::metrics;
use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, field, info, info_span, Instrument};

/// Archive format implied by the last path segment of `url`
pub fn archive_kind_for_url(url: &str) -> Result<ArchiveKind, SourceError> {
    let file_name = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_else(|| url.rsplit('/').next().unwrap_or_default().to_string());

    ArchiveKind::from_file_name(&file_name)
        .ok_or(SourceError::UnsupportedFileType(file_name))
}

/// Download `url` into `target`, returning the number of bytes written.
///
/// Partial and empty downloads are rejected and the file removed.
pub async fn download_to_file(client: &reqwest::Client, url: &str, target: &Path) -> Result<u64> {
    let span = info_span!(
        "artifact.download",
        artifact.url = url,
        artifact.size_bytes = field::Empty,
        operation.success = field::Empty,
        operation.duration_ms = field::Empty,
    );
    let start = Instant::now();

    async {
        metrics::increment_artifact_downloads_total();
        info!("Downloading {}", url);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.context(format!(
                "Failed to create parent directory: {}",
                parent.display()
            ))?;
        }

        let response = client.get(url).send().await.map_err(|e| {
            error!("Failed to download {}: {}", url, e);
            metrics::increment_artifact_download_errors_total();
            anyhow::anyhow!("Failed to download {url}: {e}")
        })?;

        if !response.status().is_success() {
            let status = response.status();
            metrics::increment_artifact_download_errors_total();
            return Err(anyhow::anyhow!(
                "Download failed: HTTP {} {} from URL: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                url
            ));
        }

        let expected_size = response.content_length();
        let mut file = tokio::fs::File::create(target)
            .await
            .context(format!("Failed to create file: {}", target.display()))?;

        let mut downloaded_size: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read chunk from download stream")?;
            downloaded_size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .context("Failed to write chunk to file")?;
        }
        file.flush().await.context("Failed to flush download")?;
        drop(file);

        if let Some(expected) = expected_size {
            if downloaded_size != expected {
                let _ = tokio::fs::remove_file(target).await;
                metrics::increment_artifact_download_errors_total();
                return Err(anyhow::anyhow!(
                    "Partial download detected: expected {expected} bytes, got {downloaded_size} bytes"
                ));
            }
        }

        if downloaded_size == 0 {
            let _ = tokio::fs::remove_file(target).await;
            metrics::increment_artifact_download_errors_total();
            return Err(anyhow::anyhow!("Downloaded file from {url} is empty"));
        }

        Ok(downloaded_size)
    }
    .instrument(span.clone())
    .await
    .inspect(|size| {
        span.record("artifact.size_bytes", size);
        span.record("operation.success", true);
        span.record("operation.duration_ms", start.elapsed().as_millis() as u64);
        metrics::observe_artifact_download_duration(start.elapsed().as_secs_f64());
    })
    .inspect_err(|_| {
        span.record("operation.success", false);
    })
}

/// Verify a file starts with the gzip magic bytes
pub fn verify_gzip_format(path: &Path) -> Result<()> {
    use std::io::Read;

    let mut magic = [0u8; 2];
    let mut file = std::fs::File::open(path)
        .context(format!("Failed to open {}", path.display()))?;
    file.read_exact(&mut magic)
        .context(format!("Failed to read {}", path.display()))?;
    if magic != [0x1f, 0x8b] {
        return Err(anyhow::anyhow!(
            "Invalid file format: expected gzip, got magic bytes {:02x}{:02x}",
            magic[0],
            magic[1]
        ));
    }
    Ok(())
}

/// Verify a file's sha256 digest (hex, optionally prefixed with `sha256:`)
pub fn verify_checksum(path: &Path, expected_digest: &str) -> Result<()> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .context("Failed to open downloaded file for checksum verification")?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    let computed = format!("{:x}", hasher.finalize());
    let expected = expected_digest.trim_start_matches("sha256:");

    if !expected.eq_ignore_ascii_case(&computed) {
        return Err(anyhow::anyhow!(
            "Checksum mismatch: expected {expected}, got {computed}"
        ));
    }
    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// Download an archive and extract the entries below `subpath` into `into`
pub async fn fetch_archive(
    client: &reqwest::Client,
    url: &str,
    subpath: &str,
    into: &Path,
) -> Result<(), SourceError> {
    let kind = archive_kind_for_url(url)?;

    let staging = tempfile::Builder::new()
        .prefix(".download-")
        .tempdir()
        .context("Failed to create download directory")?;
    let archive_path = staging.path().join("archive");

    download_to_file(client, url, &archive_path).await?;
    if kind == ArchiveKind::TarGz {
        verify_gzip_format(&archive_path)?;
    }

    let subpath = subpath.to_string();
    let into = into.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path)
            .context(format!("Failed to open {}", archive_path.display()))?;
        extract::extract(file, kind, &subpath, &into)
    })
    .await
    .context("Extraction task failed")??;

    Ok(())
}
