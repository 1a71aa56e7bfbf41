//! # Archive Extraction
//!
//! Unpacks tar+gzip and zip archives, keeping only entries below a subpath
//! prefix and writing them relative to a destination directory with the
//! prefix stripped.

use crate::constants::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info_span, warn};

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Detect the archive format from a file name or URL path
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") || lower.ends_with(".gz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

/// Normalized subpath prefix.
///
/// A non-empty prefix always ends with `/` so `deploy` never matches `deployment/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpathPrefix(String);

impl SubpathPrefix {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim().trim_start_matches("./").trim_start_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return Self(String::new());
        }
        if trimmed.ends_with('/') {
            Self(trimmed.to_string())
        } else {
            Self(format!("{trimmed}/"))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strip the prefix from an archive entry name.
    ///
    /// Returns `None` for entries outside the prefix and for the prefix
    /// directory itself.
    #[must_use]
    pub fn strip<'a>(&self, entry: &'a str) -> Option<&'a str> {
        let entry = entry.trim_start_matches("./");
        let rest = entry.strip_prefix(self.0.as_str())?;
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

/// Extract `reader` into `destination`, keeping entries under `prefix`.
///
/// Directories are created with mode `0o755`, files keep their stored mode
/// and fall back to `0o644`. No matching entry leaves an empty destination.
pub fn extract<R: Read>(
    reader: R,
    kind: ArchiveKind,
    prefix: &str,
    destination: &Path,
) -> Result<()> {
    let prefix = SubpathPrefix::new(prefix);
    let span = info_span!(
        "artifact.extract",
        archive.kind = ?kind,
        archive.prefix = prefix.as_str(),
        archive.destination = %destination.display()
    );
    let _guard = span.enter();

    fs::create_dir_all(destination).context(format!(
        "Failed to create extraction directory: {}",
        destination.display()
    ))?;

    let written = match kind {
        ArchiveKind::TarGz => extract_tar_gz(reader, &prefix, destination)?,
        ArchiveKind::Zip => extract_zip(reader, &prefix, destination)?,
    };

    debug!("Extracted {} entries into {}", written, destination.display());
    Ok(())
}

/// Extract an archive file, detecting its format from the file name
pub fn extract_file(archive: &Path, prefix: &str, destination: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = ArchiveKind::from_file_name(&name)
        .ok_or_else(|| anyhow::anyhow!("unsupported archive type {name}"))?;
    let file =
        File::open(archive).context(format!("Failed to open archive: {}", archive.display()))?;
    extract(file, kind, prefix, destination)
}

fn extract_tar_gz<R: Read>(reader: R, prefix: &SubpathPrefix, destination: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut written = 0;

    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let entry_path = entry
            .path()
            .context("Invalid path in tar entry")?
            .to_string_lossy()
            .to_string();
        let entry_type = entry.header().entry_type();

        let Some(relative) = prefix.strip(&entry_path) else {
            continue;
        };
        let Some(target) = safe_join(destination, relative) else {
            warn!("Skipping archive entry outside destination: {}", entry_path);
            continue;
        };

        if entry_type.is_dir() {
            create_dir(&target)?;
        } else if entry_type.is_file() {
            let mode = entry.header().mode().unwrap_or(0) & 0o7777;
            write_file(&target, &mut entry, mode)?;
        } else {
            debug!("Skipping non-regular tar entry {} ({:?})", entry_path, entry_type);
            continue;
        }
        written += 1;
    }

    Ok(written)
}

fn extract_zip<R: Read>(mut reader: R, prefix: &SubpathPrefix, destination: &Path) -> Result<usize> {
    // Zip needs random access to the central directory
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .context("Failed to read zip archive")?;
    let mut archive = zip::ZipArchive::new(Cursor::new(buffer)).context("Invalid zip archive")?;
    let mut written = 0;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .context(format!("Failed to read zip entry {index}"))?;
        let entry_name = file.name().to_string();

        let Some(relative) = prefix.strip(&entry_name) else {
            continue;
        };
        let Some(target) = safe_join(destination, relative) else {
            warn!("Skipping archive entry outside destination: {}", entry_name);
            continue;
        };

        if file.is_dir() {
            create_dir(&target)?;
        } else {
            let mode = file.unix_mode().unwrap_or(0) & 0o7777;
            write_file(&target, &mut file, mode)?;
        }
        written += 1;
    }

    Ok(written)
}

/// Join `relative` onto `base`, refusing absolute paths and `..` components
fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut out = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).context(format!("Failed to create directory: {}", path.display()))?;
    set_mode(path, DEFAULT_DIR_MODE)
}

pub(crate) fn write_file<R: Read>(path: &Path, reader: &mut R, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut out = File::create(path).context(format!("Failed to create file: {}", path.display()))?;
    std::io::copy(reader, &mut out).context(format!("Failed to write file: {}", path.display()))?;
    let mode = if mode == 0 { DEFAULT_FILE_MODE } else { mode };
    set_mode(path, mode)
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .context(format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
