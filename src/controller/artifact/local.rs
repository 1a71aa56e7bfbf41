//! # Local Sources
//!
//! Copies bundle content from the controller's own filesystem, for
//! `file://` URLs and bare paths.

use crate::constants::DEFAULT_FILE_MODE;
use crate::controller::artifact::extract::{self, ArchiveKind};
use crate::controller::artifact::SourceError;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Interpret `location` as a local path.
///
/// Returns `Ok(None)` for remote URLs. A `file://` URL with a host other than
/// empty or `localhost` is rejected.
pub fn local_path(location: &str) -> Result<Option<PathBuf>, SourceError> {
    match url::Url::parse(location) {
        Ok(url) if url.scheme() == "file" => {
            match url.host_str() {
                None | Some("" | "localhost") => {}
                Some(host) => {
                    return Err(SourceError::InvalidLocation(format!(
                        "file url {location} must not name a remote host [{host}]"
                    )))
                }
            }
            let path = url.to_file_path().map_err(|()| {
                SourceError::InvalidLocation(format!("invalid file url {location}"))
            })?;
            Ok(Some(path))
        }
        // Single letter schemes are windows drive letters
        Ok(url) if url.scheme().len() > 1 => Ok(None),
        _ => Ok(Some(PathBuf::from(location))),
    }
}

/// Make `source` available under `into`.
///
/// Directories are copied below `subpath`; archive files are extracted.
pub fn fetch_local(source: &Path, subpath: &str, into: &Path) -> Result<()> {
    info!("Copying local source {} into {}", source.display(), into.display());

    if source.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if ArchiveKind::from_file_name(&name).is_some() {
            return extract::extract_file(source, subpath, into);
        }
        return Err(anyhow::anyhow!(
            "local source {} is neither a directory nor a supported archive",
            source.display()
        ));
    }

    copy_tree(source, subpath, into)
}

/// Copy every file under `base/subpath` into `into`, keeping modes
pub fn copy_tree(base: &Path, subpath: &str, into: &Path) -> Result<()> {
    let prefix = Path::new(subpath.trim_start_matches("./").trim_start_matches('/'));
    fs::create_dir_all(into).context(format!("Failed to create directory: {}", into.display()))?;

    let mut copied = 0usize;
    for entry in WalkDir::new(base).follow_links(true) {
        let entry = entry.context(format!("Failed to walk {}", base.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(base)
            .context("walked path outside base directory")?;
        if relative.components().next().is_some_and(|c| c.as_os_str() == ".git") {
            continue;
        }
        let Ok(stripped) = relative.strip_prefix(prefix) else {
            continue;
        };

        let mode = file_mode(entry.path());
        let mut reader = File::open(entry.path())
            .context(format!("Failed to open {}", entry.path().display()))?;
        extract::write_file(&into.join(stripped), &mut reader, mode)?;
        copied += 1;
    }

    debug!("Copied {} files from {}", copied, base.display());
    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(DEFAULT_FILE_MODE)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    DEFAULT_FILE_MODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_parsing() {
        assert_eq!(
            local_path("file:///srv/bundles/app").unwrap(),
            Some(PathBuf::from("/srv/bundles/app"))
        );
        assert_eq!(
            local_path("file://localhost/srv/app").unwrap(),
            Some(PathBuf::from("/srv/app"))
        );
        assert_eq!(
            local_path("./bundles/app").unwrap(),
            Some(PathBuf::from("./bundles/app"))
        );
        assert_eq!(local_path("https://example.com/app.tgz").unwrap(), None);
        assert!(local_path("file://remote-host/srv/app").is_err());
    }

    #[test]
    fn test_copy_tree_filters_by_subpath() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("deploy/base")).unwrap();
        fs::create_dir_all(src.path().join("deployment")).unwrap();
        fs::write(src.path().join("deploy/base/cm.yaml"), "kind: ConfigMap").unwrap();
        fs::write(src.path().join("deployment/other.yaml"), "kind: Secret").unwrap();
        fs::write(src.path().join("README.md"), "readme").unwrap();

        let dest = tempfile::tempdir().unwrap();
        copy_tree(src.path(), "deploy", dest.path()).unwrap();

        assert_eq!(
            fs::read_to_string(dest.path().join("base/cm.yaml")).unwrap(),
            "kind: ConfigMap"
        );
        assert!(!dest.path().join("other.yaml").exists());
        assert!(!dest.path().join("README.md").exists());
    }

    #[test]
    fn test_copy_tree_without_subpath_copies_everything() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.yaml"), "a").unwrap();
        fs::create_dir_all(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/b.yaml"), "b").unwrap();

        let dest = tempfile::tempdir().unwrap();
        copy_tree(src.path(), "", dest.path()).unwrap();

        assert!(dest.path().join("a.yaml").exists());
        assert!(dest.path().join("nested/b.yaml").exists());
    }
}
