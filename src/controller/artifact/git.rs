//! # Git Sources
//!
//! Shallow clones a repository with the `git` CLI and copies the requested
//! subtree out of the working copy. The CLI keeps the build free of
//! libgit2 and OpenSSL.

use crate::controller::artifact::local;
use crate::observability::metrics;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, field, info, info_span, warn, Instrument};

/// Clone `url` at `revision` and copy the files under `subpath` into `into`.
///
/// `revision` may be a branch, a tag or a commit. The remote HEAD is used
/// when it is unset.
pub async fn fetch_git(
    git_bin: &str,
    url: &str,
    revision: Option<&str>,
    subpath: &str,
    into: &Path,
) -> Result<()> {
    let span = info_span!(
        "git.clone",
        git.url = url,
        git.revision = revision.unwrap_or("HEAD"),
        operation.success = field::Empty,
    );
    let start = Instant::now();

    let result = async {
        metrics::increment_git_clone_total();
        let checkout = tempfile::Builder::new()
            .prefix(".git-")
            .tempdir()
            .context("Failed to create clone directory")?;

        clone(git_bin, url, revision, checkout.path()).await?;

        let base = checkout.path().to_path_buf();
        let subpath = subpath.to_string();
        let into = into.to_path_buf();
        tokio::task::spawn_blocking(move || local::copy_tree(&base, &subpath, &into))
            .await
            .context("Copy task failed")??;
        Ok(())
    }
    .instrument(span.clone())
    .await;

    match &result {
        Ok(()) => {
            span.record("operation.success", true);
            metrics::observe_git_clone_duration(start.elapsed().as_secs_f64());
        }
        Err(_) => {
            span.record("operation.success", false);
            metrics::increment_git_clone_errors_total();
        }
    }
    result
}

async fn clone(git_bin: &str, url: &str, revision: Option<&str>, path: &Path) -> Result<()> {
    let Some(revision) = revision.filter(|r| !r.is_empty()) else {
        info!("Cloning {} (remote HEAD)", url);
        return run_git(
            Command::new(git_bin)
                .arg("clone")
                .arg("--depth")
                .arg("1")
                .arg("--single-branch")
                .arg(url)
                .arg(path),
        )
        .await;
    };

    // Branch and tag names work with --branch
    info!("Cloning {} at {}", url, revision);
    let by_ref = run_git(
        Command::new(git_bin)
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--single-branch")
            .arg("--branch")
            .arg(revision)
            .arg(url)
            .arg(path),
    )
    .await;

    let Err(ref_err) = by_ref else {
        return Ok(());
    };

    // Commits cannot be cloned by name, fetch them directly
    debug!("Clone by ref failed ({}), fetching {} as a commit", ref_err, revision);
    if path.exists() {
        tokio::fs::remove_dir_all(path).await.ok();
    }
    tokio::fs::create_dir_all(path)
        .await
        .context(format!("Failed to create {}", path.display()))?;

    run_git(Command::new(git_bin).arg("-C").arg(path).arg("init").arg("--quiet")).await?;
    run_git(
        Command::new(git_bin)
            .arg("-C")
            .arg(path)
            .arg("remote")
            .arg("add")
            .arg("origin")
            .arg(url),
    )
    .await?;
    if let Err(e) = run_git(
        Command::new(git_bin)
            .arg("-C")
            .arg(path)
            .arg("fetch")
            .arg("--depth")
            .arg("1")
            .arg("origin")
            .arg(revision),
    )
    .await
    {
        warn!("Revision {} not found in {}", revision, url);
        return Err(e.context(format!("revision {revision} not found: {ref_err}")));
    }
    run_git(
        Command::new(git_bin)
            .arg("-C")
            .arg(path)
            .arg("checkout")
            .arg("--quiet")
            .arg("FETCH_HEAD"),
    )
    .await
}

async fn run_git(cmd: &mut Command) -> Result<()> {
    let output = cmd
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .context("Failed to execute git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("git failed: {}", stderr.trim()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn test_fetch_git_copies_subpath() {
        if !git_available() {
            return;
        }
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "--quiet", "--initial-branch=main"]);
        fs::create_dir_all(repo.path().join("deploy")).unwrap();
        fs::write(repo.path().join("deploy/cm.yaml"), "kind: ConfigMap").unwrap();
        fs::write(repo.path().join("README.md"), "readme").unwrap();
        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "--quiet", "-m", "init"]);
        git(repo.path(), &["tag", "v1"]);

        let url = format!("file://{}", repo.path().display());
        let out = tempfile::tempdir().unwrap();
        fetch_git("git", &url, Some("v1"), "deploy", out.path())
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(out.path().join("cm.yaml")).unwrap(),
            "kind: ConfigMap"
        );
        assert!(!out.path().join("README.md").exists());
        assert!(!out.path().join(".git").exists());
    }

    #[tokio::test]
    async fn test_fetch_git_unknown_revision_fails() {
        if !git_available() {
            return;
        }
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "--quiet", "--initial-branch=main"]);
        fs::write(repo.path().join("a.yaml"), "a").unwrap();
        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "--quiet", "-m", "init"]);

        let url = format!("file://{}", repo.path().display());
        let out = tempfile::tempdir().unwrap();
        let result = fetch_git("git", &url, Some("no-such-branch"), "", out.path()).await;
        assert!(result.is_err());
    }
}
