//! # Artifact Tests
//!
//! Resolving bundle sources into the cache: helm repositories on disk,
//! archives served over HTTP and local archive files.

mod common;

use axum::routing::get;
use axum::Router;
use bundle_controller::controller::artifact::{SourceError, SourceResolver};
use bundle_controller::controller::render::detect_kind;
use bundle_controller::crd::{
    Bundle, BundleKind, BundleSpec, HelmSource, HttpSource, LocalSource, SourceDescriptor,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, content) in entries {
        writer.start_file(*path, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn bundle(name: &str, source: SourceDescriptor) -> Bundle {
    let mut bundle = Bundle::new(
        name,
        BundleSpec {
            source: Some(source),
            ..BundleSpec::default()
        },
    );
    bundle.metadata.namespace = Some("default".to_string());
    bundle
}

fn chart_package(version: &str) -> Vec<u8> {
    let chart_yaml = format!("apiVersion: v2\nname: redis\nversion: {version}\n");
    tar_gz(&[
        ("redis/Chart.yaml", chart_yaml.as_str()),
        (
            "redis/templates/cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ .Release.Name }}\n",
        ),
        ("redis/values.yaml", "replicas: 1\n"),
    ])
}

/// Helm repository laid out on disk with versions 1.1.0 (newest) and 1.0.0
fn helm_repository(dir: &Path, digest_override: Option<&str>) {
    let newest = chart_package("1.1.0");
    let older = chart_package("1.0.0");
    let digest = digest_override
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:x}", Sha256::digest(&newest)));
    std::fs::write(dir.join("redis-1.1.0.tgz"), &newest).unwrap();
    std::fs::write(dir.join("redis-1.0.0.tgz"), &older).unwrap();
    std::fs::write(
        dir.join("index.yaml"),
        format!(
            "apiVersion: v1\nentries:\n  redis:\n    - name: redis\n      version: 1.1.0\n      digest: \"{digest}\"\n      urls:\n        - redis-1.1.0.tgz\n    - name: redis\n      version: 1.0.0\n      urls:\n        - ./redis-1.0.0.tgz\n"
        ),
    )
    .unwrap();
}

fn helm_source(repo: &Path, version: Option<&str>) -> SourceDescriptor {
    SourceDescriptor::Helm(HelmSource {
        repo: format!("file://{}", repo.display()),
        chart: "redis".to_string(),
        version: version.map(str::to_string),
    })
}

#[tokio::test]
async fn test_helm_chart_from_repository() {
    let repo = tempfile::tempdir().unwrap();
    helm_repository(repo.path(), None);
    let cache = tempfile::tempdir().unwrap();
    let resolver = SourceResolver::new(cache.path(), Vec::new(), "git").unwrap();

    let latest = bundle("my-redis", helm_source(repo.path(), None));
    let resolved = resolver.resolve(&latest).await.unwrap();
    assert!(!resolved.cache_hit);
    assert_eq!(resolved.version.as_deref(), Some("1.1.0"));
    assert_eq!(resolved.path, cache.path().join("redis-latest"));
    assert!(resolved.path.join("templates/cm.yaml").is_file());
    assert_eq!(detect_kind(&latest, &resolved), BundleKind::Helm);

    let pinned = bundle("my-redis", helm_source(repo.path(), Some("v1.0.0")));
    let resolved = resolver.resolve(&pinned).await.unwrap();
    assert_eq!(resolved.version.as_deref(), Some("1.0.0"));
    let chart = std::fs::read_to_string(resolved.path.join("Chart.yaml")).unwrap();
    assert!(chart.contains("version: 1.0.0"));

    let missing = bundle("my-redis", helm_source(repo.path(), Some("9.9.9")));
    let err = resolver.resolve(&missing).await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)));
    assert!(err.to_string().contains("version 9.9.9 not found"));
}

#[tokio::test]
async fn test_helm_digest_mismatch_leaves_no_cache_entry() {
    let repo = tempfile::tempdir().unwrap();
    helm_repository(repo.path(), Some(&"0".repeat(64)));
    let cache = tempfile::tempdir().unwrap();
    let resolver = SourceResolver::new(cache.path(), Vec::new(), "git").unwrap();

    let result = resolver
        .resolve(&bundle("my-redis", helm_source(repo.path(), None)))
        .await;
    assert!(result.is_err());
    assert!(!cache.path().join("redis-latest").exists());
}

#[tokio::test]
async fn test_http_archive_with_subpath_then_cache_hit() {
    common::init_rustls();
    let archive = tar_gz(&[
        ("app-main/README.md", "docs\n"),
        ("app-main/deploy/cm.yaml", "apiVersion: v1\nkind: ConfigMap\n"),
        ("app-main/deploy/base/svc.yaml", "apiVersion: v1\nkind: Service\n"),
        ("app-main/deployment/other.yaml", "kind: Other\n"),
    ]);
    let app = Router::new().route(
        "/app.tar.gz",
        get(move || {
            let body = archive.clone();
            async move { body }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let cache = tempfile::tempdir().unwrap();
    let resolver = SourceResolver::new(cache.path(), Vec::new(), "git").unwrap();
    let app_bundle = bundle(
        "app",
        SourceDescriptor::Http(HttpSource {
            url: format!("http://{addr}/app.tar.gz"),
            path: Some("app-main/deploy".to_string()),
        }),
    );

    let resolved = resolver.resolve(&app_bundle).await.unwrap();
    assert!(!resolved.cache_hit);
    assert!(resolved.path.join("cm.yaml").is_file());
    assert!(resolved.path.join("base/svc.yaml").is_file());
    assert!(!resolved.path.join("other.yaml").exists());
    assert!(!resolved.path.join("README.md").exists());

    let missing = bundle(
        "missing",
        SourceDescriptor::Http(HttpSource {
            url: format!("http://{addr}/missing.tgz"),
            path: None,
        }),
    );
    let err = resolver.resolve(&missing).await.unwrap_err();
    assert!(matches!(err, SourceError::Transport(_)));
    assert!(!cache.path().join("missing-latest").exists());

    // served from the cache once the server is gone
    server.abort();
    let again = resolver.resolve(&app_bundle).await.unwrap();
    assert!(again.cache_hit);
    assert_eq!(again.path, resolved.path);
}

#[tokio::test]
async fn test_local_zip_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("manifests.zip");
    std::fs::write(
        &archive,
        zip(&[
            ("cm.yaml", "apiVersion: v1\nkind: ConfigMap\n"),
            ("nested/secret.yaml", "apiVersion: v1\nkind: Secret\n"),
        ]),
    )
    .unwrap();

    let cache = tempfile::tempdir().unwrap();
    let resolver = SourceResolver::new(cache.path(), Vec::new(), "git").unwrap();
    let manifests = bundle(
        "manifests",
        SourceDescriptor::Local(LocalSource {
            path: archive.display().to_string(),
        }),
    );

    let resolved = resolver.resolve(&manifests).await.unwrap();
    assert!(resolved.path.join("cm.yaml").is_file());
    assert!(resolved.path.join("nested/secret.yaml").is_file());
    assert_eq!(detect_kind(&manifests, &resolved), BundleKind::Template);
}
