//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `bundle_controller_reconciliations_total` - Total number of reconciliations
//! - `bundle_controller_reconciliation_errors_total` - Total number of reconciliation errors
//! - `bundle_controller_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `bundle_controller_artifact_downloads_total` - Archive and chart downloads
//! - `bundle_controller_artifact_cache_hits_total` - Sources served from the cache
//! - `bundle_controller_git_clone_total` - Git clone operations
//! - `bundle_controller_render_duration_seconds` - Rendering duration by bundle kind
//! - `bundle_controller_resources_applied_total` - Objects created or patched
//! - `bundle_controller_resources_deleted_total` - Objects pruned
//! - `bundle_controller_resources_failed_total` - Per-object write failures
//! - `bundle_controller_dependency_waits_total` - Reconciles deferred on a dependency
//! - `bundle_controller_bundles_managed` - Bundles currently tracked

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bundle_controller_reconciliation_errors_total",
            "Total number of reconciliation errors by error class",
        ),
        &["class"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "bundle_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static ARTIFACT_DOWNLOADS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_artifact_downloads_total",
        "Total number of archive and chart downloads",
    )
    .expect("Failed to create ARTIFACT_DOWNLOADS_TOTAL metric - this should never happen")
});

static ARTIFACT_DOWNLOAD_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_artifact_download_errors_total",
        "Total number of failed downloads",
    )
    .expect("Failed to create ARTIFACT_DOWNLOAD_ERRORS_TOTAL metric - this should never happen")
});

static ARTIFACT_DOWNLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "bundle_controller_artifact_download_duration_seconds",
            "Duration of artifact downloads in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create ARTIFACT_DOWNLOAD_DURATION metric - this should never happen")
});

static CACHE_HITS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_artifact_cache_hits_total",
        "Total number of sources served from search directories or the cache",
    )
    .expect("Failed to create CACHE_HITS_TOTAL metric - this should never happen")
});

static GIT_CLONE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_git_clone_total",
        "Total number of git clone operations",
    )
    .expect("Failed to create GIT_CLONE_TOTAL metric - this should never happen")
});

static GIT_CLONE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "bundle_controller_git_clone_duration_seconds",
            "Duration of git clone operations in seconds",
        )
        .buckets(vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create GIT_CLONE_DURATION metric - this should never happen")
});

static GIT_CLONE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_git_clone_errors_total",
        "Total number of git clone errors",
    )
    .expect("Failed to create GIT_CLONE_ERRORS_TOTAL metric - this should never happen")
});

static RENDER_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "bundle_controller_render_duration_seconds",
            "Duration of rendering in seconds by bundle kind",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RENDER_DURATION metric - this should never happen")
});

static RENDER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bundle_controller_render_errors_total",
            "Total number of rendering errors by bundle kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RENDER_ERRORS_TOTAL metric - this should never happen")
});

static RESOURCES_APPLIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_resources_applied_total",
        "Total number of objects created or patched",
    )
    .expect("Failed to create RESOURCES_APPLIED_TOTAL metric - this should never happen")
});

static RESOURCES_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_resources_deleted_total",
        "Total number of objects removed",
    )
    .expect("Failed to create RESOURCES_DELETED_TOTAL metric - this should never happen")
});

static RESOURCES_FAILED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_resources_failed_total",
        "Total number of failed object writes",
    )
    .expect("Failed to create RESOURCES_FAILED_TOTAL metric - this should never happen")
});

static DEPENDENCY_WAITS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "bundle_controller_dependency_waits_total",
        "Total number of reconciles deferred on an unready dependency",
    )
    .expect("Failed to create DEPENDENCY_WAITS_TOTAL metric - this should never happen")
});

static BUNDLES_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "bundle_controller_bundles_managed",
        "Current number of bundles holding the finalizer",
    )
    .expect("Failed to create BUNDLES_MANAGED metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOADS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOAD_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ARTIFACT_DOWNLOAD_DURATION.clone()))?;
    REGISTRY.register(Box::new(CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GIT_CLONE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GIT_CLONE_DURATION.clone()))?;
    REGISTRY.register(Box::new(GIT_CLONE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RENDER_DURATION.clone()))?;
    REGISTRY.register(Box::new(RENDER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESOURCES_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESOURCES_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESOURCES_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEPENDENCY_WAITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUNDLES_MANAGED.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(class: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[class]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_artifact_downloads_total() {
    ARTIFACT_DOWNLOADS_TOTAL.inc();
}

pub fn increment_artifact_download_errors_total() {
    ARTIFACT_DOWNLOAD_ERRORS_TOTAL.inc();
}

pub fn observe_artifact_download_duration(duration: f64) {
    ARTIFACT_DOWNLOAD_DURATION.observe(duration);
}

pub fn increment_cache_hits_total() {
    CACHE_HITS_TOTAL.inc();
}

pub fn increment_git_clone_total() {
    GIT_CLONE_TOTAL.inc();
}

pub fn observe_git_clone_duration(duration: f64) {
    GIT_CLONE_DURATION.observe(duration);
}

pub fn increment_git_clone_errors_total() {
    GIT_CLONE_ERRORS_TOTAL.inc();
}

pub fn observe_render_duration(kind: &str, duration: f64) {
    RENDER_DURATION.with_label_values(&[kind]).observe(duration);
}

pub fn increment_render_errors_total(kind: &str) {
    RENDER_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_resources_applied(count: usize) {
    RESOURCES_APPLIED_TOTAL.inc_by(count as u64);
}

pub fn increment_resources_deleted(count: usize) {
    RESOURCES_DELETED_TOTAL.inc_by(count as u64);
}

pub fn increment_resources_failed(count: usize) {
    RESOURCES_FAILED_TOTAL.inc_by(count as u64);
}

pub fn increment_dependency_waits() {
    DEPENDENCY_WAITS_TOTAL.inc();
}

pub fn increment_bundles_managed() {
    BUNDLES_MANAGED.inc();
}

pub fn decrement_bundles_managed() {
    BUNDLES_MANAGED.dec();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // Registry is process-wide; a second registration in the same test
        // binary reports duplicates, which is fine
        let _ = register_metrics();
        let families = REGISTRY.gather();
        assert!(families
            .iter()
            .any(|f| f.name() == "bundle_controller_reconciliations_total"));
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        assert_eq!(RECONCILIATIONS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_reconciliation_errors_by_class() {
        let before = RECONCILIATION_ERRORS_TOTAL.with_label_values(&["dependency"]).get();
        increment_reconciliation_errors("dependency");
        let after = RECONCILIATION_ERRORS_TOTAL.with_label_values(&["dependency"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_resource_counters() {
        let applied = RESOURCES_APPLIED_TOTAL.get();
        let deleted = RESOURCES_DELETED_TOTAL.get();
        increment_resources_applied(3);
        increment_resources_deleted(2);
        assert_eq!(RESOURCES_APPLIED_TOTAL.get(), applied + 3);
        assert_eq!(RESOURCES_DELETED_TOTAL.get(), deleted + 2);
    }

    #[test]
    fn test_render_duration_by_kind() {
        observe_render_duration("helm", 0.4);
        assert!(RENDER_DURATION.with_label_values(&["helm"]).get_sample_count() >= 1);
    }

    #[test]
    fn test_increment_git_clone_errors_total() {
        let before = GIT_CLONE_ERRORS_TOTAL.get();
        increment_git_clone_errors_total();
        assert_eq!(GIT_CLONE_ERRORS_TOTAL.get(), before + 1u64);
    }
}
