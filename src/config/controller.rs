//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::controller::apply::SyncOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory fetched bundles are cached in
    pub cache_dir: PathBuf,
    /// Directories probed for `<name>-<version>` before the cache and the network
    pub search_dirs: Vec<PathBuf>,
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Maximum number of bundles reconciled at the same time
    pub max_concurrent_reconciliations: u16,
    /// Write resources with server-side apply instead of merge patches
    pub server_side_apply: bool,
    /// Create the install namespace before writing resources
    pub create_namespace: bool,
    /// Requeue interval while a dependency is missing or not installed (seconds)
    pub dependency_requeue_secs: u64,
    /// Requeue interval after a successful reconciliation (seconds)
    pub reconcile_interval_secs: u64,
    pub helm_bin: String,
    pub kustomize_bin: String,
    pub git_bin: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        use crate::constants::*;
        Self {
            cache_dir: PathBuf::from(var_or_default_str(&lookup, "CACHE_DIR", DEFAULT_CACHE_DIR)),
            search_dirs: lookup("SEARCH_DIRS")
                .map(|dirs| parse_search_dirs(&dirs))
                .unwrap_or_default(),
            metrics_port: var_or_default(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            max_concurrent_reconciliations: var_or_default(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            server_side_apply: var_or_default_bool(&lookup, "SERVER_SIDE_APPLY", true),
            create_namespace: var_or_default_bool(&lookup, "CREATE_NAMESPACE", true),
            dependency_requeue_secs: var_or_default(
                &lookup,
                "DEPENDENCY_REQUEUE_SECS",
                DEFAULT_DEPENDENCY_REQUEUE_SECS,
            ),
            reconcile_interval_secs: var_or_default(
                &lookup,
                "RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            ),
            helm_bin: var_or_default_str(&lookup, "HELM_BIN", "helm"),
            kustomize_bin: var_or_default_str(&lookup, "KUSTOMIZE_BIN", "kustomize"),
            git_bin: var_or_default_str(&lookup, "GIT_BIN", "git"),
            log_level: var_or_default_str(&lookup, "LOG_LEVEL", "INFO"),
            log_format: var_or_default_str(&lookup, "LOG_FORMAT", "text"),
        }
    }

    /// Options passed to every sync
    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            server_side_apply: self.server_side_apply,
            create_namespace: self.create_namespace,
        }
    }

    /// Get dependency requeue duration
    #[must_use]
    pub fn dependency_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_secs)
    }

    /// Get reconcile interval duration
    #[must_use]
    pub fn reconcile_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// Split a comma separated directory list, skipping blanks
fn parse_search_dirs(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Read variable or return default value
fn var_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read variable as boolean or return default
fn var_or_default_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read variable as string or return default
fn var_or_default_str<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}
