//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Default directory downloaded bundles are cached in
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Version used in the cache key when the source declares none
pub const DEFAULT_CACHE_VERSION: &str = "latest";

/// Finalizer guarding removal of managed resources
pub const FINALIZER_NAME: &str = "bundle.kubegems.io/finalizer";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "bundler";

/// Default number of bundles reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 5;

/// Default requeue interval while a dependency is not ready (seconds)
pub const DEFAULT_DEPENDENCY_REQUEUE_SECS: u64 = 30;

/// Default interval between successful reconciliations (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 600;

/// Fibonacci error backoff bounds (minutes)
pub const DEFAULT_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_MINUTES: u64 = 10;

/// Timeout for a single archive or index download (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Directory mode used when extracting archives
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// File mode used when an archive entry carries none
pub const DEFAULT_FILE_MODE: u32 = 0o644;
