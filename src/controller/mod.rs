//! # Controller
//!
//! Core controller modules for the Bundle Controller.
//!
//! - `artifact`: fetching bundle sources into the local cache
//! - `render`: helm, kustomize and plain manifest rendering
//! - `apply`: diffing rendered resources against the ledger and syncing them
//! - `reconciler`: core reconciliation logic
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `server`: HTTP server for metrics and health checks

pub mod apply;
pub mod artifact;
pub mod backoff;
pub mod reconciler;
pub mod render;
pub mod server;
