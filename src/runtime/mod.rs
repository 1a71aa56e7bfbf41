//! # Runtime
//!
//! Controller process wiring.
//!
//! - `initialization.rs` - crypto provider, logging, metrics, probes and client setup
//! - `watch_loop.rs` - the `Bundle` controller and its ConfigMap/Secret triggers
//! - `error_policy.rs` - retry decisions for failed reconciliations

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
