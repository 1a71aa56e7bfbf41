//! Bundle Controller Library
//!
//! Installs helm charts, kustomizations and plain manifests described by
//! `Bundle` resources and keeps the cluster converged to them.
//!
//! ## Module Structure
//!
//! - `crd` - the `Bundle` resource
//! - `controller` - fetching, rendering, diffing and syncing bundles
//! - `runtime` - controller process wiring
//! - `cli` - offline `download` and `template` commands
//! - `config`, `constants`, `observability` - ambient concerns

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;

pub use crd::{Bundle, BundleSpec, BundleStatus};
