//! # Reconciler
//!
//! Core reconciliation logic for `Bundle` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Lifecycle: add the finalizer, or drive a deleted bundle's ledger to empty
//! 2. Dependency gate: wait until every dependency is `Installed`
//! 3. Resolve values from references and inline values
//! 4. Resolve the source into the local cache
//! 5. Render, split and namespace the resources
//! 6. Diff against the ledger and sync
//! 7. Write the ledger and phase back to status

pub mod dependency;
pub mod lifecycle;
pub mod reconcile;
pub mod status;
pub mod triggers;
pub mod values;

pub use dependency::{BundleLookup, DependencyError, GateError, KubeBundleLookup};
pub use lifecycle::Lifecycle;
pub use reconcile::reconcile;
pub use status::{BundleWriter, KubeBundleWriter};
pub use values::{KubeValuesStore, ValuesError, ValuesStore};

use crate::config::ControllerConfig;
use crate::controller::apply::{KubeObjectStore, ObjectStore};
use crate::controller::artifact::{SourceError, SourceResolver};
use crate::controller::backoff::BackoffState;
use crate::controller::render::Renderers;
use anyhow::Result;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Needs a change to the bundle or its references
    #[error("{0}")]
    Config(String),
    /// A dependency is missing or not installed yet
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    /// Network, clone or decode failure
    #[error("{0:#}")]
    Transport(anyhow::Error),
    /// Per-resource write errors, newline separated
    #[error("{0}")]
    Sync(String),
    /// Bundle status or finalizer update failed
    #[error("{0:#}")]
    Kube(anyhow::Error),
}

impl ReconcilerError {
    /// Metric label
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            ReconcilerError::Config(_) => "config",
            ReconcilerError::Dependency(_) => "dependency",
            ReconcilerError::Transport(_) => "transport",
            ReconcilerError::Sync(_) => "sync",
            ReconcilerError::Kube(_) => "kube",
        }
    }
}

impl From<SourceError> for ReconcilerError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Transport(inner) => ReconcilerError::Transport(inner),
            other if other.is_configuration() => ReconcilerError::Config(other.to_string()),
            other => ReconcilerError::Transport(anyhow::Error::new(other)),
        }
    }
}

impl From<ValuesError> for ReconcilerError {
    fn from(e: ValuesError) -> Self {
        match e {
            ValuesError::Store(inner) => ReconcilerError::Transport(inner),
            other => ReconcilerError::Config(other.to_string()),
        }
    }
}

impl From<GateError> for ReconcilerError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::NotReady(dependency) => ReconcilerError::Dependency(dependency),
            GateError::Lookup(inner) => ReconcilerError::Kube(inner),
        }
    }
}

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub config: ControllerConfig,
    pub resolver: SourceResolver,
    pub renderers: Renderers,
    pub objects: Arc<dyn ObjectStore>,
    pub values: Arc<dyn ValuesStore>,
    pub bundles: Arc<dyn BundleLookup>,
    pub writer: Arc<dyn BundleWriter>,
    // Backoff state per resource (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache_dir", &self.config.cache_dir)
            .field("renderers", &self.renderers)
            .finish_non_exhaustive()
    }
}

/// Cluster access used by the reconciler
#[derive(Clone)]
pub struct Stores {
    pub objects: Arc<dyn ObjectStore>,
    pub values: Arc<dyn ValuesStore>,
    pub bundles: Arc<dyn BundleLookup>,
    pub writer: Arc<dyn BundleWriter>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    /// Kubernetes-backed stores sharing one client
    #[must_use]
    pub fn kube(client: &Client) -> Self {
        Self {
            objects: Arc::new(KubeObjectStore::new(client.clone())),
            values: Arc::new(KubeValuesStore::new(client.clone())),
            bundles: Arc::new(KubeBundleLookup::new(client.clone())),
            writer: Arc::new(KubeBundleWriter::new(client.clone())),
        }
    }
}

impl Reconciler {
    pub fn new(config: ControllerConfig, renderers: Renderers, stores: Stores) -> Result<Self> {
        let resolver = SourceResolver::new(
            config.cache_dir.clone(),
            config.search_dirs.clone(),
            config.git_bin.clone(),
        )?;
        Ok(Self {
            config,
            resolver,
            renderers,
            objects: stores.objects,
            values: stores.values,
            bundles: stores.bundles,
            writer: stores.writer,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Reconciler talking to the cluster behind `client`
    pub fn from_client(client: &Client, config: ControllerConfig) -> Result<Self> {
        let renderers = Renderers::from_config(&config);
        Self::new(config, renderers, Stores::kube(client))
    }

    /// Forget the error backoff of `key` (`namespace/name`)
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_are_classified() {
        let config: ReconcilerError = SourceError::UnknownSource.into();
        assert_eq!(config.class(), "config");
        assert_eq!(config.to_string(), "unknown download source");

        let transport: ReconcilerError =
            SourceError::Transport(anyhow::anyhow!("connection refused")).into();
        assert_eq!(transport.class(), "transport");

        let missing: ReconcilerError = SourceError::NotFound("no such chart".to_string()).into();
        assert_eq!(missing.class(), "transport");
    }

    #[test]
    fn test_gate_errors_are_classified() {
        let not_ready: ReconcilerError = GateError::NotReady(DependencyError {
            namespace: "default".to_string(),
            name: "db".to_string(),
            reason: "not installed".to_string(),
        })
        .into();
        assert_eq!(not_ready.class(), "dependency");
        assert_eq!(not_ready.to_string(), "dependency default/db :not installed");

        let values: ReconcilerError = ValuesError::UnsupportedKind("Pod".to_string()).into();
        assert_eq!(values.class(), "config");
    }
}
