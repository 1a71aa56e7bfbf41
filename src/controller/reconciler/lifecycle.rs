//! # Lifecycle
//!
//! Where a bundle stands with respect to deletion.
//!
//! ```text
//! Active --(deletion marker)--> Terminating --(ledger empty, phase terminal)--> Removed
//! ```
//!
//! The finalizer is held from the first reconcile until `Removed`.

use crate::constants::FINALIZER_NAME;
use crate::crd::Bundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Converge the cluster to the rendered resources
    Active,
    /// Drive the ledger to empty
    Terminating,
    /// Nothing left to remove, release the finalizer
    Removed,
}

impl Lifecycle {
    #[must_use]
    pub fn of(bundle: &Bundle) -> Self {
        if bundle.metadata.deletion_timestamp.is_none() {
            return Lifecycle::Active;
        }
        if bundle.ledger().is_empty() && bundle.phase().is_terminal() {
            Lifecycle::Removed
        } else {
            Lifecycle::Terminating
        }
    }
}

#[must_use]
pub fn has_finalizer(bundle: &Bundle) -> bool {
    bundle
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER_NAME))
}

/// Finalizer list with ours added, `None` when already present
#[must_use]
pub fn with_finalizer(bundle: &Bundle) -> Option<Vec<String>> {
    if has_finalizer(bundle) {
        return None;
    }
    let mut finalizers = bundle.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER_NAME.to_string());
    Some(finalizers)
}

/// Finalizer list with ours removed
#[must_use]
pub fn without_finalizer(bundle: &Bundle) -> Vec<String> {
    bundle
        .metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|name| *name != FINALIZER_NAME)
        .cloned()
        .collect()
}
