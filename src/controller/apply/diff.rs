//! # Resource Diff
//!
//! Splits a freshly rendered resource set against the ledger of what a
//! bundle already owns.

use crate::crd::{ManagedResource, ResourceKey};
use kube::api::DynamicObject;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// Rendered, not in the ledger
    pub to_create: Vec<DynamicObject>,
    /// Rendered and already in the ledger
    pub to_apply: Vec<DynamicObject>,
    /// In the ledger, no longer rendered. Identity only.
    pub to_remove: Vec<DynamicObject>,
}

impl DiffResult {
    /// Whether the set of owned resources changes
    #[must_use]
    pub fn changes_membership(&self) -> bool {
        !self.to_create.is_empty() || !self.to_remove.is_empty()
    }
}

/// Compare `ledger` with `rendered`.
///
/// A rendered identity seen twice is created once and applied the second time.
#[must_use]
pub fn diff(ledger: &[ManagedResource], rendered: Vec<DynamicObject>) -> DiffResult {
    let mut seen: HashMap<ResourceKey, bool> =
        ledger.iter().map(|entry| (entry.key(), false)).collect();
    let mut result = DiffResult::default();

    for obj in rendered {
        let key = ResourceKey::from_object(&obj);
        match seen.insert(key, true) {
            None => result.to_create.push(obj),
            Some(_) => result.to_apply.push(obj),
        }
    }

    for entry in ledger {
        if seen.insert(entry.key(), true) == Some(false) {
            result.to_remove.push(entry.to_object_ref());
        }
    }
    result
}
