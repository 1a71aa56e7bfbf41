//! # Sync
//!
//! Writes a [`DiffResult`] to the cluster and returns the new ledger.
//!
//! Writes never stop at the first failure. Every error is collected and the
//! ledger always reflects what is known to exist:
//!
//! - a create joins the ledger only once it succeeded
//! - an apply targets a tracked object and stays in the ledger either way
//! - a failed delete keeps its entry so the next pass retries it
//! - an identity rendered twice is recorded once

use crate::controller::apply::diff::DiffResult;
use crate::controller::apply::store::ObjectStore;
use crate::controller::apply::SyncOptions;
use crate::crd::{ManagedResource, ResourceKey};
use crate::observability::metrics;
use kube::api::DynamicObject;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, field, info, info_span, Instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub ledger: Vec<ManagedResource>,
    /// Per-resource errors joined with newlines
    pub error: Option<String>,
}

/// Apply `diff` through `store`
pub async fn sync(store: &dyn ObjectStore, diff: DiffResult, options: SyncOptions) -> SyncOutcome {
    let span = info_span!(
        "apply.sync",
        sync.creates = diff.to_create.len(),
        sync.applies = diff.to_apply.len(),
        sync.removes = diff.to_remove.len(),
        operation.success = field::Empty,
    );

    let outcome = run(store, diff, options).instrument(span.clone()).await;
    span.record("operation.success", outcome.error.is_none());
    outcome
}

/// Ledger under construction, one entry per identity
#[derive(Default)]
struct Ledger {
    entries: Vec<ManagedResource>,
    index: HashMap<ResourceKey, usize>,
}

impl Ledger {
    /// Record `key`. A repeated identity keeps its first position and the
    /// latest error.
    fn record(&mut self, key: ResourceKey, error: Option<String>) {
        if let Some(&at) = self.index.get(&key) {
            if error.is_some() {
                self.entries[at].error = error;
            }
            return;
        }
        let mut entry = key.to_managed();
        entry.error = error;
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
    }
}

async fn run(store: &dyn ObjectStore, diff: DiffResult, options: SyncOptions) -> SyncOutcome {
    let mut ledger = Ledger::default();
    let mut errors = Vec::new();
    let mut written = 0usize;
    let mut deleted = 0usize;

    if options.create_namespace {
        let namespaces: BTreeSet<&str> = diff
            .to_create
            .iter()
            .chain(&diff.to_apply)
            .filter_map(|obj| obj.metadata.namespace.as_deref())
            .filter(|ns| !ns.is_empty())
            .collect();
        for namespace in namespaces {
            // A missing namespace surfaces again as a write error below
            if let Err(e) = store.ensure_namespace(namespace).await {
                debug!("Failed to ensure namespace {}: {:#}", namespace, e);
            }
        }
    }

    for mut obj in diff.to_create {
        let key = ResourceKey::from_object(&obj);
        info!("Creating {}", key);
        match write(store, &mut obj, options).await {
            Ok(()) => {
                written += 1;
                ledger.record(key, None);
            }
            Err(e) => {
                let message = format!("{key}: {e:#}");
                error!("Failed to create {}", message);
                errors.push(message);
            }
        }
    }

    for mut obj in diff.to_apply {
        let key = ResourceKey::from_object(&obj);
        info!("Applying {}", key);
        match write(store, &mut obj, options).await {
            Ok(()) => {
                written += 1;
                ledger.record(key, None);
            }
            Err(e) => {
                let message = format!("{key}: {e:#}");
                error!("Failed to apply {}", message);
                errors.push(message);
                ledger.record(key, Some(format!("{e:#}")));
            }
        }
    }

    for obj in diff.to_remove {
        let key = ResourceKey::from_object(&obj);
        info!("Deleting {}", key);
        match store.delete(&obj).await {
            Ok(true) => deleted += 1,
            Ok(false) => debug!("{} already gone", key),
            Err(e) => {
                let message = format!("{key}: {e:#}");
                error!("Failed to delete {}", message);
                errors.push(message);
                ledger.record(key, Some(format!("{e:#}")));
            }
        }
    }

    metrics::increment_resources_applied(written);
    metrics::increment_resources_deleted(deleted);
    metrics::increment_resources_failed(errors.len());

    SyncOutcome {
        ledger: ledger.entries,
        error: (!errors.is_empty()).then(|| errors.join("\n")),
    }
}

/// Get, then create when absent or patch when present
async fn write(
    store: &dyn ObjectStore,
    obj: &mut DynamicObject,
    options: SyncOptions,
) -> anyhow::Result<()> {
    if store.get(obj).await?.is_none() {
        return store.create(obj).await;
    }
    if options.server_side_apply {
        obj.metadata.managed_fields = None;
    }
    store.patch(obj, options.server_side_apply).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::apply::diff::diff;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<ResourceKey, DynamicObject>>,
        fail_create: HashSet<String>,
        fail_delete: HashSet<String>,
        namespaces: Mutex<Vec<String>>,
        patches: Mutex<Vec<(String, bool, bool)>>,
    }

    fn name_of(obj: &DynamicObject) -> String {
        obj.metadata.name.clone().unwrap_or_default()
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get(&self, obj: &DynamicObject) -> anyhow::Result<Option<DynamicObject>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .get(&ResourceKey::from_object(obj))
                .cloned())
        }
        async fn create(&self, obj: &DynamicObject) -> anyhow::Result<()> {
            if self.fail_create.contains(&name_of(obj)) {
                anyhow::bail!("admission webhook denied the request");
            }
            self.objects
                .lock()
                .unwrap()
                .insert(ResourceKey::from_object(obj), obj.clone());
            Ok(())
        }
        async fn patch(&self, obj: &DynamicObject, server_side_apply: bool) -> anyhow::Result<()> {
            self.patches.lock().unwrap().push((
                name_of(obj),
                server_side_apply,
                obj.metadata.managed_fields.is_some(),
            ));
            self.objects
                .lock()
                .unwrap()
                .insert(ResourceKey::from_object(obj), obj.clone());
            Ok(())
        }
        async fn delete(&self, obj: &DynamicObject) -> anyhow::Result<bool> {
            if self.fail_delete.contains(&name_of(obj)) {
                anyhow::bail!("forbidden");
            }
            Ok(self
                .objects
                .lock()
                .unwrap()
                .remove(&ResourceKey::from_object(obj))
                .is_some())
        }
        async fn ensure_namespace(&self, name: &str) -> anyhow::Result<()> {
            self.namespaces.lock().unwrap().push(name.to_string());
            Ok(())
        }
        async fn is_namespaced(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn config_map(name: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": "apps",
                "managedFields": [{"manager": "kubectl"}]
            }
        }))
        .unwrap()
    }

    fn names(ledger: &[ManagedResource]) -> Vec<&str> {
        ledger.iter().map(|e| e.name.as_str()).collect()
    }

    const SSA: SyncOptions = SyncOptions {
        server_side_apply: true,
        create_namespace: true,
    };

    #[tokio::test]
    async fn test_partial_create_failure() {
        let store = MemoryStore {
            fail_create: HashSet::from(["y".to_string()]),
            ..MemoryStore::default()
        };
        let outcome = sync(&store, diff(&[], vec![config_map("x"), config_map("y")]), SSA).await;

        assert_eq!(names(&outcome.ledger), vec!["x"]);
        let error = outcome.error.unwrap();
        assert!(error.contains("ConfigMap apps/y"));
        assert!(!error.contains("apps/x"));
        assert_eq!(*store.namespaces.lock().unwrap(), vec!["apps".to_string()]);
    }

    #[tokio::test]
    async fn test_existing_object_is_patched_with_cleared_managed_fields() {
        let store = MemoryStore::default();
        store.create(&config_map("x")).await.unwrap();

        let outcome = sync(&store, diff(&[], vec![config_map("x")]), SSA).await;
        assert_eq!(outcome.error, None);
        assert_eq!(names(&outcome.ledger), vec!["x"]);
        assert_eq!(
            *store.patches.lock().unwrap(),
            vec![("x".to_string(), true, false)]
        );
    }

    #[tokio::test]
    async fn test_failed_delete_is_kept_and_missing_is_success() {
        let store = MemoryStore {
            fail_delete: HashSet::from(["stuck".to_string()]),
            ..MemoryStore::default()
        };
        store.create(&config_map("stuck")).await.unwrap();
        let ledger: Vec<ManagedResource> = ["stuck", "gone"]
            .iter()
            .map(|n| ResourceKey::from_object(&config_map(n)).to_managed())
            .collect();

        let outcome = sync(&store, diff(&ledger, vec![]), SSA).await;

        assert_eq!(names(&outcome.ledger), vec!["stuck"]);
        assert_eq!(outcome.ledger[0].error.as_deref(), Some("forbidden"));
        assert_eq!(outcome.error.unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_second_sync_converges() {
        let store = MemoryStore::default();
        let rendered = vec![config_map("a"), config_map("b")];
        let options = SyncOptions {
            server_side_apply: false,
            create_namespace: false,
        };

        let first = sync(&store, diff(&[], rendered.clone()), options).await;
        let second = sync(&store, diff(&first.ledger, rendered), options).await;

        assert_eq!(first.ledger, second.ledger);
        assert_eq!(second.error, None);
        assert!(store.namespaces.lock().unwrap().is_empty());
        assert!(store.patches.lock().unwrap().iter().all(|(_, ssa, _)| !ssa));
    }

    #[tokio::test]
    async fn test_identity_rendered_twice_is_recorded_once() {
        let store = MemoryStore::default();
        let rendered = vec![config_map("a"), config_map("b"), config_map("a")];

        let outcome = sync(&store, diff(&[], rendered), SSA).await;
        assert_eq!(outcome.error, None);
        assert_eq!(names(&outcome.ledger), vec!["a", "b"]);
        assert_eq!(store.objects.lock().unwrap().len(), 2);
    }
}
