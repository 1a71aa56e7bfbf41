//! # Status
//!
//! Writes finalizers and status back to the `Bundle`.
//!
//! Status is written as a JSON merge patch. A merge patch only touches the
//! keys it names, so fields that were cleared are sent as explicit nulls and
//! the values snapshot carries a null for every key that disappeared.

use crate::crd::{Bundle, BundleStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Map, Value};

/// Write access to bundles
#[async_trait]
pub trait BundleWriter: Send + Sync {
    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: &[String]) -> Result<()>;
    /// Apply a merge patch to the status subresource
    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeBundleWriter {
    client: Client,
}

impl std::fmt::Debug for KubeBundleWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBundleWriter").finish_non_exhaustive()
    }
}

impl KubeBundleWriter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BundleWriter for KubeBundleWriter {
    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: &[String]) -> Result<()> {
        let api: Api<Bundle> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .context(format!("Failed to update finalizers of {namespace}/{name}"))?;
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let api: Api<Bundle> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .context(format!("Failed to update status of {namespace}/{name}"))?;
        Ok(())
    }
}

/// Whether `desired` differs from what is recorded
#[must_use]
pub fn should_patch_status(current: Option<&BundleStatus>, desired: &BundleStatus) -> bool {
    match current {
        None => true,
        Some(current) => serde_json::to_value(current).ok() != serde_json::to_value(desired).ok(),
    }
}

/// Merge patch turning `current` into `desired`
#[must_use]
pub fn status_patch(current: Option<&BundleStatus>, desired: &BundleStatus) -> Value {
    let empty = Map::new();
    let current_values = current.map_or(&empty, |s| &s.values);
    json!({
        "status": {
            "phase": desired.phase,
            "message": desired.message,
            "values": values_patch(current_values, &desired.values),
            "version": desired.version,
            "namespace": desired.namespace,
            "creationTimestamp": desired.creation_timestamp,
            "upgradeTimestamp": desired.upgrade_timestamp,
            "resources": desired.resources,
        }
    })
}

/// `desired` plus a null for every key of `current` it no longer has
fn values_patch(current: &Map<String, Value>, desired: &Map<String, Value>) -> Value {
    let mut patch = Map::new();
    for key in current.keys() {
        if !desired.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in desired {
        let merged = match (current.get(key), value) {
            (Some(Value::Object(old)), Value::Object(new)) => values_patch(old, new),
            _ => value.clone(),
        };
        patch.insert(key.clone(), merged);
    }
    Value::Object(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ManagedResource, Phase};

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_patch_clears_removed_fields() {
        let current = BundleStatus {
            phase: Phase::Failed,
            message: "boom".to_string(),
            values: values(json!({"a": 1, "nested": {"keep": 1, "drop": 2}})),
            resources: vec![ManagedResource {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
                namespace: "default".to_string(),
                name: "a".to_string(),
                error: None,
            }],
            ..BundleStatus::default()
        };
        let desired = BundleStatus {
            phase: Phase::Installed,
            values: values(json!({"nested": {"keep": 3}})),
            ..BundleStatus::default()
        };

        let patch = status_patch(Some(&current), &desired);
        let status = &patch["status"];
        assert_eq!(status["phase"], "Installed");
        assert_eq!(status["message"], "");
        assert_eq!(status["values"], json!({"a": null, "nested": {"drop": null, "keep": 3}}));
        assert_eq!(status["resources"], json!([]));
        assert_eq!(status["version"], Value::Null);
    }

    #[test]
    fn test_should_patch_only_on_change() {
        let status = BundleStatus {
            phase: Phase::Installed,
            ..BundleStatus::default()
        };
        assert!(should_patch_status(None, &status));
        assert!(!should_patch_status(Some(&status), &status.clone()));
        let failed = BundleStatus {
            phase: Phase::Failed,
            ..status.clone()
        };
        assert!(should_patch_status(Some(&status), &failed));
    }
}
