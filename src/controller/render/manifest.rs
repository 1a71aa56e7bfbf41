//! # Manifests
//!
//! Splitting rendered YAML streams into objects and defaulting their
//! namespace.

use crate::controller::apply::ObjectStore;
use anyhow::{Context, Result};
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Kinds that are never namespaced, used when discovery cannot answer
/// (for example a CRD installed by the same bundle)
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterIssuer",
    "ClusterRole",
    "ClusterRoleBinding",
    "CSIDriver",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

/// Non-empty documents of a YAML (or JSON) stream
pub fn documents(stream: &str) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(stream).enumerate() {
        let value = Value::deserialize(document)
            .context(format!("failed to unmarshal manifest (document {index})"))?;
        match &value {
            Value::Null => continue,
            Value::Object(map) if map.is_empty() => continue,
            _ => out.push(value),
        }
    }
    Ok(out)
}

/// Split a rendered stream into objects.
///
/// Empty documents are skipped and `*List` kinds are flattened into their
/// items.
pub fn split_yaml(stream: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for value in documents(stream)? {
        if is_list(&value) {
            if let Some(Value::Array(items)) = value.get("items") {
                for item in items {
                    objects.push(to_object(item.clone())?);
                }
            }
            continue;
        }
        objects.push(to_object(value)?);
    }
    Ok(objects)
}

fn is_list(value: &Value) -> bool {
    value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"))
        && value.get("items").is_some()
}

fn to_object(value: Value) -> Result<DynamicObject> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if kind.is_empty() || value.get("apiVersion").and_then(Value::as_str).is_none() {
        anyhow::bail!("manifest is missing apiVersion or kind");
    }
    serde_json::from_value(value).context(format!("invalid {kind} manifest"))
}

/// Give every namespaced object without a namespace `namespace`.
///
/// Scope comes from discovery; kinds discovery does not know yet fall back
/// to the built-in list of cluster-scoped kinds.
pub async fn set_namespace_if_unset(
    objects: &mut [DynamicObject],
    namespace: &str,
    store: &dyn ObjectStore,
) {
    for obj in objects.iter_mut() {
        if obj.metadata.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
            continue;
        }
        let Some(types) = obj.types.as_ref() else {
            continue;
        };
        let namespaced = match store.is_namespaced(&types.api_version, &types.kind).await {
            Ok(namespaced) => namespaced,
            Err(e) => {
                debug!(
                    "Scope of {} {} unknown ({:#}), using built-in list",
                    types.api_version, types.kind, e
                );
                !CLUSTER_SCOPED_KINDS.contains(&types.kind.as_str())
            }
        };
        if namespaced {
            obj.metadata.namespace = Some(namespace.to_string());
        }
    }
}
