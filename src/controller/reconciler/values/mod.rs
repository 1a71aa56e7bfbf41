//! # Values Resolution
//!
//! Builds the final values a bundle is rendered with.
//!
//! References are applied in declared order, inline values last:
//!
//! - `Secret`: every entry is a `key=value` set expression
//! - `ConfigMap`: `binaryData` entries are YAML/JSON documents deep merged
//!   into the result, `data` entries are set expressions
//!
//! Nulls are pruned once everything is merged.

pub mod strvals;

use crate::crd::{Values, ValuesRef};
use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ValuesError {
    #[error("valuesRef kind [{0}] is not supported")]
    UnsupportedKind(String),
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("parse {kind} {name} key[{key}]: {message}")]
    Parse {
        kind: String,
        name: String,
        key: String,
        message: String,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ValuesError {
    /// Store failures may succeed on retry, everything else needs a spec change
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ValuesError::Store(_))
    }
}

/// Read access to the objects values are taken from
#[async_trait]
pub trait ValuesStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Secret>>;
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> anyhow::Result<Option<ConfigMap>>;
}

#[derive(Clone)]
pub struct KubeValuesStore {
    client: Client,
}

impl std::fmt::Debug for KubeValuesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeValuesStore").finish_non_exhaustive()
    }
}

impl KubeValuesStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ValuesStore for KubeValuesStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .context(format!("Failed to get Secret {namespace}/{name}"))
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .context(format!("Failed to get ConfigMap {namespace}/{name}"))
    }
}

/// Kind of object a [`ValuesRef`] points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Secret,
    ConfigMap,
}

impl RefKind {
    /// Case-insensitive, singular or plural
    pub fn parse(kind: &str) -> Result<Self, ValuesError> {
        match kind.to_ascii_lowercase().as_str() {
            "secret" | "secrets" => Ok(RefKind::Secret),
            "configmap" | "configmaps" => Ok(RefKind::ConfigMap),
            _ => Err(ValuesError::UnsupportedKind(kind.to_string())),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RefKind::Secret => "Secret",
            RefKind::ConfigMap => "ConfigMap",
        }
    }
}

/// Resolve `refs` in `namespace`, merge `inline` on top and prune nulls
pub async fn resolve(
    namespace: &str,
    refs: &[ValuesRef],
    inline: &Values,
    store: &dyn ValuesStore,
) -> Result<Values, ValuesError> {
    let mut base = Values::new();

    for reference in refs {
        let kind = RefKind::parse(&reference.kind)?;
        let not_found = || ValuesError::NotFound {
            kind: kind.as_str().to_string(),
            namespace: namespace.to_string(),
            name: reference.name.clone(),
        };

        match kind {
            RefKind::Secret => {
                let Some(secret) = store.get_secret(namespace, &reference.name).await? else {
                    if reference.optional {
                        debug!("Optional Secret {}/{} not found, skipping", namespace, reference.name);
                        continue;
                    }
                    return Err(not_found());
                };
                for (key, value) in secret.data.unwrap_or_default() {
                    let Some(key) = consumed_key(reference, &key) else {
                        continue;
                    };
                    let text = String::from_utf8_lossy(&value.0);
                    apply_set(reference, kind, &key, &text, &mut base)?;
                }
            }
            RefKind::ConfigMap => {
                let Some(config_map) = store
                    .get_config_map(namespace, &reference.name)
                    .await?
                else {
                    if reference.optional {
                        debug!(
                            "Optional ConfigMap {}/{} not found, skipping",
                            namespace, reference.name
                        );
                        continue;
                    }
                    return Err(not_found());
                };
                for (key, value) in config_map.binary_data.unwrap_or_default() {
                    let Some(key) = consumed_key(reference, &key) else {
                        continue;
                    };
                    let document = parse_document(&value.0).map_err(|message| ValuesError::Parse {
                        kind: kind.as_str().to_string(),
                        name: reference.name.clone(),
                        key: key.clone(),
                        message,
                    })?;
                    deep_merge(&mut base, document);
                }
                for (key, value) in config_map.data.unwrap_or_default() {
                    let Some(key) = consumed_key(reference, &key) else {
                        continue;
                    };
                    apply_set(reference, kind, &key, &value, &mut base)?;
                }
            }
        }
    }

    deep_merge(&mut base, inline.clone());
    prune_nulls(&mut base);
    Ok(base)
}

/// Key after prefix filtering, or `None` when the prefix excludes it
fn consumed_key(reference: &ValuesRef, key: &str) -> Option<String> {
    match reference.prefix.as_deref().filter(|p| !p.is_empty()) {
        None => Some(key.to_string()),
        Some(prefix) => key
            .strip_prefix(prefix)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string),
    }
}

fn apply_set(
    reference: &ValuesRef,
    kind: RefKind,
    key: &str,
    value: &str,
    into: &mut Values,
) -> Result<(), ValuesError> {
    strvals::parse_into(&format!("{key}={value}"), into).map_err(|e| ValuesError::Parse {
        kind: kind.as_str().to_string(),
        name: reference.name.clone(),
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_document(raw: &[u8]) -> Result<Values, String> {
    match serde_yaml::from_slice::<Value>(raw).map_err(|e| e.to_string())? {
        Value::Null => Ok(Values::new()),
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a map, got {other}")),
    }
}

/// Merge `overlay` into `base`.
///
/// Recurses only where both sides hold a map, otherwise the overlay wins.
pub fn deep_merge(base: &mut Values, overlay: Values) {
    for (key, value) in overlay {
        match value {
            Value::Object(incoming) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => deep_merge(existing, incoming),
                _ => {
                    base.insert(key, Value::Object(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Remove nulls bottom-up, then any map left empty
pub fn prune_nulls(values: &mut Values) {
    values.retain(|_, value| match value {
        Value::Null => false,
        Value::Object(child) => {
            prune_nulls(child);
            !child.is_empty()
        }
        _ => true,
    });
}
