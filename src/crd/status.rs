//! # Status
//!
//! Status types for tracking install state and the managed resource ledger.

use crate::crd::Values;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default)]
    pub phase: Phase,
    /// Last error, or empty once installed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Values the installed resources were rendered with
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub values: Values,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Namespace the bundle was installed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// RFC3339 time of the first successful install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    /// RFC3339 time of the last successful install or upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_timestamp: Option<String>,
    /// Resources created and owned by this bundle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ManagedResource>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum Phase {
    #[default]
    None,
    Installed,
    Failed,
    Disabled,
}

impl Phase {
    /// Phases in which no further removal work is pending
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::None | Phase::Failed | Phase::Disabled)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::None => "None",
            Phase::Installed => "Installed",
            Phase::Failed => "Failed",
            Phase::Disabled => "Disabled",
        };
        f.write_str(s)
    }
}

/// Ledger entry for a resource owned by a bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    /// Last write error for this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Identity of a resource: `(apiVersion, kind, namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    #[must_use]
    pub fn from_object(obj: &DynamicObject) -> Self {
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        Self {
            api_version,
            kind,
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }

    /// Ledger entry for this identity with no error attached
    #[must_use]
    pub fn to_managed(&self) -> ManagedResource {
        ManagedResource {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            error: None,
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{} {}", self.api_version, self.kind, self.name)
        } else {
            write!(
                f,
                "{}/{} {}/{}",
                self.api_version, self.kind, self.namespace, self.name
            )
        }
    }
}

impl ManagedResource {
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Identity-only object, enough to address the resource for deletion
    #[must_use]
    pub fn to_object_ref(&self) -> DynamicObject {
        let mut obj = DynamicObject {
            types: Some(kube::api::TypeMeta {
                api_version: self.api_version.clone(),
                kind: self.kind.clone(),
            }),
            metadata: kube::api::ObjectMeta::default(),
            data: serde_json::Value::Null,
        };
        obj.metadata.name = Some(self.name.clone());
        if !self.namespace.is_empty() {
            obj.metadata.namespace = Some(self.namespace.clone());
        }
        obj
    }
}
