//! # Bundle Spec
//!
//! Main CRD specification types.

use crate::crd::{BundleStatus, SourceDescriptor};
use serde::{Deserialize, Serialize};

/// Nested map of chart values.
pub type Values = serde_json::Map<String, serde_json::Value>;

/// Bundle Custom Resource Definition
///
/// A bundle names a source, how to render it and what it needs before it can
/// be installed.
///
/// # Example
///
/// ```yaml
/// apiVersion: bundle.kubegems.io/v1beta1
/// kind: Bundle
/// metadata:
///   name: redis
///   namespace: default
/// spec:
///   kind: helm
///   source:
///     type: helm
///     repo: https://charts.bitnami.com/bitnami
///     chart: redis
///     version: 17.3.7
///   installNamespace: cache
///   dependencies:
///     - name: cert-manager
///   valuesRef:
///     - kind: ConfigMap
///       name: redis-values
///       optional: true
///   values:
///     auth:
///       enabled: false
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Bundle",
    group = "bundle.kubegems.io",
    version = "v1beta1",
    namespaced,
    status = "BundleStatus",
    shortname = "bd",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}, {"name":"Namespace", "type":"string", "jsonPath":".status.namespace"}, {"name":"Version", "type":"string", "jsonPath":".status.version"}, {"name":"UpgradeTimestamp", "type":"date", "jsonPath":".status.upgradeTimestamp"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// When true every managed resource is removed and the bundle reports `Disabled`
    #[serde(default)]
    pub disabled: bool,
    /// How the fetched source is rendered. Detected from the source tree when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BundleKind>,
    /// Where the bundle content comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,
    /// Namespace to install into. Defaults to the bundle's own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,
    /// Bundles that must be `Installed` before this one is applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// ConfigMaps and Secrets merged into the values, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_ref: Vec<ValuesRef>,
    /// Inline values, merged last
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub values: Values,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Helm,
    Kustomize,
    /// Plain manifests, rendered by concatenating every YAML file in the tree
    Template,
}

impl BundleKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleKind::Helm => "helm",
            BundleKind::Kustomize => "kustomize",
            BundleKind::Template => "template",
        }
    }
}

impl std::fmt::Display for BundleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    /// Defaults to the namespace of the depending bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Recorded for reference, not enforced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Reference to a ConfigMap or Secret in the bundle's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesRef {
    /// `ConfigMap` or `Secret` (case insensitive, plural accepted)
    pub kind: String,
    pub name: String,
    /// Ignore the reference when the object does not exist
    #[serde(default)]
    pub optional: bool,
    /// Only consume keys starting with this prefix, with the prefix stripped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Bundle {
    /// Namespace rendered resources are installed into
    #[must_use]
    pub fn install_namespace(&self) -> String {
        self.spec
            .install_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.metadata.namespace.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Version declared by the source, if any
    #[must_use]
    pub fn source_version(&self) -> Option<&str> {
        self.spec
            .source
            .as_ref()
            .and_then(SourceDescriptor::version)
            .filter(|v| !v.is_empty())
    }

    /// Status phase, `None` when no status has been written yet
    #[must_use]
    pub fn phase(&self) -> crate::crd::Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Recorded managed resources
    #[must_use]
    pub fn ledger(&self) -> &[crate::crd::ManagedResource] {
        self.status
            .as_ref()
            .map(|s| s.resources.as_slice())
            .unwrap_or_default()
    }
}
