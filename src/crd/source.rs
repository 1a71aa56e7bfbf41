//! # Source Descriptors
//!
//! Where a bundle's content is fetched from. Exactly one variant is set.

use serde::{Deserialize, Serialize};

/// Source of the bundle content
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SourceDescriptor {
    /// Chart from a helm repository
    Helm(HelmSource),
    /// Subtree of a git repository
    Git(GitSource),
    /// Object in a bucket (not supported yet)
    ObjectStorage(ObjectStorageSource),
    /// `.tgz`, `.tar.gz` or `.zip` archive served over http(s)
    Http(HttpSource),
    /// Directory on the controller's filesystem (`file://` or bare path)
    Local(LocalSource),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    /// Repository URL (`https://`, `http://` or `file://`)
    pub repo: String,
    pub chart: String,
    /// Chart version. The newest version in the repository index when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub url: String,
    /// Branch, tag or commit. Remote HEAD when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Subpath within the repository used as the bundle root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageSource {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub url: String,
    /// Subpath within the archive used as the bundle root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalSource {
    pub path: String,
}

impl SourceDescriptor {
    /// Version-like component of the source, used in the cache key
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            SourceDescriptor::Helm(helm) => helm.version.as_deref(),
            SourceDescriptor::Git(git) => git.revision.as_deref(),
            _ => None,
        }
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceDescriptor::Helm(_) => "helm",
            SourceDescriptor::Git(_) => "git",
            SourceDescriptor::ObjectStorage(_) => "objectStorage",
            SourceDescriptor::Http(_) => "http",
            SourceDescriptor::Local(_) => "local",
        }
    }
}
