//! # Custom Resource Definitions
//!
//! CRD types for the Bundle Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The `Bundle` resource, its dependencies and values references
//! - `source.rs` - Source descriptors (helm, git, object storage, http, local)
//! - `status.rs` - Phase, managed resource ledger and status fields

mod source;
mod spec;
mod status;

pub use source::{
    GitSource, HelmSource, HttpSource, LocalSource, ObjectStorageSource, SourceDescriptor,
};
pub use spec::{Bundle, BundleKind, BundleSpec, Dependency, Values, ValuesRef};
pub use status::{BundleStatus, ManagedResource, Phase, ResourceKey};

/// Schema for free-form values maps.
///
/// The API server prunes unknown fields unless told otherwise, which would
/// drop every user supplied value.
pub(crate) fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// `CustomResourceDefinition` manifest for [`Bundle`]
pub fn crd_yaml() -> anyhow::Result<String> {
    use anyhow::Context;
    use kube::CustomResourceExt;
    serde_yaml::to_string(&Bundle::crd()).context("Failed to serialize CRD")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_yaml() {
        let yaml = crd_yaml().unwrap();
        assert!(yaml.contains("name: bundles.bundle.kubegems.io"));
        assert!(yaml.contains("x-kubernetes-preserve-unknown-fields: true"));
        assert!(yaml.contains("status: {}"));
    }
}
