//! # Triggers
//!
//! Maps ConfigMap and Secret changes to the bundles that take values from
//! them, so a values change is rolled out without waiting for the next
//! periodic reconcile.

use crate::controller::reconciler::values::RefKind;
use crate::crd::Bundle;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use std::sync::Arc;

/// Bundles in `namespace` with a values reference to the `kind` object `name`
#[must_use]
pub fn bundles_referencing(
    bundles: &[Arc<Bundle>],
    kind: RefKind,
    namespace: &str,
    name: &str,
) -> Vec<ObjectRef<Bundle>> {
    bundles
        .iter()
        .filter(|bundle| bundle.namespace().as_deref() == Some(namespace))
        .filter(|bundle| {
            bundle.spec.values_ref.iter().any(|reference| {
                reference.name == name && RefKind::parse(&reference.kind).ok() == Some(kind)
            })
        })
        .map(|bundle| ObjectRef::from_obj(bundle.as_ref()))
        .collect()
}
