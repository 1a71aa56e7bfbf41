//! Common test utilities
//!
//! In-memory stand-ins for the cluster so full reconciliation passes run
//! without an API server.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use bundle_controller::config::ControllerConfig;
use bundle_controller::controller::apply::ObjectStore;
use bundle_controller::controller::reconciler::{
    reconcile, BundleLookup, BundleWriter, Reconciler, ReconcilerError, Stores, ValuesStore,
};
use bundle_controller::controller::render::{RenderContext, Renderer, Renderers};
use bundle_controller::crd::{
    Bundle, BundleKind, BundleSpec, LocalSource, Phase, ResourceKey, SourceDescriptor, Values,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::DynamicObject;
use kube_runtime::controller::Action;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize rustls crypto provider (must be called before any Kubernetes client operations)
pub fn init_rustls() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Kinds the fake cluster treats as cluster scoped
const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
];

/// Objects, values sources and bundles of a pretend cluster
#[derive(Default)]
pub struct FakeCluster {
    pub objects: Mutex<BTreeMap<ResourceKey, DynamicObject>>,
    pub namespaces: Mutex<BTreeSet<String>>,
    /// Object names whose create or patch fails
    pub fail_writes: Mutex<HashSet<String>>,
    /// Object names whose delete fails
    pub fail_deletes: Mutex<HashSet<String>>,
    pub config_maps: Mutex<HashMap<(String, String), ConfigMap>>,
    pub secrets: Mutex<HashMap<(String, String), Secret>>,
    /// Phase of other bundles, for dependency checks
    pub phases: Mutex<HashMap<(String, String), Phase>>,
    status_patches: Mutex<Vec<Value>>,
    status_writes: AtomicUsize,
    finalizer_updates: Mutex<Vec<Vec<String>>>,
}

impl FakeCluster {
    /// Names of every stored object, sorted by identity
    pub fn names(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .map(|k| k.name.clone())
            .collect()
    }

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k.kind == kind && k.namespace == namespace && k.name == name)
            .map(|(_, obj)| obj.clone())
    }

    pub fn fail_write(&self, name: &str) {
        self.fail_writes.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_delete(&self, name: &str) {
        self.fail_deletes.lock().unwrap().insert(name.to_string());
    }

    /// Delete an object behind the controller's back
    pub fn remove_object(&self, name: &str) {
        self.objects.lock().unwrap().retain(|k, _| k.name != name);
    }

    pub fn heal(&self) {
        self.fail_writes.lock().unwrap().clear();
        self.fail_deletes.lock().unwrap().clear();
    }

    pub fn set_phase(&self, namespace: &str, name: &str, phase: Phase) {
        self.phases
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), phase);
    }

    pub fn add_config_map(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.to_string());
        cm.metadata.namespace = Some(namespace.to_string());
        cm.data = Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        self.config_maps
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), cm);
    }

    /// Status patches sent so far
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Apply the recorded finalizer and status writes to `bundle`, the way the
    /// API server would
    pub fn observe(&self, bundle: &mut Bundle) {
        if let Some(finalizers) = self.finalizer_updates.lock().unwrap().drain(..).last() {
            bundle.metadata.finalizers = Some(finalizers);
        }
        let patches: Vec<Value> = self.status_patches.lock().unwrap().drain(..).collect();
        for patch in &patches {
            let mut doc = serde_json::to_value(&*bundle).unwrap();
            merge_patch(&mut doc, patch);
            *bundle = serde_json::from_value(doc).unwrap();
        }
    }
}

fn name_of(obj: &DynamicObject) -> String {
    obj.metadata.name.clone().unwrap_or_default()
}

#[async_trait]
impl ObjectStore for FakeCluster {
    async fn get(&self, obj: &DynamicObject) -> anyhow::Result<Option<DynamicObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&ResourceKey::from_object(obj))
            .cloned())
    }

    async fn create(&self, obj: &DynamicObject) -> anyhow::Result<()> {
        if self.fail_writes.lock().unwrap().contains(&name_of(obj)) {
            anyhow::bail!("admission webhook denied {}", name_of(obj));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(ResourceKey::from_object(obj), obj.clone());
        Ok(())
    }

    async fn patch(&self, obj: &DynamicObject, _server_side_apply: bool) -> anyhow::Result<()> {
        if self.fail_writes.lock().unwrap().contains(&name_of(obj)) {
            anyhow::bail!("admission webhook denied {}", name_of(obj));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(ResourceKey::from_object(obj), obj.clone());
        Ok(())
    }

    async fn delete(&self, obj: &DynamicObject) -> anyhow::Result<bool> {
        if self.fail_deletes.lock().unwrap().contains(&name_of(obj)) {
            anyhow::bail!("forbidden: cannot delete {}", name_of(obj));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .remove(&ResourceKey::from_object(obj))
            .is_some())
    }

    async fn ensure_namespace(&self, name: &str) -> anyhow::Result<()> {
        self.namespaces.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn is_namespaced(&self, _api_version: &str, kind: &str) -> anyhow::Result<bool> {
        Ok(!CLUSTER_SCOPED.contains(&kind))
    }
}

#[async_trait]
impl ValuesStore for FakeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Secret>> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> anyhow::Result<Option<ConfigMap>> {
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[async_trait]
impl BundleLookup for FakeCluster {
    async fn phase(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Phase>> {
        Ok(self
            .phases
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .copied())
    }
}

#[async_trait]
impl BundleWriter for FakeCluster {
    async fn set_finalizers(&self, _namespace: &str, _name: &str, finalizers: &[String]) -> anyhow::Result<()> {
        self.finalizer_updates.lock().unwrap().push(finalizers.to_vec());
        Ok(())
    }

    async fn patch_status(&self, _namespace: &str, _name: &str, patch: &Value) -> anyhow::Result<()> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.status_patches.lock().unwrap().push(patch.clone());
        Ok(())
    }
}

/// JSON merge patch (RFC 7386)
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Renders one ConfigMap per name in `values.configMaps`, plus a ClusterRole
/// when `values.clusterRole` is true. The greeting defaults to the source's
/// `greeting` file, then to "hello".
#[derive(Debug)]
pub struct ValuesRenderer;

#[async_trait]
impl Renderer for ValuesRenderer {
    async fn render(&self, ctx: RenderContext<'_>, source: &Path, values: &Values) -> anyhow::Result<String> {
        let from_source = std::fs::read_to_string(source.join("greeting")).ok();
        let greeting = values
            .get("greeting")
            .and_then(Value::as_str)
            .or_else(|| from_source.as_deref().map(str::trim))
            .unwrap_or("hello");
        let mut docs: Vec<String> = values
            .get("configMaps")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|name| {
                format!(
                    "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  labels:\n    release: {}\ndata:\n  greeting: {greeting}\n",
                    ctx.release
                )
            })
            .collect();
        if values.get("clusterRole").and_then(Value::as_bool) == Some(true) {
            docs.push(format!(
                "apiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: {}-viewer\n",
                ctx.release
            ));
        }
        Ok(docs.join("---\n"))
    }
}

/// A reconciler wired to a [`FakeCluster`], with a local source directory
/// and a private cache
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub reconciler: Arc<Reconciler>,
    pub cache: TempDir,
    pub source: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let cache = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("README.md"), "rendered from values\n").unwrap();

        let config = ControllerConfig {
            cache_dir: cache.path().to_path_buf(),
            ..ControllerConfig::default()
        };
        let cluster = Arc::new(FakeCluster::default());
        let stores = Stores {
            objects: cluster.clone(),
            values: cluster.clone(),
            bundles: cluster.clone(),
            writer: cluster.clone(),
        };
        let renderers = Renderers::empty().with(BundleKind::Template, ValuesRenderer);
        let reconciler = Arc::new(Reconciler::new(config, renderers, stores).unwrap());
        Self {
            cluster,
            reconciler,
            cache,
            source,
        }
    }

    /// Bundle in namespace `apps` reading the harness source
    pub fn bundle(&self, name: &str, values: Value) -> Bundle {
        let mut bundle = Bundle::new(
            name,
            BundleSpec {
                kind: Some(BundleKind::Template),
                source: Some(SourceDescriptor::Local(LocalSource {
                    path: self.source.path().display().to_string(),
                })),
                values: values.as_object().cloned().unwrap_or_default(),
                ..BundleSpec::default()
            },
        );
        bundle.metadata.namespace = Some("apps".to_string());
        bundle
    }

    /// Run one pass and fold its writes back into `bundle`
    pub async fn reconcile(&self, bundle: &mut Bundle) -> Result<Action, ReconcilerError> {
        let result = reconcile(Arc::new(bundle.clone()), self.reconciler.clone()).await;
        self.cluster.observe(bundle);
        result
    }
}
