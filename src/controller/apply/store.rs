//! # Object Store
//!
//! Cluster access needed by the sync engine, behind a trait so the engine
//! runs against an in-memory store in tests.

use crate::constants::FIELD_MANAGER;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
    PostParams,
};
use kube::discovery::{self, Scope};
use kube::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Current object with the same identity, if any
    async fn get(&self, obj: &DynamicObject) -> Result<Option<DynamicObject>>;
    async fn create(&self, obj: &DynamicObject) -> Result<()>;
    /// Server-side apply when `server_side_apply`, JSON merge patch otherwise
    async fn patch(&self, obj: &DynamicObject, server_side_apply: bool) -> Result<()>;
    /// `Ok(false)` when the object was already gone
    async fn delete(&self, obj: &DynamicObject) -> Result<bool>;
    /// Create the namespace unless it exists
    async fn ensure_namespace(&self, name: &str) -> Result<()>;
    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool>;
}

/// [`ObjectStore`] over the Kubernetes API using discovery for arbitrary kinds
pub struct KubeObjectStore {
    client: Client,
    resources: RwLock<HashMap<String, (ApiResource, bool)>>,
}

impl std::fmt::Debug for KubeObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeObjectStore").finish_non_exhaustive()
    }
}

impl KubeObjectStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, bool)> {
        let cache_key = format!("{api_version}/{kind}");
        if let Some(found) = self.resources.read().await.get(&cache_key) {
            return Ok(found.clone());
        }

        let (group, version) = split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .context(format!("Failed to discover {api_version} {kind}"))?;
        let namespaced = matches!(capabilities.scope, Scope::Namespaced);
        debug!("Discovered {} {} (namespaced: {})", api_version, kind, namespaced);

        self.resources
            .write()
            .await
            .insert(cache_key, (resource.clone(), namespaced));
        Ok((resource, namespaced))
    }

    async fn api_for(&self, obj: &DynamicObject) -> Result<(Api<DynamicObject>, String)> {
        let types = obj
            .types
            .as_ref()
            .context("Object has no apiVersion/kind")?;
        let name = obj
            .metadata
            .name
            .clone()
            .context(format!("{} has no name", types.kind))?;
        let (resource, namespaced) = self.resolve(&types.api_version, &types.kind).await?;
        let api = match obj.metadata.namespace.as_deref() {
            Some(ns) if namespaced && !ns.is_empty() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ if namespaced => Api::default_namespaced_with(self.client.clone(), &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        };
        Ok((api, name))
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, obj: &DynamicObject) -> Result<Option<DynamicObject>> {
        let (api, name) = self.api_for(obj).await?;
        api.get_opt(&name)
            .await
            .context(format!("Failed to get {name}"))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<()> {
        let (api, name) = self.api_for(obj).await?;
        api.create(&PostParams::default(), obj)
            .await
            .context(format!("Failed to create {name}"))?;
        Ok(())
    }

    async fn patch(&self, obj: &DynamicObject, server_side_apply: bool) -> Result<()> {
        let (api, name) = self.api_for(obj).await?;
        if server_side_apply {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
                .await
                .context(format!("Failed to apply {name}"))?;
        } else {
            api.patch(&name, &PatchParams::default(), &Patch::Merge(obj))
                .await
                .context(format!("Failed to patch {name}"))?;
        }
        Ok(())
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<bool> {
        let (api, name) = self.api_for(obj).await?;
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to delete {name}"))),
        }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let namespace = Namespace {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to create namespace {name}"))),
        }
    }

    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool> {
        Ok(self.resolve(api_version, kind).await?.1)
    }
}

/// `apps/v1` -> (`apps`, `v1`), `v1` -> (``, `v1`)
#[must_use]
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(
            split_api_version("rbac.authorization.k8s.io/v1"),
            ("rbac.authorization.k8s.io", "v1")
        );
    }
}
