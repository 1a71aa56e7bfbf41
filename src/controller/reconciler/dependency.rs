//! # Dependency Gate
//!
//! A bundle is installed only once every bundle it depends on reports
//! `Installed`. An unready dependency is a retryable condition, not a failure.

use crate::crd::{Bundle, Dependency, Phase};
use anyhow::Context;
use async_trait::async_trait;
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

/// A dependency that is missing or not installed yet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency {namespace}/{name} :{reason}")]
pub struct DependencyError {
    pub namespace: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    NotReady(#[from] DependencyError),
    #[error(transparent)]
    Lookup(#[from] anyhow::Error),
}

/// Phase lookup for other bundles
#[async_trait]
pub trait BundleLookup: Send + Sync {
    /// `None` when the bundle does not exist
    async fn phase(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Phase>>;
}

#[derive(Clone)]
pub struct KubeBundleLookup {
    client: Client,
}

impl std::fmt::Debug for KubeBundleLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBundleLookup").finish_non_exhaustive()
    }
}

impl KubeBundleLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BundleLookup for KubeBundleLookup {
    async fn phase(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Phase>> {
        let api: Api<Bundle> = Api::namespaced(self.client.clone(), namespace);
        let bundle = api
            .get_opt(name)
            .await
            .context(format!("Failed to get Bundle {namespace}/{name}"))?;
        Ok(bundle.map(|b| b.phase()))
    }
}

/// Check every dependency, stopping at the first that is not ready
pub async fn check_ready(
    bundle_namespace: &str,
    dependencies: &[Dependency],
    lookup: &dyn BundleLookup,
) -> Result<(), GateError> {
    for dependency in dependencies {
        if dependency.name.is_empty() {
            continue;
        }
        let namespace = dependency
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(bundle_namespace);

        let not_ready = |reason: &str| DependencyError {
            namespace: namespace.to_string(),
            name: dependency.name.clone(),
            reason: reason.to_string(),
        };

        match lookup.phase(namespace, &dependency.name).await? {
            None => return Err(not_ready("not found").into()),
            Some(Phase::Installed) => {
                // version is recorded only
                debug!("Dependency {}/{} is installed", namespace, dependency.name);
            }
            Some(_) => return Err(not_ready("not installed").into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeLookup(HashMap<(String, String), Phase>);

    #[async_trait]
    impl BundleLookup for FakeLookup {
        async fn phase(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Phase>> {
            Ok(self
                .0
                .get(&(namespace.to_string(), name.to_string()))
                .copied())
        }
    }

    struct BrokenLookup;

    #[async_trait]
    impl BundleLookup for BrokenLookup {
        async fn phase(&self, _: &str, _: &str) -> anyhow::Result<Option<Phase>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn dep(name: &str, namespace: Option<&str>) -> Dependency {
        Dependency {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            version: None,
        }
    }

    #[tokio::test]
    async fn test_db_dependency_lifecycle() {
        let deps = vec![dep("db", None)];

        let lookup = FakeLookup(HashMap::new());
        let err = check_ready("apps", &deps, &lookup).await.unwrap_err();
        let GateError::NotReady(err) = err else {
            panic!("expected a dependency error");
        };
        assert_eq!(err.reason, "not found");
        assert_eq!(err.to_string(), "dependency apps/db :not found");

        let lookup = FakeLookup(HashMap::from([(
            ("apps".to_string(), "db".to_string()),
            Phase::Failed,
        )]));
        let err = check_ready("apps", &deps, &lookup).await.unwrap_err();
        assert_eq!(err.to_string(), "dependency apps/db :not installed");

        let lookup = FakeLookup(HashMap::from([(
            ("apps".to_string(), "db".to_string()),
            Phase::Installed,
        )]));
        check_ready("apps", &deps, &lookup).await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_namespace_and_empty_names() {
        let lookup = FakeLookup(HashMap::from([(
            ("infra".to_string(), "db".to_string()),
            Phase::Installed,
        )]));
        let deps = vec![dep("", None), dep("db", Some("infra"))];
        check_ready("apps", &deps, &lookup).await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_errors_propagate() {
        let err = check_ready("apps", &[dep("db", None)], &BrokenLookup)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Lookup(_)));
    }
}
