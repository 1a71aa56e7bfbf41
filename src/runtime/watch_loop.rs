//! # Watch Loop
//!
//! Runs the `Bundle` controller until a shutdown signal arrives.
//!
//! Besides bundle changes, ConfigMap and Secret changes trigger every bundle
//! in the same namespace that takes values from them.

use crate::controller::reconciler::triggers::bundles_referencing;
use crate::controller::reconciler::values::RefKind;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Bundle;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::controller::{Config as ControllerRunConfig, Error as ControllerError};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info};

/// Watch bundles in every namespace and reconcile them
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let bundles: Api<Bundle> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);
    let concurrency = reconciler.config.max_concurrent_reconciliations;

    let controller = Controller::new(bundles, watcher::Config::default().any_semantic())
        .with_config(ControllerRunConfig::default().concurrency(concurrency));
    let for_config_maps = controller.store();
    let for_secrets = controller.store();

    info!(
        "Starting controller watch loop (concurrency: {})",
        concurrency
    );
    server_state.set_ready(true);

    controller
        .watches(config_maps, watcher::Config::default(), move |cm: ConfigMap| {
            let namespace = cm.namespace().unwrap_or_default();
            bundles_referencing(&for_config_maps.state(), RefKind::ConfigMap, &namespace, &cm.name_any())
        })
        .watches(secrets, watcher::Config::default(), move |secret: Secret| {
            let namespace = secret.namespace().unwrap_or_default();
            bundles_referencing(&for_secrets.state(), RefKind::Secret, &namespace, &secret.name_any())
        })
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                // Already handled by the error policy
                Err(ControllerError::ReconcilerFailed(_, obj)) => debug!("Reconcile of {} failed", obj),
                Err(e) => handle_watch_stream_error(&format!("{e:?}")),
            }
        })
        .await;

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}
