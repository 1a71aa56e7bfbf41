//! # Reconcile
//!
//! One pass over a single bundle. Errors are returned to the controller
//! runtime, which decides when to retry (see `runtime::error_policy`).

use crate::controller::apply;
use crate::controller::reconciler::dependency;
use crate::controller::reconciler::lifecycle::{has_finalizer, with_finalizer, without_finalizer, Lifecycle};
use crate::controller::reconciler::status::{should_patch_status, status_patch};
use crate::controller::reconciler::values;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::controller::render::{self, RenderContext};
use crate::crd::{Bundle, BundleStatus, Phase};
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, field, info, info_span, warn, Instrument};

/// Reconcile `bundle`
pub async fn reconcile(bundle: Arc<Bundle>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let target = Target {
        bundle: &bundle,
        namespace: bundle.namespace().unwrap_or_else(|| "default".to_string()),
        name: bundle.name_any(),
    };
    let span = info_span!(
        "reconcile",
        resource.name = %target.name,
        resource.namespace = %target.namespace,
        resource.kind = "Bundle",
        operation.success = field::Empty,
    );

    metrics::increment_reconciliations();
    let result = reconcile_bundle(&target, &ctx).instrument(span.clone()).await;
    span.record("operation.success", result.is_ok());
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    if result.is_ok() {
        ctx.reset_backoff(&target.key());
    }
    result
}

struct Target<'a> {
    bundle: &'a Bundle,
    namespace: String,
    name: String,
}

impl Target<'_> {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Current status, the starting point of every status write
    fn status(&self) -> BundleStatus {
        self.bundle.status.clone().unwrap_or_default()
    }
}

async fn reconcile_bundle(target: &Target<'_>, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let bundle = target.bundle;

    match Lifecycle::of(bundle) {
        Lifecycle::Removed => {
            if has_finalizer(bundle) {
                info!("Releasing finalizer of {}", target.key());
                ctx.writer
                    .set_finalizers(&target.namespace, &target.name, &without_finalizer(bundle))
                    .await
                    .map_err(ReconcilerError::Kube)?;
                metrics::decrement_bundles_managed();
            }
            return Ok(Action::await_change());
        }
        Lifecycle::Terminating => {
            info!(
                "Bundle {} is being deleted, removing {} resources",
                target.key(),
                bundle.ledger().len()
            );
            return remove_all(target, ctx, Phase::None).await;
        }
        Lifecycle::Active => {}
    }

    if let Some(finalizers) = with_finalizer(bundle) {
        debug!("Adding finalizer to {}", target.key());
        ctx.writer
            .set_finalizers(&target.namespace, &target.name, &finalizers)
            .await
            .map_err(ReconcilerError::Kube)?;
        metrics::increment_bundles_managed();
    }

    if bundle.spec.disabled {
        if bundle.phase() == Phase::Disabled && bundle.ledger().is_empty() {
            debug!("Bundle {} is disabled", target.key());
            return Ok(Action::await_change());
        }
        info!("Bundle {} is disabled, removing its resources", target.key());
        return remove_all(target, ctx, Phase::Disabled).await;
    }

    if let Err(e) =
        dependency::check_ready(&target.namespace, &bundle.spec.dependencies, ctx.bundles.as_ref()).await
    {
        let error = ReconcilerError::from(e);
        if let ReconcilerError::Dependency(dependency) = &error {
            // Phase is left as is, waiting is not a failure
            info!("Bundle {} waiting: {}", target.key(), dependency);
            metrics::increment_dependency_waits();
            let mut status = target.status();
            status.message = dependency.to_string();
            write_status(target, ctx, &status).await?;
        }
        return Err(error);
    }

    let mut status = target.status();
    match install(target, ctx, &mut status).await {
        Ok(changed) => {
            if changed {
                info!(
                    "Bundle {} installed with {} resources",
                    target.key(),
                    status.resources.len()
                );
            }
            write_status(target, ctx, &status).await?;
            Ok(Action::requeue(ctx.config.reconcile_interval_duration()))
        }
        Err(e) => {
            error!("Failed to install bundle {}: {}", target.key(), e);
            status.phase = Phase::Failed;
            status.message = e.to_string();
            if let Err(write_err) = write_status(target, ctx, &status).await {
                warn!("Failed to record failure of {}: {}", target.key(), write_err);
            }
            Err(e)
        }
    }
}

/// Render and sync. `Ok(false)` when values, source version and the set of
/// owned resources are the same as at the last install.
///
/// The ledger in `status` is updated even when the sync fails.
async fn install(
    target: &Target<'_>,
    ctx: &Reconciler,
    status: &mut BundleStatus,
) -> Result<bool, ReconcilerError> {
    let bundle = target.bundle;
    let install_namespace = bundle.install_namespace();

    let values = values::resolve(
        &target.namespace,
        &bundle.spec.values_ref,
        &bundle.spec.values,
        ctx.values.as_ref(),
    )
    .await?;

    let resolved = ctx.resolver.resolve(bundle).await?;
    let kind = render::detect_kind(bundle, &resolved);
    debug!(
        "Rendering {} as {} from {} (cache hit: {})",
        target.key(),
        kind,
        resolved.path.display(),
        resolved.cache_hit
    );

    let render_ctx = RenderContext {
        release: &target.name,
        namespace: &install_namespace,
    };
    let rendered = ctx
        .renderers
        .render(kind, render_ctx, &resolved.path, &values)
        .await
        .map_err(|e| ReconcilerError::Config(format!("render {kind}: {e:#}")))?;
    let mut objects =
        render::split_yaml(&rendered).map_err(|e| ReconcilerError::Config(format!("{e:#}")))?;
    render::set_namespace_if_unset(&mut objects, &install_namespace, ctx.objects.as_ref()).await;

    let diff = apply::diff(bundle.ledger(), objects);
    let unchanged = bundle.phase() == Phase::Installed
        && status.values == values
        && status.version == resolved.version
        && !diff.changes_membership();

    // Always written: an unchanged bundle still repairs drifted objects
    let outcome = apply::sync(ctx.objects.as_ref(), diff, ctx.config.sync_options()).await;
    status.resources = outcome.ledger;
    if let Some(error) = outcome.error {
        return Err(ReconcilerError::Sync(error));
    }
    if unchanged {
        debug!("Bundle {} is up to date", target.key());
        return Ok(false);
    }

    let now = now_rfc3339();
    status.phase = Phase::Installed;
    status.message.clear();
    status.values = values;
    status.version = resolved.version;
    status.namespace = Some(install_namespace);
    status.upgrade_timestamp = Some(now.clone());
    if status.creation_timestamp.is_none() {
        status.creation_timestamp = Some(now);
    }
    Ok(true)
}

/// Delete every ledger entry and settle in `phase`
async fn remove_all(
    target: &Target<'_>,
    ctx: &Reconciler,
    phase: Phase,
) -> Result<Action, ReconcilerError> {
    let diff = apply::diff(target.bundle.ledger(), Vec::new());
    let outcome = apply::sync(ctx.objects.as_ref(), diff, ctx.config.sync_options()).await;

    let mut status = target.status();
    status.resources = outcome.ledger;
    match outcome.error {
        None => {
            status.phase = phase;
            status.message.clear();
            write_status(target, ctx, &status).await?;
            Ok(Action::await_change())
        }
        Some(error) => {
            status.phase = Phase::Failed;
            status.message.clone_from(&error);
            write_status(target, ctx, &status).await?;
            Err(ReconcilerError::Sync(error))
        }
    }
}

async fn write_status(
    target: &Target<'_>,
    ctx: &Reconciler,
    desired: &BundleStatus,
) -> Result<(), ReconcilerError> {
    let current = target.bundle.status.as_ref();
    if !should_patch_status(current, desired) {
        return Ok(());
    }
    ctx.writer
        .patch_status(&target.namespace, &target.name, &status_patch(current, desired))
        .await
        .map_err(ReconcilerError::Kube)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
