//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//!
//! A bundle waiting on a dependency is retried after a short fixed delay.
//! Every other failure backs off along a Fibonacci sequence tracked per
//! bundle, so one broken bundle cannot flood the API server or starve the
//! others.

use crate::controller::backoff::BackoffState;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Bundle;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
pub fn handle_reconciliation_error(
    bundle: Arc<Bundle>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = bundle.name_any();
    let namespace = bundle.namespace().unwrap_or_else(|| "default".to_string());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        error.class = error.class(),
    );
    let _error_guard = error_span.enter();

    metrics::increment_reconciliation_errors(error.class());

    if let ReconcilerError::Dependency(dependency) = error {
        let delay = ctx.config.dependency_requeue_duration();
        info!("{}, checking again in {}s", dependency, delay.as_secs());
        return Action::requeue(delay);
    }

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(BackoffState::default);
            let delay = state.next_delay_seconds();
            (delay, state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (60, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}, next attempt {})",
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Kind of failure reported by the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

/// Classify a watch stream error from its rendered message.
///
/// 404 is checked before 401, a plain text 404 body fails to decode with
/// an error that also mentions the watch.
#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorClass {
    let is_not_found =
        error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
    if is_not_found {
        WatchErrorClass::NotFound
    } else if error.contains("401") || error.contains("Unauthorized") {
        WatchErrorClass::Unauthorized
    } else if error.contains("410") || error.contains("too old resource version") || error.contains("Gone") {
        WatchErrorClass::Expired
    } else if error.contains("429") || error.contains("TooManyRequests") {
        WatchErrorClass::Throttled
    } else {
        WatchErrorClass::Other
    }
}

/// Log a watch stream error at a level matching its class
pub fn handle_watch_stream_error(error: &str) {
    match classify_watch_error(error) {
        WatchErrorClass::Unauthorized => {
            error!("Watch authentication failed (401), check the controller's RBAC: {}", error);
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410), the watch restarts");
        }
        WatchErrorClass::Throttled => warn!("API server throttling the watch (429): {}", error),
        WatchErrorClass::NotFound => {
            warn!("Watched resource not found (404), is the Bundle CRD installed? {}", error);
        }
        WatchErrorClass::Other => error!("Controller stream error: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("ApiError: Unauthorized (401)"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed: invalid type: integer `404`"),
            WatchErrorClass::NotFound
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorClass::Expired
        );
        assert_eq!(classify_watch_error("429 TooManyRequests"), WatchErrorClass::Throttled);
        assert_eq!(classify_watch_error("connection reset"), WatchErrorClass::Other);
    }
}
