//! Built-in operational endpoints: liveness, readiness, metrics and info.
//!
//! These handlers expose service health to orchestrators (Kubernetes, load
//! balancers) and operational monitoring.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures_util::future::join_all;
use serde_json::json;
use tracing::{error, info};

use super::OpsState;
use crate::network::LifecycleState;

/// Remembers the last readiness outcome so transitions are logged once.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    ready: bool,
    recovered_before: bool,
}

impl ReadinessTracker {
    /// Records a probe outcome. Returns the message to log when the service
    /// becomes ready: the first time, then on every recovery.
    pub fn observe(&mut self, ready: bool) -> Option<&'static str> {
        let message = if !self.ready && ready {
            if self.recovered_before {
                Some("service back to normal")
            } else {
                self.recovered_before = true;
                Some("service ready to handle requests")
            }
        } else {
            None
        };
        self.ready = ready;
        message
    }
}

/// Liveness probe -- always returns 200 OK.
///
/// The liveness probe only checks whether the process is running and
/// responsive. It does not check dependencies, because a failed liveness
/// probe triggers a restart.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- pings every dependency concurrently.
///
/// Returns 200 only while the service is `Ready` and every dependency
/// answers; 503 otherwise (startup, draining, or a failing dependency).
pub async fn readiness_handler(State(state): State<OpsState>) -> StatusCode {
    let results = join_all(state.dependencies.iter().map(|dep| dep.ping())).await;
    let mut dependencies_ok = true;
    for err in results.into_iter().filter_map(Result::err) {
        dependencies_ok = false;
        error!(error = %err, "dependency error");
    }

    let ready = dependencies_ok && state.lifecycle.state() == LifecycleState::Ready;
    if let Some(message) = state.readiness.lock().observe(ready) {
        info!(service = %state.name, "{message}");
    }

    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus text exposition of every metric recorded by the service.
pub async fn metrics_handler(State(state): State<OpsState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Service details as JSON. Always 200; `state` tells whether the service
/// is actually serving.
pub async fn info_handler(State(state): State<OpsState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": &*state.name,
        "version": &*state.version,
        "state": state.lifecycle.state().as_str(),
        "in_flight": state.lifecycle.in_flight_count(),
        "uptime_secs": state.lifecycle.uptime().as_secs(),
    }))
}
