//! HTTP and WebSocket handler definitions for a service.
//!
//! This module defines `OpsState` (the shared state carried through axum
//! extractors for the operational endpoints) and the per-route streaming
//! handler.

pub mod ops;
pub mod stream;

pub use ops::{info_handler, liveness_handler, metrics_handler, readiness_handler, ReadinessTracker};
pub use stream::StreamRoute;

use std::sync::Arc;

use corekit_core::Pinger;
use parking_lot::Mutex;

use super::Lifecycle;
use crate::metrics::MetricsProvider;

/// Shared state for the built-in `/_service/*` endpoints.
///
/// Holds `Arc` references so cloning per request is cheap.
#[derive(Clone)]
pub struct OpsState {
    pub name: Arc<str>,
    pub version: Arc<str>,
    /// Lifecycle state and in-flight tracking.
    pub lifecycle: Arc<Lifecycle>,
    /// Checked on every readiness probe.
    pub dependencies: Arc<[Arc<dyn Pinger>]>,
    pub readiness: Arc<Mutex<ReadinessTracker>>,
    pub metrics: MetricsProvider,
}
