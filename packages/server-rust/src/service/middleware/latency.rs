//! Request latency histogram, labelled by method, route pattern and status.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response};
use tower::{Layer, Service};

use crate::metrics::MetricsProvider;

// ---------------------------------------------------------------------------
// LatencyLayer
// ---------------------------------------------------------------------------

/// Tower layer recording `http_latency{method,path,status}` in seconds.
///
/// `path` is the route pattern, not the concrete URI, so label cardinality
/// stays bounded by the number of routes.
#[derive(Debug, Clone)]
pub struct LatencyLayer {
    metrics: MetricsProvider,
    path: Arc<str>,
}

impl LatencyLayer {
    #[must_use]
    pub fn new(metrics: MetricsProvider, path: impl Into<Arc<str>>) -> Self {
        Self {
            metrics,
            path: path.into(),
        }
    }
}

impl<S> Layer<S> for LatencyLayer {
    type Service = LatencyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LatencyService {
            inner,
            metrics: self.metrics.clone(),
            path: Arc::clone(&self.path),
        }
    }
}

// ---------------------------------------------------------------------------
// LatencyService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LatencyService<S> {
    inner: S,
    metrics: MetricsProvider,
    path: Arc<str>,
}

impl<S, B, R> Service<Request<B>> for LatencyService<S>
where
    S: Service<Request<B>, Response = Response<R>> + Send,
    S::Future: Send + 'static,
    S::Error: 'static,
    R: 'static,
{
    type Response = Response<R>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<R>, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let method = req.method().to_string();
        let path = self.path.to_string();
        let metrics = self.metrics.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            if let Ok(response) = &result {
                metrics
                    .histogram(
                        "http_latency",
                        &[
                            ("method", method),
                            ("path", path),
                            ("status", response.status().as_u16().to_string()),
                        ],
                    )
                    .record(start.elapsed().as_secs_f64());
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
