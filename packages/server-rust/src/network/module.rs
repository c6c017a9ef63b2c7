//! Service host with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` and the builder methods
//! register routes and dependencies, `start()` binds the TCP listener, and
//! `serve()` starts accepting connections until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, on, MethodFilter, MethodRouter};
use axum::Router;
use corekit_core::codec::{Codec, CodecRegistry, StrictJsonCodec};
use corekit_core::errors::Error;
use corekit_core::Pinger;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::ServiceConfig;
use super::handlers::{
    info_handler, liveness_handler, metrics_handler, readiness_handler, OpsState,
    ReadinessTracker, StreamRoute,
};
use super::lifecycle::Lifecycle;
use super::middleware::build_http_layers;
use crate::metrics::MetricsProvider;
use crate::service::middleware::LatencyLayer;
use crate::service::{
    api_error_convertor, ApiHandler, ErrorConvertor, Negotiator, Pipeline, Response,
    StreamHandler,
};

pub const LIVENESS_PATH: &str = "/_service/liveness";
pub const READINESS_PATH: &str = "/_service/readiness";
pub const METRICS_PATH: &str = "/_service/metrics";
pub const INFO_PATH: &str = "/_service/info";

enum Endpoint {
    Api(Arc<dyn ApiHandler>),
    Stream(Arc<dyn StreamHandler>),
}

struct RouteEntry {
    method: MethodFilter,
    path: String,
    endpoint: Endpoint,
}

/// An HTTP service: business routes behind the request pipeline plus the
/// built-in `/_service/*` endpoints.
///
/// Follows the deferred startup pattern:
/// 1. `new()` and builder methods -- register routes, codecs, dependencies
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct Service {
    config: ServiceConfig,
    routes: Vec<RouteEntry>,
    dependencies: Vec<Arc<dyn Pinger>>,
    codecs: CodecRegistry,
    default_codec: Arc<dyn Codec>,
    use_default_codec_for_body: bool,
    error_convertor: ErrorConvertor,
    metrics: MetricsProvider,
    lifecycle: Arc<Lifecycle>,
    listener: Option<TcpListener>,
}

impl Service {
    /// Creates a service without binding any port.
    ///
    /// Defaults: JSON and `MessagePack` codecs, strict JSON as the default
    /// codec, [`api_error_convertor`], and a metrics provider namespaced by
    /// the service name.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        let metrics = MetricsProvider::new(&config.name);
        Self {
            config,
            routes: Vec::new(),
            dependencies: Vec::new(),
            codecs: CodecRegistry::with_defaults(),
            default_codec: Arc::new(StrictJsonCodec),
            use_default_codec_for_body: false,
            error_convertor: Arc::new(api_error_convertor),
            metrics,
            lifecycle: Arc::new(Lifecycle::new()),
            listener: None,
        }
    }

    /// Registers an API handler for `method` on `path`.
    ///
    /// Paths use `{name}` captures, e.g. `/users/{id}`.
    #[must_use]
    pub fn route(mut self, method: MethodFilter, path: &str, handler: impl ApiHandler) -> Self {
        self.routes.push(RouteEntry {
            method,
            path: path.to_owned(),
            endpoint: Endpoint::Api(Arc::new(handler)),
        });
        self
    }

    #[must_use]
    pub fn get(self, path: &str, handler: impl ApiHandler) -> Self {
        self.route(MethodFilter::GET, path, handler)
    }

    #[must_use]
    pub fn post(self, path: &str, handler: impl ApiHandler) -> Self {
        self.route(MethodFilter::POST, path, handler)
    }

    #[must_use]
    pub fn put(self, path: &str, handler: impl ApiHandler) -> Self {
        self.route(MethodFilter::PUT, path, handler)
    }

    #[must_use]
    pub fn patch(self, path: &str, handler: impl ApiHandler) -> Self {
        self.route(MethodFilter::PATCH, path, handler)
    }

    #[must_use]
    pub fn delete(self, path: &str, handler: impl ApiHandler) -> Self {
        self.route(MethodFilter::DELETE, path, handler)
    }

    /// Registers a streaming handler; clients reach it with a WebSocket
    /// upgrade on `GET path`.
    #[must_use]
    pub fn stream(mut self, path: &str, handler: impl StreamHandler) -> Self {
        self.routes.push(RouteEntry {
            method: MethodFilter::GET,
            path: path.to_owned(),
            endpoint: Endpoint::Stream(Arc::new(handler)),
        });
        self
    }

    /// Adds a dependency checked by the readiness probe.
    #[must_use]
    pub fn dependency(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.dependencies.push(pinger);
        self
    }

    /// Replaces the codec registry used for negotiation.
    #[must_use]
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Codec used for responses when `Accept` matches nothing registered.
    #[must_use]
    pub fn default_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.default_codec = codec;
        self
    }

    /// Decodes bodies without a known `Content-Type` with the default codec.
    #[must_use]
    pub fn use_default_codec_for_body(mut self) -> Self {
        self.use_default_codec_for_body = true;
        self
    }

    #[must_use]
    pub fn error_convertor(
        mut self,
        convertor: impl Fn(&Error) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.error_convertor = Arc::new(convertor);
        self
    }

    /// Records into `metrics` instead of a provider of the service's own.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsProvider) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the shared lifecycle handle.
    ///
    /// Tests and embedding code use this to observe state or trigger shutdown.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    #[must_use]
    pub fn metrics_provider(&self) -> MetricsProvider {
        self.metrics.clone()
    }

    fn pipeline(&self) -> Pipeline {
        let negotiator = Negotiator::new(Arc::new(self.codecs.clone()), Arc::clone(&self.default_codec))
            .use_default_codec_for_body(self.use_default_codec_for_body);
        Pipeline::new(negotiator, &self.metrics)
            .error_convertor(Arc::clone(&self.error_convertor))
            .body_limit(self.config.body_limit)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes registered on the same path share one method router, so an
    /// unregistered method on a known path answers 405.
    pub fn build_router(&self) -> Router {
        let pipeline = self.pipeline();

        let mut by_path: Vec<(&str, MethodRouter)> = Vec::new();
        for entry in &self.routes {
            let pattern: Arc<str> = Arc::from(entry.path.as_str());
            let method_router = match &entry.endpoint {
                Endpoint::Api(handler) => {
                    let handler = Arc::clone(handler);
                    let pipeline = pipeline.clone();
                    let lifecycle = Arc::clone(&self.lifecycle);
                    on(entry.method, move |req: axum::extract::Request| async move {
                        let _guard = lifecycle.in_flight_guard();
                        pipeline.handle(&*handler, &pattern, req).await
                    })
                }
                Endpoint::Stream(handler) => {
                    let route = StreamRoute {
                        handler: Arc::clone(handler),
                        pattern,
                        pipeline: pipeline.clone(),
                        lifecycle: Arc::clone(&self.lifecycle),
                        config: self.config.stream.clone(),
                        metrics: self.metrics.clone(),
                    };
                    on(entry.method, move |req: axum::extract::Request| route.handle(req))
                }
            };
            match by_path.iter().position(|(path, _)| *path == entry.path) {
                Some(index) => {
                    let (path, existing) = by_path.swap_remove(index);
                    by_path.push((path, existing.merge(method_router)));
                }
                None => by_path.push((entry.path.as_str(), method_router)),
            }
        }

        let mut router = Router::new();
        for (path, method_router) in by_path {
            router = router.route(
                path,
                method_router.layer(LatencyLayer::new(self.metrics.clone(), path)),
            );
        }

        let ops = OpsState {
            name: Arc::from(self.config.name.as_str()),
            version: Arc::from(self.config.version.as_str()),
            lifecycle: Arc::clone(&self.lifecycle),
            dependencies: self.dependencies.clone().into(),
            readiness: Arc::new(Mutex::new(ReadinessTracker::default())),
            metrics: self.metrics.clone(),
        };
        let ops_router = Router::new()
            .route(LIVENESS_PATH, get(liveness_handler))
            .route(READINESS_PATH, get(readiness_handler))
            .route(METRICS_PATH, get(metrics_handler))
            .route(INFO_PATH, get(info_handler))
            .with_state(ops);

        router
            .merge(ops_router)
            .layer(build_http_layers(&self.config))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(service = %self.config.name, "TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves.
    ///
    /// After the shutdown signal:
    /// 1. Lifecycle moves to `Draining`; readiness answers 503
    /// 2. Streaming sessions close
    /// 3. Waits up to `drain_timeout` for in-flight requests to complete
    /// 4. Lifecycle moves to `Stopped`
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let lifecycle = self.lifecycle;
        let name = self.config.name;

        lifecycle.set_ready();
        info!(service = %name, "service started");

        let signal = Arc::clone(&lifecycle);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutdown requested, draining");
                signal.trigger_shutdown();
            })
            .await?;

        if lifecycle.wait_for_drain(self.config.drain_timeout).await {
            info!(service = %name, "service stopped");
        } else {
            warn!(
                in_flight = lifecycle.in_flight_count(),
                "drain timeout expired with in-flight requests remaining"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .field("routes", &self.routes.len())
            .field("dependencies", &self.dependencies.len())
            .field("codecs", &self.codecs)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}
