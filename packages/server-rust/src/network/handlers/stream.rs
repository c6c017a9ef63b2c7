//! WebSocket upgrade for streaming routes.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::response::IntoResponse;
use bytes::Bytes;
use corekit_core::errors::wrap;
use corekit_core::kv;
use parking_lot::Mutex;
use tracing::{debug, info_span, warn, Instrument};

use crate::metrics::MetricsProvider;
use crate::network::config::StreamConfig;
use crate::network::session::{drain, Session};
use crate::network::Lifecycle;
use crate::service::pipeline::path_params;
use crate::service::{Pipeline, Request, StreamHandler, StreamReply};

/// Everything a streaming route needs per request.
#[derive(Clone)]
pub struct StreamRoute {
    pub handler: Arc<dyn StreamHandler>,
    pub pattern: Arc<str>,
    pub pipeline: Pipeline,
    pub lifecycle: Arc<Lifecycle>,
    pub config: StreamConfig,
    pub metrics: MetricsProvider,
}

impl StreamRoute {
    /// Calls the handler, then upgrades and hands the socket to a
    /// [`Session`].
    ///
    /// A handler error is answered like any API error. If the upgrade fails
    /// after the handler succeeded, the handler's stream is cancelled and
    /// drained before the rejection is returned.
    pub async fn handle(self, request: axum::extract::Request) -> axum::response::Response {
        let (mut parts, _body) = request.into_parts();
        let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &()).await;
        let params = path_params(&mut parts).await;
        let request_headers = parts.headers.clone();

        let method = parts.method.to_string();
        let codec = self.pipeline.negotiator().request_codec(&parts.headers);
        let req = Request::new(parts.method, parts.uri, parts.headers, Bytes::new())
            .with_route(Arc::clone(&self.pattern), params)
            .with_codec(codec);
        let user_agent = req.user_agent().to_owned();

        let reply = match self.handler.call(req).await {
            Ok(reply) => reply,
            Err(err) => {
                let err = wrap(
                    err,
                    kv!["method", method, "path", &*self.pattern, "user-agent", user_agent],
                );
                let response = self.pipeline.convert_error(&err);
                return self.pipeline.encode(response, &request_headers);
            }
        };

        let ws = match upgrade {
            Ok(ws) => ws,
            Err(rejection) => {
                warn!(path = %self.pattern, "stream upgrade rejected: {rejection}");
                abandon(reply);
                return rejection.into_response();
            }
        };

        let guard = self.lifecycle.in_flight_guard();
        let shared = Arc::new(Mutex::new(Some(reply)));
        let on_failure = Arc::clone(&shared);
        let session = Session::new(
            self.config.clone(),
            self.metrics.clone(),
            self.lifecycle.shutdown_receiver(),
        );
        let pattern = Arc::clone(&self.pattern);

        ws.max_message_size(self.config.max_message_size)
            .on_failed_upgrade(move |err| {
                warn!(error = %err, "stream upgrade failed");
                if let Some(reply) = on_failure.lock().take() {
                    abandon(reply);
                }
            })
            .on_upgrade(move |socket| {
                let span = info_span!("stream", path = %pattern);
                async move {
                    let _guard = guard;
                    let Some(reply) = shared.lock().take() else {
                        return;
                    };
                    let reason = session.run(socket, reply).await;
                    debug!(reason = reason.as_str(), "stream finished");
                }
                .instrument(span)
            })
    }
}

/// Cancels a stream that will never be attached to a socket.
fn abandon(reply: StreamReply) {
    reply.cancel.cancel();
    tokio::spawn(drain(reply.frames));
}
