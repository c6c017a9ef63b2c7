//! Request/response pipeline around a business handler.
//!
//! Per request: received, codec resolved, handler invoked, success or
//! handler error, encoded, sent. Handler errors are annotated with the route
//! and classified here, at the outermost layer, into a transport status.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use corekit_core::apikit::{ApiError, ERR_DECODE_REQUEST, ERR_INTERNAL_SERVER};
use corekit_core::errors::{wrap, Error};
use corekit_core::kv;
use metrics::Counter;
use tracing::{error, info_span, Instrument};

use super::handler::ApiHandler;
use super::negotiate::Negotiator;
use super::request::Request;
use super::response::Response;
use crate::metrics::MetricsProvider;

/// Maps a handler error to the response sent to the client.
pub type ErrorConvertor = Arc<dyn Fn(&Error) -> Response + Send + Sync>;

/// Default [`ErrorConvertor`]: the first [`ApiError`] in the chain decides the
/// status and body; anything else becomes `ERR_INTERNAL_SERVER`.
#[must_use]
pub fn api_error_convertor(err: &Error) -> Response {
    let api = err.find::<ApiError>().cloned().unwrap_or(ERR_INTERNAL_SERVER);
    let response = Response::with_status(api.status().as_u16());
    match serde_json::to_value(&api) {
        Ok(payload) => response.with_payload(payload),
        Err(_) => response,
    }
}

/// Shared per-service request processing.
#[derive(Clone)]
pub struct Pipeline {
    negotiator: Negotiator,
    error_convertor: ErrorConvertor,
    errors_count: Counter,
    body_limit: usize,
}

impl Pipeline {
    #[must_use]
    pub fn new(negotiator: Negotiator, metrics: &MetricsProvider) -> Self {
        Self {
            negotiator,
            error_convertor: Arc::new(api_error_convertor),
            errors_count: metrics.counter("errors_count", &[]),
            body_limit: 2 * 1024 * 1024,
        }
    }

    #[must_use]
    pub fn error_convertor(mut self, convertor: ErrorConvertor) -> Self {
        self.error_convertor = convertor;
        self
    }

    #[must_use]
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    #[must_use]
    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    /// Runs `handler` for an axum request routed under `pattern`.
    pub async fn handle(
        &self,
        handler: &dyn ApiHandler,
        pattern: &Arc<str>,
        request: axum::extract::Request,
    ) -> axum::response::Response {
        let (mut parts, body) = request.into_parts();
        let span = info_span!("request", method = %parts.method, path = %pattern);
        async move {
            let params = path_params(&mut parts).await;
            let request_headers = parts.headers.clone();
            let body = match axum::body::to_bytes(body, self.body_limit).await {
                Ok(body) => body,
                Err(err) => {
                    let err = wrap(
                        ERR_DECODE_REQUEST,
                        kv!["component", "pipeline", "action", "read_body", "cause", err.to_string()],
                    );
                    let response = self.convert_error(&err);
                    return self.encode(response, &request_headers);
                }
            };
            let codec = self.negotiator.request_codec(&parts.headers);
            let req = Request::new(parts.method, parts.uri, parts.headers, body)
                .with_route(Arc::clone(pattern), params)
                .with_codec(codec);
            let response = self.invoke(handler, req).await;
            self.encode(response, &request_headers)
        }
        .instrument(span)
        .await
    }

    /// Invokes the handler and turns its outcome into a response envelope.
    pub async fn invoke(&self, handler: &dyn ApiHandler, req: Request) -> Response {
        let method = req.method().to_string();
        let pattern = req.pattern().to_owned();
        let user_agent = req.user_agent().to_owned();
        match handler.call(req).await {
            Ok(reply) => reply.into_response(),
            Err(err) => {
                let err = wrap(
                    err,
                    kv!["method", method, "path", pattern, "user-agent", user_agent],
                );
                self.convert_error(&err)
            }
        }
    }

    /// Classifies `err` with the configured convertor. Server-side failures
    /// are logged with the full chain and counted; client errors are not.
    pub fn convert_error(&self, err: &Error) -> Response {
        let response = (self.error_convertor)(err);
        if (500..600).contains(&response.status) {
            error!(error = %err, status = response.status, "request failed");
            self.errors_count.increment(1);
        }
        response
    }

    /// Encodes the envelope, negotiating the payload codec against the
    /// request headers.
    ///
    /// # Panics
    ///
    /// Panics if the status is unset (`0`) or not a valid HTTP status, or if
    /// the response names an unregistered `Content-Type`.
    #[must_use]
    pub fn encode(
        &self,
        response: Response,
        request_headers: &HeaderMap,
    ) -> axum::response::Response {
        assert!(response.status != 0, "response status code must be set");
        let status = match StatusCode::from_u16(response.status) {
            Ok(status) => status,
            Err(_) => panic!("invalid response status code {}", response.status),
        };

        let Some(payload) = response.payload else {
            return build(status, response.headers, Body::empty());
        };

        let codec = self
            .negotiator
            .response_codec(&response.headers, request_headers);
        let mut headers = response.headers;
        match codec.marshal(&payload) {
            Ok(bytes) => {
                if let Ok(value) = HeaderValue::from_str(codec.name()) {
                    headers.insert(CONTENT_TYPE, value);
                }
                build(status, headers, Body::from(bytes))
            }
            Err(err) => {
                error!(error = %err, "cannot encode response payload");
                self.errors_count.increment(1);
                build(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), Body::empty())
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("negotiator", &self.negotiator)
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

/// Path parameters captured by the router; empty when the route has none.
pub(crate) async fn path_params(parts: &mut Parts) -> HashMap<String, String> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
        Err(_) => HashMap::new(),
    }
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> axum::response::Response {
    let mut response = axum::response::Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use axum::http::header::ACCEPT;
    use axum::http::{Method, Uri};
    use bytes::Bytes;
    use corekit_core::apikit::{Code, ERR_ENTITY_NOT_FOUND};
    use corekit_core::codec::{CodecRegistry, JsonCodec, MSGPACK};
    use corekit_core::testkit::assert_api_error;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::service::Reply;

    fn pipeline() -> (Pipeline, MetricsProvider) {
        let metrics = MetricsProvider::new("pipeline_test");
        let negotiator =
            Negotiator::new(Arc::new(CodecRegistry::with_defaults()), Arc::new(JsonCodec));
        (Pipeline::new(negotiator, &metrics), metrics)
    }

    fn http_request(method: Method, uri: &str, content_type: Option<&str>, body: &str) -> axum::extract::Request {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn empty_reply_is_201_with_empty_body() {
        let (pipeline, _) = pipeline();
        let handler = |_req: Request| async { Ok::<_, Error>(Reply::Empty) };
        let response = pipeline
            .handle(&handler, &Arc::from("/items"), http_request(Method::POST, "/items", None, ""))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn business_error_maps_to_status_and_body() {
        let (pipeline, metrics) = pipeline();
        let handler = |_req: Request| async { Err::<Reply, _>(Error::new(ERR_ENTITY_NOT_FOUND)) };
        let response = pipeline
            .handle(&handler, &Arc::from("/items/{id}"), http_request(Method::GET, "/items/7", None, ""))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            json!({"code": 100_002, "message": "entity not found"})
        );
        assert!(!metrics.render().contains("errors_count 1"));
    }

    #[tokio::test]
    async fn unclassified_error_becomes_internal_and_is_counted() {
        let (pipeline, metrics) = pipeline();
        let handler = |_req: Request| async { Err::<Reply, _>(Error::msg("boom")) };
        let response = pipeline
            .handle(&handler, &Arc::from("/boom"), http_request(Method::GET, "/boom", None, ""))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["message"], "internal server error");
        assert!(metrics.render().contains("pipeline_test_errors_count 1"));
    }

    #[tokio::test]
    async fn handler_error_is_wrapped_with_route_details() {
        let (pipeline, _) = pipeline();
        let handler = |_req: Request| async { Err::<Reply, _>(Error::new(ERR_ENTITY_NOT_FOUND)) };
        let req = Request::new(Method::DELETE, Uri::from_static("/items/3"), HeaderMap::new(), Bytes::new())
            .with_route(Arc::from("/items/{id}"), HashMap::new());
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let captured = Arc::clone(&seen);
        let pipeline = pipeline.error_convertor(Arc::new(move |err: &Error| {
            *captured.lock() = Some(err.clone());
            api_error_convertor(err)
        }));

        let response = pipeline.invoke(&handler, req).await;
        assert_eq!(response.status, 404);
        let err = seen.lock().clone().unwrap();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.get("method").and_then(|v| v.as_str()), Some("DELETE"));
        assert_eq!(ctx.get("path").and_then(|v| v.as_str()), Some("/items/{id}"));
        assert_api_error(&err, &ERR_ENTITY_NOT_FOUND);
    }

    #[tokio::test]
    async fn path_params_and_body_reach_handler() {
        #[derive(Deserialize)]
        struct Rename {
            name: String,
        }
        let (pipeline, _) = pipeline();
        let handler = |req: Request| async move {
            let body: Rename = req.unmarshal()?;
            Reply::payload(&json!({ "id": req.param("id"), "name": body.name }))
        };
        let response = pipeline
            .handle(
                &handler,
                &Arc::from("/items/{id}"),
                http_request(Method::PUT, "/items/9", Some("application/json"), r#"{"name":"new"}"#),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        // Path params come from the router, so a bare pipeline call sees none.
        assert_eq!(body_json(response).await, json!({"id": null, "name": "new"}));
    }

    #[tokio::test]
    async fn strict_json_rejects_unknown_fields_with_400() {
        #[derive(Debug, Deserialize)]
        struct Rename {
            #[allow(dead_code)]
            name: String,
        }
        let (pipeline, _) = pipeline();
        let handler = |req: Request| async move {
            let _body: Rename = req.unmarshal()?;
            Ok::<_, Error>(Reply::Empty)
        };
        let response = pipeline
            .handle(
                &handler,
                &Arc::from("/items"),
                http_request(Method::POST, "/items", Some("application/json"), r#"{"name":"a","x":1}"#),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], 100_100);
    }

    #[test]
    fn accept_selects_response_codec() {
        let (pipeline, _) = pipeline();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MSGPACK));
        let response = pipeline.encode(Response::ok(json!({"a": 1})), &headers);
        assert_eq!(response.headers()[CONTENT_TYPE], MSGPACK);
    }

    #[test]
    #[should_panic(expected = "response status code must be set")]
    fn zero_status_panics() {
        let (pipeline, _) = pipeline();
        let _ = pipeline.encode(Response::default(), &HeaderMap::new());
    }

    #[test]
    fn convertor_uses_code_table() {
        let response = api_error_convertor(&Error::new(ApiError::new(Code::Aborted, 7, "busy")));
        assert_eq!(response.status, 409);
        assert_eq!(response.payload, Some(json!({"code": 7, "message": "busy"})));
    }
}
