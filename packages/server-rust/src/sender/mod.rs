//! HTTP sender: the client side of the request pipeline.
//!
//! A [`Sender`] targets one base address. It negotiates the request codec,
//! records `http_sender{address,method,path,status}` latency, turns non-2xx
//! answers into errors through a pluggable handler, and wraps every failure
//! with the facts gathered during the exchange.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use corekit_core::apikit::{ApiError, Code};
use corekit_core::codec::{parse_media_type, Codec, CodecRegistry, JsonCodec};
use corekit_core::errors::{context, wrap, Error, ErrorContext, ResultExt};
use corekit_core::{kv, Pinger};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::metrics::MetricsProvider;
use crate::network::LIVENESS_PATH;

/// Turns a non-2xx response into an error. Returning `None` is a bug in the
/// handler and panics the sender.
pub type ErrorHandler = Arc<dyn Fn(&SenderResponse) -> Option<Error> + Send + Sync>;

/// Sender configuration.
#[derive(Clone)]
pub struct SenderOptions {
    pub client: reqwest::Client,
    /// Path probed by [`Pinger::ping`].
    pub health_path: String,
    pub error_handler: ErrorHandler,
    /// Codec for request payloads without an explicit `Content-Type`, and for
    /// responses without a recognised one.
    pub default_codec: Arc<dyn Codec>,
    pub codecs: Arc<CodecRegistry>,
    pub user_agent: String,
    /// Where latency is recorded; `None` disables recording.
    pub metrics: Option<MetricsProvider>,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            health_path: LIVENESS_PATH.to_owned(),
            error_handler: Arc::new(default_error_handler),
            default_codec: Arc::new(JsonCodec),
            codecs: Arc::new(CodecRegistry::with_defaults()),
            user_agent: concat!("corekit/", env!("CARGO_PKG_VERSION")).to_owned(),
            metrics: None,
        }
    }
}

impl fmt::Debug for SenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderOptions")
            .field("health_path", &self.health_path)
            .field("default_codec", &self.default_codec.name())
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// A path template with `{}` placeholders filled in order.
///
/// The template (not the rendered path) labels metrics and error context,
/// so per-entity paths do not multiply label values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    format: String,
    params: Vec<String>,
}

impl Endpoint {
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, value: impl fmt::Display) -> Self {
        self.params.push(value.to_string());
        self
    }

    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params = self.params.iter();
        let mut rest = self.format.as_str();
        while let Some(index) = rest.find("{}") {
            f.write_str(&rest[..index])?;
            match params.next() {
                Some(param) => f.write_str(param)?,
                None => f.write_str("{}")?,
            }
            rest = &rest[index + 2..];
        }
        f.write_str(rest)
    }
}

/// An outbound request.
#[derive(Debug, Clone)]
pub struct SenderRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    pub headers: HeaderMap,
    pub payload: Option<serde_json::Value>,
}

impl SenderRequest {
    #[must_use]
    pub fn new(method: Method, endpoint: Endpoint) -> Self {
        Self {
            method,
            endpoint,
            headers: HeaderMap::new(),
            payload: None,
        }
    }

    /// Attaches a payload to encode with the negotiated codec.
    ///
    /// # Errors
    ///
    /// Returns the serialization error.
    pub fn with_payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self, Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets a header. `Content-Type` selects the request codec.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A fully read response.
#[derive(Clone)]
pub struct SenderResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    codec: Arc<dyn Codec>,
    context: Option<ErrorContext>,
}

impl SenderResponse {
    /// Builds a response by hand, mainly for exercising error handlers.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, codec: Arc<dyn Codec>) -> Self {
        Self {
            status,
            headers,
            body,
            codec,
            context: None,
        }
    }

    /// The codec the body is decoded with.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Decodes the body. On a successful exchange, decode errors carry the
    /// exchange's context.
    ///
    /// # Errors
    ///
    /// Returns the codec's decode error.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let result = self.codec.unmarshal(&self.body);
        match &self.context {
            Some(ctx) => result.wrap_err(ctx.data().to_vec()),
            None => result,
        }
    }
}

impl fmt::Debug for SenderResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

/// Builds an [`ApiError`] from the status, filling sub-code and message from
/// the body when there is one.
#[must_use]
pub fn default_error_handler(resp: &SenderResponse) -> Option<Error> {
    let mut api = ApiError::new(Code::from_http_status(resp.status), 0, "");
    if !resp.body.is_empty() {
        match resp.unmarshal::<ApiError>() {
            Ok(decoded) => {
                api.sub_code = decoded.sub_code;
                api.message = decoded.message;
            }
            Err(err) => return Some(err),
        }
    }
    Some(Error::new(api))
}

/// Client bound to one remote service.
#[derive(Debug, Clone)]
pub struct Sender {
    address: String,
    options: SenderOptions,
}

impl Sender {
    /// `address` is the scheme and authority, e.g. `http://orders:8080`.
    #[must_use]
    pub fn new(address: impl Into<String>, options: SenderOptions) -> Self {
        Self {
            address: address.into(),
            options,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends `req` and decodes a 2xx body into `T`.
    ///
    /// # Errors
    ///
    /// See [`Sender::send_with_response`]; decode failures are wrapped with
    /// the exchange's context.
    pub async fn send<T: DeserializeOwned>(&self, req: SenderRequest) -> Result<T, Error> {
        self.send_with_response(req).await?.unmarshal()
    }

    /// Sends `req` and returns the raw 2xx response.
    ///
    /// # Errors
    ///
    /// Transport and encoding failures, or whatever the error handler makes
    /// of a non-2xx response; all wrapped with the exchange's context.
    ///
    /// # Panics
    ///
    /// Panics if the error handler returns `None` for a non-2xx response.
    pub async fn send_with_response(&self, req: SenderRequest) -> Result<SenderResponse, Error> {
        let mut ctx = context(kv![
            "component",
            "http_sender",
            "method",
            "send",
            "address",
            &self.address,
            "http_method",
            req.method.as_str(),
            "http_path",
            req.endpoint.format(),
        ]);

        let mut response = match self.exchange(req, &mut ctx).await {
            Ok(response) => response,
            Err(err) => return Err(wrap(err, ctx.data().to_vec())),
        };

        if response.status.is_success() {
            response.context = Some(ctx);
            return Ok(response);
        }
        match (self.options.error_handler)(&response) {
            Some(err) => Err(wrap(err, ctx.data().to_vec())),
            None => panic!(
                "{}",
                wrap(
                    Error::msg("HTTP sender error handler should return an error"),
                    ctx.data().to_vec(),
                )
            ),
        }
    }

    async fn exchange(
        &self,
        req: SenderRequest,
        ctx: &mut ErrorContext,
    ) -> Result<SenderResponse, Error> {
        let started = Instant::now();
        let SenderRequest {
            method,
            endpoint,
            mut headers,
            payload,
        } = req;

        let mut codec = Arc::clone(&self.options.default_codec);
        let mut body = Vec::new();
        if let Some(payload) = payload {
            if let Some(requested) = self.lookup(&headers) {
                codec = requested;
            }
            ctx.push("request_codec", codec.name());
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(codec.name())?);
            body = codec.marshal(&payload)?;
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_str(codec.name())?);
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_str(&self.options.user_agent)?);
        }

        let url = format!("{}{}", self.address, endpoint);
        let sent = self
            .options
            .client
            .request(method.clone(), url)
            .headers(headers)
            .body(body)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                let action = if err.is_builder() {
                    "http_new_request"
                } else {
                    "http_send_request"
                };
                ctx.push("action", action);
                return Err(err.into());
            }
        };

        let status = response.status();
        ctx.push("response_status", status.as_u16());
        let headers = response.headers().clone();
        if let Some(answered) = self.lookup(&headers) {
            codec = answered;
        }
        ctx.push("response_codec", codec.name());

        let read = response.bytes().await;
        if let Some(metrics) = &self.options.metrics {
            metrics
                .histogram(
                    "http_sender",
                    &[
                        ("address", self.address.clone()),
                        ("method", method.to_string()),
                        ("path", endpoint.format().to_owned()),
                        ("status", status.as_u16().to_string()),
                    ],
                )
                .record(started.elapsed().as_secs_f64());
        }
        let body = match read {
            Ok(body) => body,
            Err(err) => {
                ctx.push("action", "read_response_body");
                return Err(err.into());
            }
        };
        ctx.push("response_body", BASE64.encode(&body));

        Ok(SenderResponse {
            status,
            headers,
            body,
            codec,
            context: None,
        })
    }

    fn lookup(&self, headers: &HeaderMap) -> Option<Arc<dyn Codec>> {
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| parse_media_type(raw).ok())
            .and_then(|mime| self.options.codecs.get(&mime))
    }
}

#[async_trait]
impl Pinger for Sender {
    /// Succeeds only when the health path answers exactly 200.
    async fn ping(&self) -> Result<(), Error> {
        let mut ctx = context(kv![
            "component",
            "http_sender",
            "method",
            "ping",
            "address",
            &self.address,
        ]);
        let url = format!("{}{}", self.address, self.options.health_path);
        let response = match self.options.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                ctx.push("action", "send_request");
                return ctx.finish(Err(err));
            }
        };
        if response.status() != StatusCode::OK {
            ctx.push("response_status", response.status().as_u16());
            return ctx.finish(Err(Error::msg("service is not ready")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use corekit_core::apikit::ERR_ENTITY_NOT_FOUND;
    use corekit_core::testkit::assert_api_error;

    use super::*;

    fn response(status: StatusCode, body: &'static str) -> SenderResponse {
        SenderResponse::new(status, HeaderMap::new(), Bytes::from_static(body.as_bytes()), Arc::new(JsonCodec))
    }

    #[test]
    fn endpoint_fills_placeholders_in_order() {
        let endpoint = Endpoint::new("/users/{}/orders/{}").param(7).param("a-1");
        assert_eq!(endpoint.to_string(), "/users/7/orders/a-1");
        assert_eq!(endpoint.format(), "/users/{}/orders/{}");
    }

    #[test]
    fn endpoint_keeps_unfilled_placeholders() {
        assert_eq!(Endpoint::new("/a/{}/b/{}").param(1).to_string(), "/a/1/b/{}");
        assert_eq!(Endpoint::new("/plain").to_string(), "/plain");
    }

    #[test]
    fn default_error_handler_decodes_body() {
        let err = default_error_handler(&response(
            StatusCode::NOT_FOUND,
            r#"{"code":100002,"message":"entity not found"}"#,
        ))
        .unwrap();
        assert_api_error(&err, &ERR_ENTITY_NOT_FOUND);
    }

    #[test]
    fn default_error_handler_without_body_uses_status() {
        let err = default_error_handler(&response(StatusCode::SERVICE_UNAVAILABLE, "")).unwrap();
        let api = err.find::<ApiError>().unwrap();
        assert_eq!(api.code, Code::Unavailable);
        assert_eq!(api.sub_code, 0);
    }

    #[test]
    fn default_error_handler_reports_undecodable_body() {
        let err = default_error_handler(&response(StatusCode::BAD_GATEWAY, "<html>")).unwrap();
        assert!(!err.has::<ApiError>());
    }

    #[test]
    fn request_builder_sets_payload_and_headers() {
        let req = SenderRequest::new(Method::POST, Endpoint::new("/items"))
            .with_payload(&serde_json::json!({"name": "x"}))
            .unwrap()
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/msgpack"));
        assert_eq!(req.payload, Some(serde_json::json!({"name": "x"})));
        assert_eq!(req.headers[CONTENT_TYPE], "application/msgpack");
    }
}
