//! Inbound request envelope handed to API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use corekit_core::apikit::{ERR_DECODE_REQUEST, ERR_UNSUPPORTED_CODEC};
use corekit_core::errors::{wrap, Error};
use corekit_core::{kv, Codec};
use serde::de::DeserializeOwned;

/// A buffered request bound to at most one body codec.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    pattern: Arc<str>,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body: Bytes,
    codec: Option<Arc<dyn Codec>>,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let pattern: Arc<str> = Arc::from(uri.path());
        Self {
            method,
            uri,
            pattern,
            headers,
            params: HashMap::new(),
            body,
            codec: None,
        }
    }

    /// Records the matched route pattern and the captured path parameters.
    #[must_use]
    pub fn with_route(mut self, pattern: Arc<str>, params: HashMap<String, String>) -> Self {
        self.pattern = pattern;
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Option<Arc<dyn Codec>>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The route pattern this request matched, e.g. `/users/{id}`.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `User-Agent` header, or an empty string.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Path parameter captured by the route pattern.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The codec resolved from `Content-Type`, if any.
    #[must_use]
    pub fn codec(&self) -> Option<&Arc<dyn Codec>> {
        self.codec.as_ref()
    }

    /// Decodes the body with the bound codec.
    ///
    /// # Errors
    ///
    /// Returns `ERR_UNSUPPORTED_CODEC` when no codec is bound and
    /// `ERR_DECODE_REQUEST` (with the decode failure as context) when the
    /// body does not decode into `T`.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let Some(codec) = &self.codec else {
            return Err(Error::new(ERR_UNSUPPORTED_CODEC));
        };
        codec.unmarshal(&self.body).map_err(|cause| {
            wrap(
                ERR_DECODE_REQUEST,
                kv!["component", "request", "cause", cause.to_string()],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use corekit_core::apikit::ApiError;
    use corekit_core::codec::{JsonCodec, StrictJsonCodec};
    use corekit_core::testkit::assert_api_error;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Item {
        name: String,
    }

    fn request(body: &'static [u8]) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("probe/1.0"));
        Request::new(
            Method::POST,
            Uri::from_static("/items/42?full=1"),
            headers,
            Bytes::from_static(body),
        )
    }

    #[test]
    fn accessors_expose_request_parts() {
        let params = HashMap::from([("id".to_owned(), "42".to_owned())]);
        let req = request(b"").with_route(Arc::from("/items/{id}"), params);
        assert_eq!(req.path(), "/items/42");
        assert_eq!(req.pattern(), "/items/{id}");
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.param("missing"), None);
        assert_eq!(req.user_agent(), "probe/1.0");
        assert_eq!(req.uri().query(), Some("full=1"));
    }

    #[test]
    fn unmarshal_without_codec_is_unsupported() {
        let err = request(br#"{"name":"x"}"#).unmarshal::<Item>().unwrap_err();
        assert_api_error(&err, &ERR_UNSUPPORTED_CODEC);
    }

    #[test]
    fn unmarshal_decodes_with_bound_codec() {
        let req = request(br#"{"name":"x"}"#).with_codec(Some(Arc::new(JsonCodec)));
        assert_eq!(req.unmarshal::<Item>().unwrap(), Item { name: "x".into() });
    }

    #[test]
    fn decode_failure_is_classified_and_keeps_cause() {
        let req = request(br#"{"name":"x","extra":1}"#).with_codec(Some(Arc::new(StrictJsonCodec)));
        let err = req.unmarshal::<Item>().unwrap_err();
        assert_api_error(&err, &ERR_DECODE_REQUEST);
        let cause = err.context().and_then(|ctx| ctx.get("cause")).unwrap();
        assert!(cause.to_string().contains("extra"));
        assert!(err.find::<ApiError>().is_some());
    }
}
