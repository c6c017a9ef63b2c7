//! Outbound response envelope and handler replies.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use corekit_core::Error;
use serde::Serialize;

/// Status, headers and an optional payload still to be encoded.
///
/// A status of `0` means "unset" and is rejected when the response is
/// encoded.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub payload: Option<serde_json::Value>,
}

impl Response {
    /// 200 with `payload`.
    #[must_use]
    pub fn ok(payload: serde_json::Value) -> Self {
        Self::with_status(StatusCode::OK.as_u16()).with_payload(payload)
    }

    /// 201 with no body.
    #[must_use]
    pub fn created() -> Self {
        Self::with_status(StatusCode::CREATED.as_u16())
    }

    /// 204 with no body.
    #[must_use]
    pub fn no_content() -> Self {
        Self::with_status(StatusCode::NO_CONTENT.as_u16())
    }

    #[must_use]
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets a header. A `Content-Type` set here selects the response codec.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// What an API handler produced on success.
#[derive(Debug, Clone)]
pub enum Reply {
    /// No result: answered with 201 and an empty body.
    Empty,
    /// A value answered with 200.
    Payload(serde_json::Value),
    /// A fully specified response, honoured as is.
    Response(Response),
}

impl Reply {
    /// Serializes `value` into a [`Reply::Payload`].
    ///
    /// # Errors
    ///
    /// Returns the serialization error.
    pub fn payload<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Reply::Payload(serde_json::to_value(value)?))
    }

    #[must_use]
    pub fn into_response(self) -> Response {
        match self {
            Reply::Empty => Response::created(),
            Reply::Payload(payload) => Response::ok(payload),
            Reply::Response(response) => response,
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

impl From<serde_json::Value> for Reply {
    fn from(payload: serde_json::Value) -> Self {
        Reply::Payload(payload)
    }
}

impl From<()> for Reply {
    fn from((): ()) -> Self {
        Reply::Empty
    }
}
