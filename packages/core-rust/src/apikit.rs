//! Business errors: stable codes, sub-codes, and the code ↔ HTTP status table.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stable API error codes (gRPC numbering).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Code {
    Canceled = 1,
    #[default]
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Converts a raw numeric code. `None` for values outside the table.
    #[must_use]
    pub fn from_u32(raw: u32) -> Option<Code> {
        let code = match raw {
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// The transport status suggested for this code.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::Canceled => StatusCode::REQUEST_TIMEOUT,
            Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Reverse mapping. 409 maps back to `AlreadyExists` only; statuses
    /// outside the table map to `Internal`.
    #[must_use]
    pub fn from_http_status(status: StatusCode) -> Code {
        match status {
            StatusCode::REQUEST_TIMEOUT => Code::Canceled,
            StatusCode::INTERNAL_SERVER_ERROR => Code::Internal,
            StatusCode::BAD_REQUEST => Code::InvalidArgument,
            StatusCode::GATEWAY_TIMEOUT => Code::DeadlineExceeded,
            StatusCode::NOT_FOUND => Code::NotFound,
            StatusCode::CONFLICT => Code::AlreadyExists,
            StatusCode::FORBIDDEN => Code::PermissionDenied,
            StatusCode::UNAUTHORIZED => Code::Unauthenticated,
            StatusCode::TOO_MANY_REQUESTS => Code::ResourceExhausted,
            StatusCode::PRECONDITION_FAILED => Code::FailedPrecondition,
            StatusCode::NOT_IMPLEMENTED => Code::Unimplemented,
            StatusCode::SERVICE_UNAVAILABLE => Code::Unavailable,
            other => {
                warn!(status = other.as_u16(), "unknown HTTP status, mapping to internal");
                Code::Internal
            }
        }
    }
}

/// Maps a raw numeric code to a transport status; unknown codes yield 500.
#[must_use]
pub fn status_from_raw_code(raw: u32) -> StatusCode {
    if let Some(code) = Code::from_u32(raw) {
        code.http_status()
    } else {
        warn!(code = raw, "unknown API error code, mapping to 500");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown error code")]
pub struct ParseCodeError(());

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

/// A terminal business error.
///
/// Serialized as `{"code": <sub_code>, "message": <message>}`. The stable
/// [`Code`] travels out-of-band as the transport status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("API error (code: {code} sub_code: {sub_code} message: {message})")]
pub struct ApiError {
    #[serde(skip)]
    pub code: Code,
    #[serde(rename = "code", default)]
    pub sub_code: i64,
    #[serde(default)]
    pub message: Cow<'static, str>,
}

impl ApiError {
    #[must_use]
    pub fn new(code: Code, sub_code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            sub_code,
            message: message.into(),
        }
    }

    /// Suggested transport status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Same error with a different message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = message.into();
        self
    }
}

const fn common(code: Code, sub_code: i64, message: &'static str) -> ApiError {
    ApiError {
        code,
        sub_code,
        message: Cow::Borrowed(message),
    }
}

pub const ERR_INTERNAL_SERVER: ApiError = common(Code::Internal, 100_000, "internal server error");
pub const ERR_SERVICE_UNAVAILABLE: ApiError =
    common(Code::Unavailable, 100_001, "service unavailable");
pub const ERR_ENTITY_NOT_FOUND: ApiError = common(Code::NotFound, 100_002, "entity not found");
pub const ERR_DECODE_REQUEST: ApiError =
    common(Code::InvalidArgument, 100_100, "invalid request format");
pub const ERR_UNSUPPORTED_CODEC: ApiError =
    common(Code::InvalidArgument, 100_101, "unsupported encoded format");
pub const ERR_PERMISSION_DENIED: ApiError = common(
    Code::PermissionDenied,
    100_200,
    "sender doesn't have permission to execute the operation",
);
pub const ERR_REQUEST_UNAUTHENTICATED: ApiError = common(
    Code::Unauthenticated,
    100_300,
    "authorization token is invalid",
);
