//! Caller-facing error taxonomy.
//!
//! Every outcome of an API call is either a typed value or one of the
//! [`ApiError`] variants below. Response-derived variants keep the HTTP
//! status and raw body ([`ErrorResponse`]) for diagnostics.

use crate::transport::{HttpResponse, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error used to attach underlying causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error code the platform reports for version mismatches.
pub const CONCURRENT_MODIFICATION: &str = "ConcurrentModification";

/// One structured error entry from an error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// Machine-readable error code, e.g. `InvalidField`
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Field path the error refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Current resource version (version conflicts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
    /// Any further attributes of the entry, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ErrorDetail {
    /// Create an entry with a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            current_version: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a field path.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

/// Diagnostics captured from a non-successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,
    /// Top-level message from the body, if it could be parsed
    pub message: Option<String>,
    /// Structured error entries, in body order
    pub errors: Vec<ErrorDetail>,
    /// Raw response body
    pub body: String,
}

impl ErrorResponse {
    /// Capture a response, parsing the platform error shape when present.
    ///
    /// Bodies that are not in the error shape still produce a value with the
    /// raw body and no structured entries.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        let parsed: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
        Self {
            status: response.status,
            message: parsed.message,
            errors: parsed.errors,
            body: response.text(),
        }
    }

    /// Current version reported by a version conflict, if any.
    #[must_use]
    pub fn current_version(&self) -> Option<u64> {
        self.errors
            .iter()
            .find(|e| e.code == CONCURRENT_MODIFICATION && e.current_version.is_some())
            .or_else(|| self.errors.iter().find(|e| e.current_version.is_some()))
            .and_then(|e| e.current_version)
    }

    fn summary(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("status {}", self.status))
    }
}

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected or token exchange failed
    Unauthorized,
    /// Resource absent
    NotFound,
    /// Version mismatch
    Conflict,
    /// Validation errors
    InvalidInput,
    /// Too many requests
    RateLimited,
    /// 5xx response
    ServerError,
    /// No response (connect failure, timeout)
    Transport,
    /// Successful status with an undecodable body
    MalformedPayload,
    /// Any other status
    Unknown,
    /// Client could not be constructed
    InvalidConfig,
}

/// Errors surfaced by the client runtime.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Credentials rejected, or a token could not be obtained
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// What was rejected
        message: String,
        /// Response diagnostics, when the rejection came with a response
        response: Option<Box<ErrorResponse>>,
        /// Underlying cause (e.g. transport failure during token exchange)
        #[source]
        source: Option<BoxError>,
    },

    /// Resource not found
    #[error("Resource not found: {}", .0.summary())]
    NotFound(Box<ErrorResponse>),

    /// Version mismatch on a write
    #[error("Concurrent modification (current version: {current_version:?})")]
    Conflict {
        /// Version the platform currently holds, if reported
        current_version: Option<u64>,
        /// Response diagnostics
        response: Box<ErrorResponse>,
    },

    /// Validation failed; carries every structured sub-error
    #[error("Invalid input: {} error(s)", errors.len())]
    InvalidInput {
        /// All reported validation errors
        errors: Vec<ErrorDetail>,
        /// Response diagnostics; `None` when rejected before dispatch
        response: Option<Box<ErrorResponse>>,
    },

    /// Too many requests
    #[error("Rate limited (retry after: {retry_after:?})")]
    RateLimited {
        /// `Retry-After` header, verbatim
        retry_after: Option<String>,
        /// Response diagnostics
        response: Box<ErrorResponse>,
    },

    /// 5xx response
    #[error("Server error: {}", .0.summary())]
    ServerError(Box<ErrorResponse>),

    /// No response was received
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Successful status but the body did not match the expected shape
    #[error("Malformed payload (status {}): {source}", response.status)]
    MalformedPayload {
        /// Response diagnostics
        response: Box<ErrorResponse>,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },

    /// Status outside the mapped table
    #[error("Unexpected status {}", .0.status)]
    Unknown(Box<ErrorResponse>),

    /// Client configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// Classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ServerError(_) => ErrorKind::ServerError,
            Self::Transport(_) => ErrorKind::Transport,
            Self::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            Self::Unknown(_) => ErrorKind::Unknown,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Response diagnostics, when the error came from a response.
    #[must_use]
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::NotFound(r) | Self::ServerError(r) | Self::Unknown(r) => Some(r),
            Self::Conflict { response, .. }
            | Self::RateLimited { response, .. }
            | Self::MalformedPayload { response, .. } => Some(response),
            Self::Unauthorized { response, .. } | Self::InvalidInput { response, .. } => {
                response.as_deref()
            }
            Self::Transport(_) | Self::InvalidConfig(_) => None,
        }
    }

    /// HTTP status of the originating response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    /// Raw body of the originating response.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.response().map(|r| r.body.as_str())
    }

    /// Check if the caller may reasonably retry the call unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError(_) | Self::Transport(_)
        )
    }

    /// Create an unauthorized error without response diagnostics.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            response: None,
            source: None,
        }
    }

    /// Create a pre-dispatch validation error with a single entry.
    #[must_use]
    pub fn invalid_request(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            errors: vec![ErrorDetail::new("InvalidRequest", message).with_field(field)],
            response: None,
        }
    }
}
