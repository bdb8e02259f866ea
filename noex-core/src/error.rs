//! Error types for noex
//!
//! Every fallible operation in the workspace returns [`Result`], whose error
//! side is the single [`Error`] enum below. Two shapes of failure exist:
//!
//! - **Local failures**: timeouts, lost connections, malformed frames. These
//!   are produced by the client itself.
//! - **Server failures**: an `error` reply from the server, carried verbatim
//!   as [`ServerErrorData`] so callers can branch on the server's code.
//!
//! `Error` is `Clone` because one connection loss fans out to every pending
//! request and to the event listeners at the same time.
//!
//! # Examples
//!
//! ```rust
//! use noex_core::{Error, ServerErrorData};
//!
//! let err = Error::Server(ServerErrorData::new("NOT_FOUND", "No such bucket"));
//! assert_eq!(err.code(), "NOT_FOUND");
//!
//! let err = Error::Disconnected("Connection lost".into());
//! assert_eq!(err.code(), "DISCONNECTED");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for noex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for noex operations
///
/// # Error Categories
///
/// - **Server**: the server answered the request with an `error` frame
/// - **Request lifecycle**: RequestTimeout, UnexpectedResponse, InvalidRequest
/// - **Transport**: Disconnected, Connection, WebSocket
/// - **Processing**: Serialization, Internal
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The server rejected the request
    ///
    /// Holds the server's code, message and optional details unchanged.
    #[error("Server error: {0}")]
    Server(#[from] ServerErrorData),

    /// No response arrived within the request timeout
    #[error("{0}")]
    RequestTimeout(String),

    /// The client is not connected, or the connection went away while the
    /// request was pending
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Establishing the connection failed (handshake, connect timeout,
    /// welcome timeout)
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A reply matched a pending request but was neither `result` nor `error`
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The request could not be built (for example a non-object payload)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire-style error code
    ///
    /// Server errors yield the server's own code; local errors map to a fixed
    /// upper-case identifier.
    pub fn code(&self) -> &str {
        match self {
            Error::Server(data) => &data.code,
            Error::RequestTimeout(_) => "TIMEOUT",
            Error::Disconnected(_) => "DISCONNECTED",
            Error::Connection(_) => "CONNECTION_FAILED",
            Error::WebSocket(_) => "WEBSOCKET_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::UnexpectedResponse(_) => "UNEXPECTED_RESPONSE",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error was caused by losing (or never having) a connection
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Disconnected(_) | Error::Connection(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Error payload of a server `error` frame
///
/// Wire shape: `{"id":n,"type":"error","code":s,"message":s,"details":any?}`.
/// Missing `code` and `message` fields are filled with `UNKNOWN` and
/// `Unknown server error` by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerErrorData {
    /// Machine-readable error code chosen by the server
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional structured context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServerErrorData {
    /// Fallback code for error frames without a `code` field
    pub const UNKNOWN_CODE: &'static str = "UNKNOWN";

    /// Fallback message for error frames without a `message` field
    pub const UNKNOWN_MESSAGE: &'static str = "Unknown server error";

    /// Create error data without details
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create error data with structured details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl std::fmt::Display for ServerErrorData {
    /// Formats as "[code] message"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ServerErrorData {}
