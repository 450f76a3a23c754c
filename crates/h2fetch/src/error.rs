//! Error types for the fetch client.

use std::time::Duration;

use h2::Reason;
use thiserror::Error;

/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("stream reset by peer: {0}")]
    Reset(Reason),

    #[error("session received goaway: {0}")]
    GoAway(Reason),

    #[error("session closed")]
    SessionClosed,

    #[error("io error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<h2::Error> for TransportError {
    fn from(err: h2::Error) -> Self {
        if err.is_go_away() {
            return Self::GoAway(err.reason().unwrap_or(Reason::NO_ERROR));
        }
        if err.is_io() {
            return Self::Io(err.to_string());
        }
        match err.reason() {
            Some(reason) if err.is_reset() => Self::Reset(reason),
            _ => Self::Protocol(err.to_string()),
        }
    }
}

/// Errors surfaced to callers of [`FetchClient::fetch`](crate::FetchClient::fetch)
/// and the [`Response`](crate::Response) body methods.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The transport session to the origin could not be established.
    #[error("network error: {0}")]
    Network(#[source] TransportError),

    /// The response was malformed (missing or non-numeric status).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response headers arrived within the configured timeout. The stream
    /// was cancelled with `code`.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration, code: Reason },

    /// The stream failed after response headers were received.
    #[error("stream error: {0}")]
    Stream(#[source] TransportError),

    /// The stream failed before response headers arrived.
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A body-reading method was called after the body started draining.
    #[error("response body already used")]
    BodyUsed,

    /// The body was read after the stream was closed or destroyed.
    #[error("response body stream is closed")]
    BodyClosed,

    #[error("response body is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("response body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Returns `true` for a watchdog expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The stream close code carried by a timeout or a reset, if any.
    pub fn code(&self) -> Option<Reason> {
        match self {
            Self::Timeout { code, .. } => Some(*code),
            Self::Stream(TransportError::Reset(code)) | Self::Transport(TransportError::Reset(code)) => {
                Some(*code)
            }
            _ => None,
        }
    }
}
