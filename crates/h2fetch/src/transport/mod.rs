//! Transport capability consumed by the session pool.
//!
//! The pool never speaks HTTP/2 itself. It drives a [`Connector`] that opens
//! multiplexed sessions, and each [`TransportSession`] opens independent
//! [`TransportStream`]s. Session-level failures are reported once through
//! [`TransportSession::closed`].
//!
//! [`H2Connector`] is the production binding over the `h2` crate; tests
//! substitute an in-memory implementation.

pub mod http2;
#[cfg(test)]
pub(crate) mod mock;
pub mod tls;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use h2::Reason;

use crate::error::TransportError;
use crate::origin::{Origin, Scheme};

pub use self::http2::H2Connector;
pub use self::tls::TlsConfig;

/// A boxed, `Send` future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Why a session stopped accepting streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection closed cleanly.
    Close,
    /// The peer asked us to stop opening new streams.
    GoAway,
    /// A transport error (I/O failure, failed ping).
    Error(String),
    /// The peer sent a malformed frame.
    FrameError,
    /// The transport's own idle timeout fired.
    Timeout,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Close => f.write_str("close"),
            SessionEvent::GoAway => f.write_str("goaway"),
            SessionEvent::Error(msg) => write!(f, "error: {msg}"),
            SessionEvent::FrameError => f.write_str("frame error"),
            SessionEvent::Timeout => f.write_str("timeout"),
        }
    }
}

/// Opens transport sessions to origins.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(
        &'a self,
        origin: &'a Origin,
    ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, TransportError>>;
}

/// One multiplexed connection to an origin.
pub trait TransportSession: Send + Sync + 'static {
    /// Open a new stream and send its request headers. When `end_of_stream`
    /// is set the request half is finished immediately.
    fn open_stream(
        &self,
        head: RequestHead,
        end_of_stream: bool,
    ) -> BoxFuture<'_, Result<Box<dyn TransportStream>, TransportError>>;

    /// Liveness probe; resolves when the peer acknowledges.
    fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Resolves once, when the session stops, with the reason.
    fn closed(&self) -> BoxFuture<'static, SessionEvent>;

    /// Begin closing the session. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// One request/response exchange on a session.
pub trait TransportStream: Send + 'static {
    /// Queue request body bytes.
    fn write(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Finish the request half of the stream.
    fn end(&mut self) -> Result<(), TransportError>;

    /// Wait for the response headers, including the `:status` pseudo-header.
    fn response(&mut self) -> BoxFuture<'_, Result<ResponseHead, TransportError>>;

    /// Next body chunk; `None` once the peer ended the stream.
    fn data(&mut self) -> BoxFuture<'_, Option<Result<Bytes, TransportError>>>;

    /// Close the stream with `code`, informing the peer.
    fn reset(&mut self, code: Reason);
}

/// Request headers as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub scheme: Scheme,
    pub authority: String,
    /// Path plus query.
    pub path: String,
    pub headers: Vec<(String, String)>,
}

/// Raw response headers. Pseudo-headers are kept, so `:status` is present
/// exactly as the peer sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
