//! Request and response bodies.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use h2::Reason;
use tracing::trace;

use crate::config::EvictionPolicy;
use crate::error::{FetchError, Result, TransportError};
use crate::pool::{Session, SessionPool, StreamGuard};
use crate::transport::TransportStream;

/// Bytes sent as the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestBody(Bytes);

impl RequestBody {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Where a response body stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// Headers received, no data read yet.
    Open,
    /// At least one read has started.
    Draining,
    /// The peer ended the stream.
    Ended,
    /// The stream was destroyed or failed.
    Destroyed,
}

/// Session release to run once the body reaches end-of-stream.
struct ReleaseOnEnd {
    pool: SessionPool,
    policy: EvictionPolicy,
}

/// The response body: a single-use stream of bytes.
///
/// Read it incrementally with [`chunk`](Body::chunk) or all at once with
/// [`buffer`](Body::buffer). The stream drains exactly once; a buffered read
/// after draining has started fails with [`FetchError::BodyUsed`].
pub struct Body {
    stream: Option<Box<dyn TransportStream>>,
    guard: Option<StreamGuard>,
    session: Arc<Session>,
    state: BodyState,
    closed: bool,
    destroyed: bool,
    release_on_end: Option<ReleaseOnEnd>,
}

impl Body {
    pub(crate) fn new(stream: Box<dyn TransportStream>, guard: StreamGuard) -> Self {
        let session = Arc::clone(guard.session());
        Self {
            stream: Some(stream),
            guard: Some(guard),
            session,
            state: BodyState::Open,
            closed: false,
            destroyed: false,
            release_on_end: None,
        }
    }

    /// Destroy the stream and release its session once the body ends.
    pub(crate) fn release_on_end(&mut self, pool: SessionPool, policy: EvictionPolicy) {
        self.release_on_end = Some(ReleaseOnEnd { pool, policy });
    }

    pub fn state(&self) -> BodyState {
        self.state
    }

    /// `true` after [`close`](Body::close) or [`destroy`](Body::destroy).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// The session this body's stream runs on.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Next chunk of body data, or `None` at end-of-stream.
    ///
    /// Fails with [`FetchError::Stream`] when the stream errors or its
    /// session is torn down, and with [`FetchError::BodyClosed`] after the
    /// body was closed or destroyed.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.state == BodyState::Ended {
            return Ok(None);
        }
        if self.closed {
            return Err(FetchError::BodyClosed);
        }
        let session_closed = self.session.closed();
        let Some(stream) = self.stream.as_mut() else {
            return Err(FetchError::BodyClosed);
        };
        self.state = BodyState::Draining;

        let next = tokio::select! {
            biased;
            next = stream.data() => next,
            _ = session_closed => Some(Err(TransportError::SessionClosed)),
        };

        match next {
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => {
                trace!(session_id = self.session.id(), error = %e, "response body failed");
                self.abort(Reason::CANCEL);
                Err(FetchError::Stream(e))
            }
            None => {
                self.finish();
                Ok(None)
            }
        }
    }

    /// Drain the stream into one contiguous buffer.
    ///
    /// Single-shot: nothing is cached, and a failure mid-way discards the
    /// partial data.
    pub async fn buffer(&mut self) -> Result<Bytes> {
        match self.state {
            BodyState::Open if !self.closed => {}
            BodyState::Open | BodyState::Destroyed => return Err(FetchError::BodyClosed),
            BodyState::Draining | BodyState::Ended => return Err(FetchError::BodyUsed),
        }

        let mut buf = BytesMut::new();
        while let Some(data) = self.chunk().await? {
            buf.extend_from_slice(&data);
        }
        Ok(buf.freeze())
    }

    /// Close the stream with `NO_ERROR`. The stream is closed but not
    /// destroyed, and the session is untouched.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.state != BodyState::Ended {
            if let Some(stream) = self.stream.as_mut() {
                stream.reset(Reason::NO_ERROR);
            }
        }
        self.closed = true;
        trace!(session_id = self.session.id(), "response body closed");
    }

    /// Cancel the stream and drop it. Leaves the session alone; see
    /// [`Response::destroy`](crate::Response::destroy) for the variant that
    /// also evicts it.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        let code = if self.closed || self.state == BodyState::Ended {
            None
        } else {
            Some(Reason::CANCEL)
        };
        self.abort_with(code);
        trace!(session_id = self.session.id(), "response body destroyed");
    }

    fn abort(&mut self, code: Reason) {
        self.abort_with(Some(code));
    }

    fn abort_with(&mut self, code: Option<Reason>) {
        if let (Some(stream), Some(code)) = (self.stream.as_mut(), code) {
            stream.reset(code);
        }
        self.stream = None;
        self.guard = None;
        self.closed = true;
        self.destroyed = true;
        self.state = BodyState::Destroyed;
    }

    fn finish(&mut self) {
        self.state = BodyState::Ended;
        self.guard = None;
        if let Some(release) = self.release_on_end.take() {
            self.abort_with(None);
            release.pool.release(&self.session, release.policy);
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("session_id", &self.session.id())
            .field("state", &self.state)
            .field("closed", &self.closed)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
