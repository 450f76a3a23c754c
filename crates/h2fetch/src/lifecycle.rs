//! Request lifecycle on an acquired session.
//!
//! `send` opens one stream, writes the request, and waits for response
//! headers under an optional watchdog:
//!
//! ```text
//! Idle -> HeadersSent -> AwaitingResponseHeaders -> ResponseHeadersReceived
//!                                                 \-> TimedOut | Errored
//! ```
//!
//! Once headers arrive the watchdog is gone; the returned [`Body`] owns the
//! rest of the stream's life.

use std::sync::Arc;
use std::time::Duration;

use h2::Reason;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::body::{Body, RequestBody};
use crate::error::{FetchError, Result, TransportError};
use crate::header::Headers;
use crate::pool::Session;
use crate::transport::{RequestHead, ResponseHead};

/// Everything needed to issue one request on a session.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: String,
    /// Path plus query, e.g. `/search?q=1`.
    pub path: String,
    pub headers: Headers,
    pub body: Option<RequestBody>,
    /// Watchdog on response-header arrival.
    pub timeout: Option<Duration>,
    /// Instant the watchdog fires. Derived from `timeout` at send time when
    /// unset; a caller that already spent part of the budget sets it.
    pub deadline: Option<Instant>,
}

impl PendingRequest {
    /// A `GET` for `path` with no headers, body or timeout.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            headers: Headers::new(),
            body: None,
            timeout: None,
            deadline: None,
        }
    }
}

/// Settled response headers plus the stream carrying the body.
#[derive(Debug)]
pub struct ResponseParts {
    pub status: u16,
    /// Regular headers only; pseudo-headers are stripped.
    pub headers: Headers,
    pub body: Body,
}

/// Issue `request` on `session` and wait for the response headers.
///
/// Errors before headers arrive are returned as they came from the
/// transport. On watchdog expiry the stream is reset with `CANCEL` and
/// [`FetchError::Timeout`] is returned.
pub async fn send(session: &Arc<Session>, request: PendingRequest) -> Result<ResponseParts> {
    let PendingRequest {
        method,
        path,
        headers,
        body,
        timeout,
        deadline,
    } = request;
    let watchdog = timeout.map(|after| {
        let at = deadline.unwrap_or_else(|| Instant::now() + after);
        (after, at)
    });

    let origin = session.origin();
    let head = RequestHead {
        method,
        scheme: origin.scheme(),
        authority: origin.authority(),
        path,
        headers: headers
            .into_vec()
            .into_iter()
            .filter(|h| !h.is_pseudo())
            .map(|h| (h.name, h.value))
            .collect(),
    };

    let body = body.filter(|b| !b.is_empty());
    trace!(
        %origin,
        session_id = session.id(),
        method = %head.method,
        path = %head.path,
        has_body = body.is_some(),
        "opening request stream"
    );
    let (mut stream, guard) = session.open_stream(head, body.is_none()).await?;

    if let Some(body) = body {
        stream.write(body.into_bytes())?;
        stream.end()?;
    }

    let session_closed = session.closed();
    let awaiting = async {
        tokio::select! {
            biased;
            head = stream.response() => head.map_err(FetchError::from),
            _ = session_closed => Err(FetchError::Transport(TransportError::SessionClosed)),
        }
    };
    let outcome = match watchdog {
        Some((after, at)) => tokio::time::timeout_at(at, awaiting).await.map_err(|_| after),
        None => Ok(awaiting.await),
    };

    let head = match outcome {
        Ok(head) => head?,
        Err(after) => {
            stream.reset(Reason::CANCEL);
            debug!(
                %origin,
                session_id = session.id(),
                timeout = ?after,
                "request timed out awaiting response headers"
            );
            return Err(FetchError::Timeout {
                after,
                code: Reason::CANCEL,
            });
        }
    };

    let status = match parse_status(&head) {
        Ok(status) => status,
        Err(reason) => {
            stream.reset(Reason::PROTOCOL_ERROR);
            return Err(FetchError::Protocol(reason));
        }
    };

    let headers: Headers = head
        .headers
        .into_iter()
        .filter(|(name, _)| !name.starts_with(':'))
        .collect();

    trace!(%origin, session_id = session.id(), status, "response headers received");
    Ok(ResponseParts {
        status,
        headers,
        body: Body::new(stream, guard),
    })
}

/// Read `:status` as a three-digit code.
fn parse_status(head: &ResponseHead) -> std::result::Result<u16, String> {
    let raw = head
        .get(":status")
        .ok_or_else(|| "response is missing the :status pseudo-header".to_string())?;
    raw.trim()
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=999).contains(code))
        .ok_or_else(|| format!("invalid :status '{raw}'"))
}
