//! In-memory transport for unit tests.
//!
//! Routes are keyed by request path. Every opened session and stream records
//! what happened to it so tests can assert on pings, resets and written
//! bodies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use h2::Reason;
use tokio::sync::watch;

use super::{
    BoxFuture, Connector, RequestHead, ResponseHead, SessionEvent, TransportSession,
    TransportStream,
};
use crate::error::TransportError;
use crate::origin::Origin;

/// Canned response for a path.
#[derive(Debug, Clone)]
pub struct MockRoute {
    /// Raw `:status` value; `None` omits the pseudo-header.
    pub status: Option<String>,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,
    /// Delay before response headers are produced.
    pub delay: Duration,
    /// Fail the stream before headers with this reset code.
    pub reset_before_headers: Option<Reason>,
    /// Fail the stream after the body chunks with this reset code.
    pub reset_after_body: Option<Reason>,
    /// Never end the body; `data()` stays pending after the chunks.
    pub hang_body: bool,
}

impl MockRoute {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    pub fn status(code: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status: Some(code.to_string()),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            chunks: vec![body.into()],
            delay: Duration::ZERO,
            reset_before_headers: None,
            reset_after_body: None,
            hang_body: false,
        }
    }

    pub fn chunked(chunks: &[&'static str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect(),
            ..Self::ok(Bytes::new())
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn raw_status(mut self, status: Option<&str>) -> Self {
        self.status = status.map(str::to_string);
        self
    }
}

/// Shared record of one stream's activity.
#[derive(Debug, Default)]
pub struct StreamLog {
    pub head: Mutex<Option<RequestHead>>,
    pub end_on_open: AtomicBool,
    pub written: Mutex<Vec<u8>>,
    pub ended: AtomicBool,
    pub resets: Mutex<Vec<Reason>>,
}

/// Shared record of one session's activity.
pub struct MockSessionState {
    pub origin: Origin,
    pub pings: AtomicUsize,
    pub fail_pings: AtomicBool,
    pub streams: Mutex<Vec<Arc<StreamLog>>>,
    events: watch::Sender<Option<SessionEvent>>,
    routes: Arc<Mutex<HashMap<String, MockRoute>>>,
}

impl MockSessionState {
    /// Simulate a session-level event from the peer.
    pub fn emit(&self, event: SessionEvent) {
        self.events.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(event);
            true
        });
    }

    pub fn is_closed(&self) -> bool {
        self.events.borrow().is_some()
    }

    pub fn stream(&self, index: usize) -> Arc<StreamLog> {
        Arc::clone(&self.streams.lock().unwrap()[index])
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}

pub struct MockConnector {
    connects: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    routes: Arc<Mutex<HashMap<String, MockRoute>>>,
    sessions: Mutex<Vec<Arc<MockSessionState>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            routes: Arc::new(Mutex::new(HashMap::new())),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn route(&self, path: &str, route: MockRoute) {
        self.routes.lock().unwrap().insert(path.to_string(), route);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: usize) -> Arc<MockSessionState> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }
}

impl Connector for MockConnector {
    fn connect<'a>(
        &'a self,
        origin: &'a Origin,
    ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, TransportError>> {
        Box::pin(async move {
            let delay = *self.connect_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".to_string()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);

            let (events, _) = watch::channel(None);
            let state = Arc::new(MockSessionState {
                origin: origin.clone(),
                pings: AtomicUsize::new(0),
                fail_pings: AtomicBool::new(false),
                streams: Mutex::new(Vec::new()),
                events,
                routes: Arc::clone(&self.routes),
            });
            self.sessions.lock().unwrap().push(Arc::clone(&state));
            Ok(Box::new(MockSession { state }) as Box<dyn TransportSession>)
        })
    }
}

struct MockSession {
    state: Arc<MockSessionState>,
}

impl TransportSession for MockSession {
    fn open_stream(
        &self,
        head: RequestHead,
        end_of_stream: bool,
    ) -> BoxFuture<'_, Result<Box<dyn TransportStream>, TransportError>> {
        Box::pin(async move {
            if self.state.is_closed() {
                return Err(TransportError::SessionClosed);
            }
            let route = self
                .state
                .routes
                .lock()
                .unwrap()
                .get(&head.path)
                .cloned()
                .unwrap_or_else(|| MockRoute::status(404, Bytes::new()));

            let log = Arc::new(StreamLog::default());
            log.end_on_open.store(end_of_stream, Ordering::SeqCst);
            *log.head.lock().unwrap() = Some(head);
            self.state.streams.lock().unwrap().push(Arc::clone(&log));

            Ok(Box::new(MockStream {
                chunks: route.chunks.iter().cloned().collect(),
                route,
                log,
                responded: false,
            }) as Box<dyn TransportStream>)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.state.pings.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_pings.load(Ordering::SeqCst) {
                return Err(TransportError::Io("ping timed out".to_string()));
            }
            Ok(())
        })
    }

    fn closed(&self) -> BoxFuture<'static, SessionEvent> {
        let mut events = self.state.events.subscribe();
        Box::pin(async move {
            match events.wait_for(Option::is_some).await {
                Ok(event) => event.clone().unwrap_or(SessionEvent::Close),
                Err(_) => SessionEvent::Close,
            }
        })
    }

    fn close(&self) {
        self.state.emit(SessionEvent::Close);
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

struct MockStream {
    route: MockRoute,
    chunks: VecDeque<Bytes>,
    log: Arc<StreamLog>,
    responded: bool,
}

impl TransportStream for MockStream {
    fn write(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.log.written.lock().unwrap().extend_from_slice(&data);
        Ok(())
    }

    fn end(&mut self) -> Result<(), TransportError> {
        self.log.ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn response(&mut self) -> BoxFuture<'_, Result<ResponseHead, TransportError>> {
        Box::pin(async move {
            if !self.route.delay.is_zero() {
                tokio::time::sleep(self.route.delay).await;
            }
            if let Some(code) = self.route.reset_before_headers {
                return Err(TransportError::Reset(code));
            }
            self.responded = true;

            let mut headers = Vec::new();
            if let Some(status) = &self.route.status {
                headers.push((":status".to_string(), status.clone()));
            }
            headers.extend(self.route.headers.iter().cloned());
            Ok(ResponseHead { headers })
        })
    }

    fn data(&mut self) -> BoxFuture<'_, Option<Result<Bytes, TransportError>>> {
        Box::pin(async move {
            if !self.responded {
                return None;
            }
            if let Some(chunk) = self.chunks.pop_front() {
                return Some(Ok(chunk));
            }
            if let Some(code) = self.route.reset_after_body.take() {
                return Some(Err(TransportError::Reset(code)));
            }
            if self.route.hang_body {
                std::future::pending::<()>().await;
            }
            None
        })
    }

    fn reset(&mut self, code: Reason) {
        self.log.resets.lock().unwrap().push(code);
        self.chunks.clear();
    }
}
