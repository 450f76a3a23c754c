//! Session pool — one long-lived transport session per origin.
//!
//! The `SessionPool` caches a single [`Session`] per [`Origin`]. Concurrent
//! acquirers of a cold origin share one connection attempt through a
//! per-slot placeholder. Each pooled session may run a keep-alive task that
//! pings on a fixed cadence, and a watcher task that tears the session down
//! when the transport reports close, goaway, error, frame error or timeout.
//!
//! Teardown is idempotent: it stops the keep-alive task, removes the session
//! from the pool (only if the slot still refers to it) and closes the
//! transport when it is still open.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::{ClientConfig, EvictionPolicy};
use crate::error::{FetchError, Result, TransportError};
use crate::origin::Origin;
use crate::transport::{Connector, RequestHead, TransportSession, TransportStream};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One multiplexed connection to an origin, shared by every request to it
/// while it stays open.
pub struct Session {
    id: u64,
    origin: Origin,
    transport: Box<dyn TransportSession>,
    /// Flips to `true` exactly once, on teardown.
    closed_tx: watch::Sender<bool>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
    active: AtomicUsize,
}

impl Session {
    fn new(id: u64, origin: Origin, transport: Box<dyn TransportSession>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            origin,
            transport,
            closed_tx,
            keep_alive: Mutex::new(None),
            active: AtomicUsize::new(0),
        }
    }

    /// Pool-unique identifier, useful for telling a replacement session apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// `true` until the session is torn down or its transport stops.
    pub fn is_open(&self) -> bool {
        !*self.closed_tx.borrow() && !self.transport.is_closed()
    }

    /// Number of streams currently open on this session.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a keep-alive task is running for this session.
    pub fn has_keep_alive(&self) -> bool {
        lock(&self.keep_alive).is_some()
    }

    /// Resolves once the session has been torn down.
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut closed_rx = self.closed_tx.subscribe();
        async move {
            let _ = closed_rx.wait_for(|closed| *closed).await;
        }
    }

    /// Open a stream and register it as active until the guard drops.
    pub(crate) async fn open_stream(
        self: &Arc<Self>,
        head: RequestHead,
        end_of_stream: bool,
    ) -> std::result::Result<(Box<dyn TransportStream>, StreamGuard), TransportError> {
        if *self.closed_tx.borrow() {
            return Err(TransportError::SessionClosed);
        }
        let stream = self.transport.open_stream(head, end_of_stream).await?;
        Ok((stream, StreamGuard::new(Arc::clone(self))))
    }

    /// Returns `true` only for the call that performed the transition.
    fn mark_closed(&self) -> bool {
        self.closed_tx.send_if_modified(|closed| {
            if *closed {
                return false;
            }
            *closed = true;
            true
        })
    }

    fn stop_keep_alive(&self) {
        if let Some(handle) = lock(&self.keep_alive).take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("open", &self.is_open())
            .field("active_streams", &self.active_streams())
            .finish()
    }
}

/// Counts a stream as active on its session for as long as it lives.
pub(crate) struct StreamGuard {
    session: Arc<Session>,
}

impl StreamGuard {
    fn new(session: Arc<Session>) -> Self {
        session.active.fetch_add(1, Ordering::SeqCst);
        Self { session }
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.session.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A pool entry. The cell is the connecting placeholder: it exists before
/// the connection does, so concurrent acquirers await the same attempt.
#[derive(Clone)]
struct Slot {
    id: u64,
    cell: Arc<OnceCell<Arc<Session>>>,
}

/// An acquirer's hold on a slot while its connect is in flight.
///
/// Dropped without a session (connect failed or the acquire was cancelled)
/// and with no other acquirer waiting, the empty slot is removed.
struct PendingSlot<'a> {
    inner: &'a PoolInner,
    origin: &'a Origin,
    slot: Slot,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.slot.cell.initialized() {
            return;
        }
        let mut slots = lock(&self.inner.slots);
        // One reference in the map, one here.
        let abandoned = slots.get(self.origin).is_some_and(|slot| {
            slot.id == self.slot.id && Arc::strong_count(&self.slot.cell) == 2
        });
        if abandoned {
            slots.remove(self.origin);
            trace!(origin = %self.origin, slot_id = self.slot.id, "dropped empty slot");
        }
    }
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    slots: Mutex<HashMap<Origin, Slot>>,
    next_id: AtomicU64,
    connect_timeout: Option<Duration>,
}

/// Caches one [`Session`] per [`Origin`].
///
/// Cloning is cheap; clones share the same cache. Independent pools never
/// share sessions. Dropping the last handle closes every pooled session.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                connect_timeout: config.connect_timeout,
            }),
        }
    }

    /// Return the open session for `origin`, connecting if there is none.
    ///
    /// A reused session is returned unchanged: its keep-alive cadence is the
    /// one it was created with. `cadence` of `None` or zero starts no pings.
    pub async fn acquire(&self, origin: &Origin, cadence: Option<Duration>) -> Result<Arc<Session>> {
        loop {
            let pending = PendingSlot {
                inner: &self.inner,
                origin,
                slot: self.inner.slot_for(origin),
            };
            let id = pending.slot.id;
            let session = pending
                .slot
                .cell
                .get_or_try_init(|| self.inner.connect(origin, id, cadence))
                .await?;

            if session.is_open() {
                trace!(%origin, session_id = session.id, "reusing pooled session");
                return Ok(Arc::clone(session));
            }
            self.inner.teardown(session, "stale");
        }
    }

    /// Tear down `session` and remove it from the pool. Idempotent.
    pub fn evict(&self, session: &Session) {
        self.inner.teardown(session, "evicted");
    }

    /// Apply a keep-alive opt-out to `session` under `policy`.
    pub fn release(&self, session: &Session, policy: EvictionPolicy) {
        match policy {
            EvictionPolicy::Always => self.inner.teardown(session, "keep-alive disabled"),
            EvictionPolicy::WhenIdle => {
                let active = session.active_streams();
                if active == 0 {
                    self.inner.teardown(session, "keep-alive disabled, session idle");
                } else {
                    debug!(
                        origin = %session.origin,
                        session_id = session.id,
                        active,
                        "keep-alive disabled but session busy, keeping it"
                    );
                }
            }
        }
    }

    /// The open pooled session for `origin`, if any.
    pub fn get(&self, origin: &Origin) -> Option<Arc<Session>> {
        let slot = lock(&self.inner.slots).get(origin).cloned()?;
        slot.cell.get().filter(|s| s.is_open()).cloned()
    }

    pub fn contains(&self, origin: &Origin) -> bool {
        self.get(origin).is_some()
    }

    /// Number of connected sessions in the pool.
    pub fn len(&self) -> usize {
        lock(&self.inner.slots)
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every pooled session.
    pub fn close_all(&self) {
        self.inner.close_all();
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origins: Vec<String> = lock(&self.inner.slots)
            .keys()
            .map(ToString::to_string)
            .collect();
        f.debug_struct("SessionPool")
            .field("origins", &origins)
            .field("connect_timeout", &self.inner.connect_timeout)
            .finish()
    }
}

impl PoolInner {
    fn slot_for(&self, origin: &Origin) -> Slot {
        lock(&self.slots)
            .entry(origin.clone())
            .or_insert_with(|| Slot {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                cell: Arc::new(OnceCell::new()),
            })
            .clone()
    }

    async fn connect(
        self: &Arc<Self>,
        origin: &Origin,
        id: u64,
        cadence: Option<Duration>,
    ) -> Result<Arc<Session>> {
        debug!(%origin, session_id = id, "opening session");

        let attempt = self.connector.connect(origin);
        let transport = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
                FetchError::Network(TransportError::Connect(format!(
                    "connect to {origin} timed out after {limit:?}"
                )))
            })?,
            None => attempt.await,
        }
        .map_err(|e| {
            debug!(%origin, session_id = id, error = %e, "session connect failed");
            FetchError::Network(e)
        })?;

        let session = Arc::new(Session::new(id, origin.clone(), transport));
        self.spawn_watcher(&session);
        if let Some(every) = cadence.filter(|d| !d.is_zero()) {
            self.spawn_keep_alive(&session, every);
        }

        debug!(
            %origin,
            session_id = id,
            keep_alive = ?cadence,
            "session established"
        );
        Ok(session)
    }

    /// Tear the session down when its transport reports a session event.
    fn spawn_watcher(self: &Arc<Self>, session: &Arc<Session>) {
        let closed = session.transport.closed();
        let pool = Arc::downgrade(self);
        let weak_session = Arc::downgrade(session);

        tokio::spawn(async move {
            let event = closed.await;
            let Some(session) = weak_session.upgrade() else {
                return;
            };
            match pool.upgrade() {
                Some(pool) => pool.teardown(&session, &event.to_string()),
                None => {
                    session.mark_closed();
                }
            }
        });
    }

    fn spawn_keep_alive(self: &Arc<Self>, session: &Arc<Session>, every: Duration) {
        let pool: Weak<PoolInner> = Arc::downgrade(self);
        let weak_session = Arc::downgrade(session);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(session) = weak_session.upgrade() else {
                    break;
                };
                match session.transport.ping().await {
                    Ok(()) => trace!(origin = %session.origin, session_id = session.id, "keep-alive ping acked"),
                    Err(e) => {
                        warn!(
                            origin = %session.origin,
                            session_id = session.id,
                            error = %e,
                            "keep-alive ping failed, closing session"
                        );
                        if let Some(pool) = pool.upgrade() {
                            pool.teardown(&session, "keep-alive ping failed");
                        }
                        break;
                    }
                }
            }
        });

        *lock(&session.keep_alive) = Some(handle);
    }

    fn teardown(&self, session: &Session, reason: &str) {
        if !session.mark_closed() {
            return;
        }
        session.stop_keep_alive();

        {
            let mut slots = lock(&self.slots);
            if slots
                .get(&session.origin)
                .is_some_and(|slot| slot.id == session.id)
            {
                slots.remove(&session.origin);
            }
        }

        if !session.transport.is_closed() {
            session.transport.close();
        }

        debug!(
            origin = %session.origin,
            session_id = session.id,
            reason,
            "session torn down"
        );
    }

    fn close_all(&self) {
        let drained: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        let mut closed = 0usize;
        for slot in drained {
            if let Some(session) = slot.cell.get() {
                self.teardown(session, "pool closed");
                closed += 1;
            }
        }
        if closed > 0 {
            info!(sessions = closed, "session pool closed");
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.close_all();
    }
}
