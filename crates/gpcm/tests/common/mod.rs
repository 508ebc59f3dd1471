//! Shared test doubles: a scriptable login session, its factory, and an
//! in-memory transport fed by the test.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use gpcm::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =========================================================================
// MockSession
// =========================================================================

/// A login session whose handshake is driven by the test.
pub struct MockSession<T> {
    me: Weak<Self>,
    connection_id: ConnectionId,
    created_at: Instant,
    events: EventSender<Self>,
    stream: Mutex<Option<T>>,
    identity: Mutex<Option<PlayerId>>,
    completed: AtomicBool,
    started: AtomicBool,
    fail_start: AtomicBool,
    disconnected: AtomicBool,
    disposed: AtomicBool,
    reasons: Mutex<Vec<DisconnectReason>>,
    keep_alives: AtomicUsize,
    fail_keep_alive: AtomicBool,
}

impl<T: Send + 'static> MockSession<T> {
    pub fn new(stream: T, connection_id: ConnectionId, events: EventSender<Self>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            connection_id,
            created_at: Instant::now(),
            events,
            stream: Mutex::new(Some(stream)),
            identity: Mutex::new(None),
            completed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            reasons: Mutex::new(Vec::new()),
            keep_alives: AtomicUsize::new(0),
            fail_keep_alive: AtomicBool::new(false),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.me.upgrade().expect("session is alive while in use")
    }

    /// Finishes the handshake as `player_id` and reports it.
    pub fn complete_login(&self, player_id: PlayerId) {
        self.mark_completed(player_id);
        self.events.login_succeeded(self.arc());
    }

    /// Finishes the handshake without reporting it yet.
    pub fn mark_completed(&self, player_id: PlayerId) {
        *self.identity.lock() = Some(player_id);
        self.completed.store(true, Ordering::Release);
    }

    /// The client hung up on its own.
    pub fn peer_closed(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            self.events.disconnected(self.arc());
        }
    }

    pub fn disconnect_reasons(&self) -> Vec<DisconnectReason> {
        self.reasons.lock().clone()
    }

    pub fn keep_alives_sent(&self) -> usize {
        self.keep_alives.load(Ordering::Acquire)
    }

    pub fn set_keep_alive_failure(&self, fail: bool) {
        self.fail_keep_alive.store(fail, Ordering::Release);
    }

    pub fn set_start_failure(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Release);
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn has_stream(&self) -> bool {
        self.stream.lock().is_some()
    }
}

impl<T: Send + 'static> LoginSession for MockSession<T> {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn identity(&self) -> Option<PlayerId> {
        *self.identity.lock()
    }

    fn status(&self) -> LoginStatus {
        if self.completed.load(Ordering::Acquire) {
            LoginStatus::Completed
        } else {
            LoginStatus::InProgress
        }
    }

    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn start(&self) -> Result<(), SessionError> {
        if self.fail_start.load(Ordering::Acquire) {
            return Err(SessionError::StartFailed(self.connection_id, "scripted".into()));
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn send_keep_alive(&self) -> Result<(), SessionError> {
        if self.fail_keep_alive.load(Ordering::Acquire) {
            return Err(SessionError::SendFailed(self.connection_id, "broken pipe".into()));
        }
        self.keep_alives.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        self.reasons.lock().push(reason);
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            self.events.disconnected(self.arc());
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.stream.lock().take();
    }
}

// =========================================================================
// MockFactory
// =========================================================================

/// Builds [`MockSession`]s and remembers every one it built.
pub struct MockFactory<T> {
    sessions: Arc<Mutex<Vec<Arc<MockSession<T>>>>>,
    fail_next: Arc<AtomicBool>,
    fail_next_start: Arc<AtomicBool>,
}

impl<T> Clone for MockFactory<T> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            fail_next: Arc::clone(&self.fail_next),
            fail_next_start: Arc::clone(&self.fail_next_start),
        }
    }
}

impl<T> MockFactory<T> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(AtomicBool::new(false)),
            fail_next_start: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The next `create` hands the stream back.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    /// The next session built refuses to start.
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::Release);
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession<T>>> {
        self.sessions.lock().clone()
    }

    pub fn session(&self, id: u64) -> Arc<MockSession<T>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.connection_id == ConnectionId::new(id))
            .cloned()
            .unwrap_or_else(|| panic!("no session with id {id}"))
    }
}

impl<T: Send + Sync + 'static> SessionFactory for MockFactory<T> {
    type Stream = T;
    type Session = MockSession<T>;

    fn create(
        &self,
        stream: T,
        id: ConnectionId,
        events: EventSender<MockSession<T>>,
    ) -> Result<Arc<MockSession<T>>, Rejected<T>> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(Rejected {
                stream,
                error: SessionError::Construction(id, "scripted".into()),
            });
        }
        let session = MockSession::new(stream, id, events);
        if self.fail_next_start.swap(false, Ordering::AcqRel) {
            session.set_start_failure(true);
        }
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

// =========================================================================
// MockTransport
// =========================================================================

/// A stream handed out by [`MockTransport`], identified by a label.
#[derive(Debug, PartialEq, Eq)]
pub struct MockStream(pub u32);

impl Connection for MockStream {
    type Error = TransportError;

    async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000 + self.0 as u16))
    }
}

/// A transport whose "clients" are pushed in by the test.
#[derive(Clone)]
pub struct MockTransport {
    tx: mpsc::UnboundedSender<MockStream>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockStream>>>,
    released: Arc<Mutex<Vec<MockStream>>>,
    closed: CancellationToken,
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            released: Arc::new(Mutex::new(Vec::new())),
            closed: CancellationToken::new(),
        }
    }

    /// Simulates a client connecting.
    pub fn connect(&self, label: u32) {
        self.tx.send(MockStream(label)).expect("transport receiver alive");
    }

    /// Labels of the streams handed back through `release`.
    pub fn released(&self) -> Vec<u32> {
        self.released.lock().iter().map(|s| s.0).collect()
    }
}

impl Transport for MockTransport {
    type Connection = MockStream;
    type Error = TransportError;

    async fn accept(&self) -> Result<MockStream, TransportError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Shutdown),
            stream = rx.recv() => stream.ok_or(TransportError::Shutdown),
        }
    }

    fn release(&self, conn: MockStream) {
        self.released.lock().push(conn);
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 29900)))
    }
}

// =========================================================================
// Helpers
// =========================================================================

/// Polls `cond` until it holds, yielding to other tasks in between.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never held: {what}");
}

/// A config suited to tests: short timeouts are set per test.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    }
}
