//! `LoginServer` builder, accept loop, admin surface and shutdown.
//!
//! This is the entry point for running a GPCM login server. It ties
//! together the layers: transport → session factory → connection registry,
//! plus the maintenance task and the session event pump.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use gpcm_session::{
    ConnectionId, DisconnectReason, EventReceiver, EventSender, LoginSession, PlayerId,
    Rejected, SessionEvent, SessionFactory, SessionStore, event_channel,
};
use gpcm_transport::{TcpConnection, TcpTransport, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DuplicateLoginPolicy, ServerConfig};
use crate::maintenance::{guarded, run_maintenance};
use crate::registry::{ConnectionRegistry, Promotion};
use crate::GpcmError;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Background tasks spawned by [`LoginServer::start`].
#[derive(Default)]
struct BackgroundTasks {
    maintenance: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

/// Shared server state behind every [`LoginServer`] handle.
struct Inner<T, F, P>
where
    T: Transport,
    F: SessionFactory<Stream = T::Connection>,
    P: SessionStore,
{
    transport: T,
    factory: F,
    store: P,
    config: ServerConfig,
    registry: Arc<ConnectionRegistry<F::Session>>,
    next_connection_id: AtomicU64,
    events: EventSender<F::Session>,
    /// Taken by the event pump when the server starts.
    event_rx: parking_lot::Mutex<Option<EventReceiver<F::Session>>>,
    accepting: AtomicBool,
    started: AtomicBool,
    shutdown_started: AtomicBool,
    accept_stop: CancellationToken,
    maintenance_stop: CancellationToken,
    events_stop: CancellationToken,
    /// Cancelled once the shutdown sequence has finished.
    stopped: CancellationToken,
    tasks: parking_lot::Mutex<BackgroundTasks>,
}

impl<T, F, P> Drop for Inner<T, F, P>
where
    T: Transport,
    F: SessionFactory<Stream = T::Connection>,
    P: SessionStore,
{
    fn drop(&mut self) {
        // Background tasks only hold the registry, so they would outlive
        // the last handle without this.
        self.accept_stop.cancel();
        self.maintenance_stop.cancel();
        self.events_stop.cancel();
    }
}

/// Builder for a [`LoginServer`] listening on TCP.
///
/// # Example
///
/// ```rust,ignore
/// use gpcm::prelude::*;
///
/// let server = LoginServerBuilder::new()
///     .bind("0.0.0.0:29900")
///     .build(MySessionFactory::new(db.clone()), MySessionStore::new(db))
///     .await?;
/// server.run().await
/// ```
pub struct LoginServerBuilder {
    config: ServerConfig,
    bind_addr: Option<String>,
}

impl LoginServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            bind_addr: None,
        }
    }

    /// Sets the address to bind the server to. Takes precedence over
    /// [`ServerConfig::bind_addr`].
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = Some(addr.to_string());
        self
    }

    /// Sets the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the TCP transport and builds the server.
    pub async fn build<F, P>(
        self,
        factory: F,
        store: P,
    ) -> Result<LoginServer<TcpTransport, F, P>, GpcmError>
    where
        F: SessionFactory<Stream = TcpConnection>,
        P: SessionStore,
    {
        let mut config = self.config.validated();
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        let transport = TcpTransport::bind(config.transport_config()).await?;
        Ok(LoginServer::new(transport, factory, store, config))
    }
}

impl Default for LoginServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A GPCM login server.
///
/// Cheap to clone: every clone is a handle to the same server. Call
/// [`run()`](Self::run) to start accepting connections and
/// [`shutdown()`](Self::shutdown) to stop.
pub struct LoginServer<T, F, P>
where
    T: Transport,
    F: SessionFactory<Stream = T::Connection>,
    P: SessionStore,
{
    inner: Arc<Inner<T, F, P>>,
}

impl<T, F, P> Clone for LoginServer<T, F, P>
where
    T: Transport,
    F: SessionFactory<Stream = T::Connection>,
    P: SessionStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, F, P> LoginServer<T, F, P>
where
    T: Transport,
    F: SessionFactory<Stream = T::Connection>,
    P: SessionStore,
{
    /// Creates a server over an already bound transport.
    ///
    /// Nothing runs until [`start`](Self::start) or [`run`](Self::run).
    pub fn new(transport: T, factory: F, store: P, config: ServerConfig) -> Self {
        let config = config.validated();
        let (events, event_rx) = event_channel();

        Self {
            inner: Arc::new(Inner {
                transport,
                factory,
                store,
                config,
                registry: Arc::new(ConnectionRegistry::new()),
                next_connection_id: AtomicU64::new(1),
                events,
                event_rx: parking_lot::Mutex::new(Some(event_rx)),
                accepting: AtomicBool::new(true),
                started: AtomicBool::new(false),
                shutdown_started: AtomicBool::new(false),
                accept_stop: CancellationToken::new(),
                maintenance_stop: CancellationToken::new(),
                events_stop: CancellationToken::new(),
                stopped: CancellationToken::new(),
                tasks: parking_lot::Mutex::new(BackgroundTasks::default()),
            }),
        }
    }

    /// Spawns the session event pump and the maintenance task.
    ///
    /// Called by [`run`](Self::run); only needed directly when streams are
    /// fed through [`accept_stream`](Self::accept_stream). Idempotent, and
    /// a no-op once shutdown has begun.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.shutdown_started.load(Ordering::Acquire)
            || inner.started.swap(true, Ordering::AcqRel)
        {
            return;
        }

        let mut tasks = inner.tasks.lock();
        if let Some(rx) = inner.event_rx.lock().take() {
            tasks.pump = Some(tokio::spawn(pump_events(
                Arc::clone(&inner.registry),
                inner.config.duplicate_login_policy,
                rx,
                inner.events_stop.clone(),
            )));
        }
        tasks.maintenance = Some(tokio::spawn(run_maintenance(
            Arc::clone(&inner.registry),
            inner.config.tick_config(),
            inner.config.login_timeout(),
            inner.maintenance_stop.clone(),
        )));
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Returns [`GpcmError::ShutDown`] if the server was already shut down.
    pub async fn run(&self) -> Result<(), GpcmError> {
        let inner = &self.inner;
        if inner.shutdown_started.load(Ordering::Acquire) {
            return Err(GpcmError::ShutDown);
        }
        self.start();

        match inner.transport.local_addr() {
            Ok(addr) => info!(%addr, "GPCM server running"),
            Err(e) => info!(error = %e, "GPCM server running, local address unknown"),
        }

        loop {
            let accepted = tokio::select! {
                _ = inner.accept_stop.cancelled() => break,
                accepted = inner.transport.accept() => accepted,
            };

            match accepted {
                Ok(stream) => {
                    self.accept_stream(stream);
                }
                Err(e) => {
                    if inner.transport.is_closed() || inner.accept_stop.is_cancelled() {
                        break;
                    }
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        debug!("accept loop stopped");
        Ok(())
    }

    /// Turns an accepted stream into a registered, started login session.
    ///
    /// Returns the id assigned to the new session, or `None` if the stream
    /// was released instead. Failures are logged, never propagated.
    pub fn accept_stream(&self, stream: T::Connection) -> Option<ConnectionId> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::Acquire) {
            debug!("stream accepted during shutdown, releasing");
            inner.transport.release(stream);
            return None;
        }

        let connection_id =
            ConnectionId::new(inner.next_connection_id.fetch_add(1, Ordering::Relaxed));

        let session = match inner.factory.create(stream, connection_id, inner.events.clone()) {
            Ok(session) => session,
            Err(Rejected { stream, error }) => {
                warn!(%connection_id, error = %error, "session construction failed");
                inner.transport.release(stream);
                return None;
            }
        };

        // From here on the session owns the stream; `dispose` is its
        // release path.
        if let Err(e) = inner.registry.register_processing(Arc::clone(&session)) {
            error!(%connection_id, error = %e, "failed to register session");
            inner.registry.remove_processing_entry(&session);
            session.dispose();
            return None;
        }

        // Shutdown may have drained the registry since the check above.
        if !inner.accepting.load(Ordering::Acquire) {
            inner.registry.remove_processing_entry(&session);
            session.dispose();
            return None;
        }

        if let Err(e) = session.start() {
            warn!(%connection_id, error = %e, "session failed to start");
            inner.registry.remove_processing_entry(&session);
            session.dispose();
            return None;
        }

        debug!(%connection_id, "connection accepted");
        Some(connection_id)
    }

    /// Number of authenticated sessions.
    pub fn num_active_clients(&self) -> usize {
        self.inner.registry.active_count()
    }

    /// Number of sessions still in the login handshake.
    pub fn num_processing(&self) -> usize {
        self.inner.registry.processing_count()
    }

    /// Snapshot of the authenticated sessions. Later logins and
    /// disconnects do not affect the returned list.
    pub fn list_active_clients(&self) -> Vec<Arc<F::Session>> {
        self.inner.registry.active_snapshot()
    }

    /// Snapshot of the authenticated identities.
    pub fn list_active_identities(&self) -> Vec<PlayerId> {
        self.inner.registry.active_identities()
    }

    /// Whether `player_id` has an authenticated session.
    pub fn is_connected(&self, player_id: PlayerId) -> bool {
        self.inner.registry.is_active(player_id)
    }

    /// Disconnects the active session of `player_id`.
    ///
    /// Returns `false` if the player has no active session. The registry
    /// entry is removed when the session reports its disconnect.
    pub async fn force_logout(&self, player_id: PlayerId) -> bool {
        let Some(session) = self.inner.registry.get_active(player_id) else {
            return false;
        };
        info!(%player_id, connection_id = %session.connection_id(), "forcing logout");
        session.disconnect(DisconnectReason::ForcedLogout).await;
        true
    }

    /// The address the transport listens on.
    pub fn local_addr(&self) -> Result<SocketAddr, T::Error> {
        self.inner.transport.local_addr()
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry<F::Session>> {
        &self.inner.registry
    }

    /// The validated configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Whether [`shutdown`](Self::shutdown) has completed.
    pub fn is_shut_down(&self) -> bool {
        self.inner.stopped.is_cancelled()
    }

    /// Stops the server.
    ///
    /// Runs in order: stop accepting, stop maintenance, unsubscribe from
    /// session events, disconnect every session, reset the stored session
    /// markers, clear the registry, close the transport. A failing step is
    /// logged and the sequence continues. Calling it again waits for the
    /// first call to finish.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutdown_started.swap(true, Ordering::AcqRel) {
            inner.stopped.cancelled().await;
            return;
        }
        info!("shutting down GPCM server");

        inner.accepting.store(false, Ordering::Release);
        inner.accept_stop.cancel();

        inner.maintenance_stop.cancel();
        let maintenance = inner.tasks.lock().maintenance.take();
        if let Some(handle) = maintenance {
            if let Err(e) = handle.await {
                error!(error = %e, "maintenance task failed");
            }
        }

        inner.events_stop.cancel();
        let pump = inner.tasks.lock().pump.take();
        if let Some(handle) = pump {
            if let Err(e) = handle.await {
                error!(error = %e, "session event pump failed");
            }
        }
        // Never started: drop the receiver here instead.
        inner.event_rx.lock().take();

        let mut sessions = inner.registry.active_snapshot();
        sessions.extend(inner.registry.processing_snapshot());
        let disconnecting = sessions.len();
        stream::iter(sessions)
            .for_each_concurrent(inner.config.shutdown_concurrency, |session| {
                let connection_id = session.connection_id();
                guarded("shutdown disconnect", connection_id, async move {
                    session.disconnect(DisconnectReason::ServerShutdown).await;
                })
            })
            .await;
        debug!(sessions = disconnecting, "sessions disconnected");

        if let Err(e) = inner.store.reset_all_session_markers().await {
            error!(error = %e, "failed to reset session markers");
        }

        for session in inner.registry.clear() {
            if !session.is_disposed() {
                session.dispose();
            }
        }

        if let Err(e) = inner.transport.shutdown().await {
            error!(error = %e, "transport shutdown failed");
        }

        inner.stopped.cancel();
        info!("GPCM server stopped");
    }
}

/// Handles session events in the order they were sent until `stop` fires.
async fn pump_events<S: LoginSession>(
    registry: Arc<ConnectionRegistry<S>>,
    policy: DuplicateLoginPolicy,
    mut rx: EventReceiver<S>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let handled = std::panic::catch_unwind(AssertUnwindSafe(|| match event {
            SessionEvent::LoginSucceeded(session) => {
                on_login_succeeded(&registry, &session, policy)
            }
            SessionEvent::Disconnected(session) => on_disconnected(&registry, &session),
        }));
        if handled.is_err() {
            error!("session event handler panicked");
        }
    }
    debug!("session event pump stopped");
}

fn on_login_succeeded<S: LoginSession>(
    registry: &ConnectionRegistry<S>,
    session: &Arc<S>,
    policy: DuplicateLoginPolicy,
) {
    let connection_id = session.connection_id();
    let promotion = registry.promote_to_active(session, policy);

    match &promotion {
        Promotion::Promoted { .. } => {
            if let Some(player_id) = session.identity() {
                info!(%connection_id, %player_id, "login completed");
            }
        }
        Promotion::Evicted { .. } => {
            info!(%connection_id, "login completed, previous session evicted");
        }
        Promotion::AlreadyActive => {
            debug!(%connection_id, "duplicate login notification ignored");
        }
        Promotion::MissingIdentity => {
            error!(%connection_id, "login succeeded without an identity");
        }
        Promotion::Disposed => {
            debug!(%connection_id, "login succeeded on a disposed session");
        }
    }

    if let Some(previous) = promotion.into_displaced() {
        let previous_id = previous.connection_id();
        info!(%previous_id, by = %connection_id, "session superseded");
        tokio::spawn(guarded("superseded disconnect", previous_id, async move {
            previous.disconnect(DisconnectReason::Superseded).await;
        }));
    }
}

fn on_disconnected<S: LoginSession>(registry: &ConnectionRegistry<S>, session: &Arc<S>) {
    let connection_id = session.connection_id();
    if registry.remove_on_disconnect(session) {
        debug!(%connection_id, "connection closed");
    } else {
        debug!(%connection_id, "closed connection was not registered");
    }
}
