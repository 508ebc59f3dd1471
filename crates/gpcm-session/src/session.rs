//! The session capability set and its factory.
//!
//! A session owns one accepted stream and runs the login handshake on it.
//! The connection core never looks at bytes: it starts the session, reads
//! its status, asks it to ping or disconnect, and disposes it once it has
//! been removed from every registry map.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;

use crate::{
    ConnectionId, DisconnectReason, EventSender, LoginStatus, PlayerId, SessionError,
};

/// One connection's login session, as seen by the connection core.
///
/// # Contract
///
/// - `status()` moves from `InProgress` to `Completed` at most once, and
///   `identity()` is `Some` from that moment on and never changes.
/// - When the handshake succeeds the session sends
///   [`SessionEvent::LoginSucceeded`](crate::SessionEvent::LoginSucceeded)
///   exactly once; when the connection ends for any reason (including a
///   server-requested [`disconnect`](Self::disconnect)) it sends
///   [`SessionEvent::Disconnected`](crate::SessionEvent::Disconnected)
///   exactly once.
/// - `dispose()` is idempotent and releases the stream. The core only calls
///   it after the session is unreachable from its maps.
/// - Implementations are called concurrently from several tasks and must be
///   reentrant: `disconnect` may emit `Disconnected` before it returns.
pub trait LoginSession: Send + Sync + 'static {
    /// Identifier assigned by the core when the stream was accepted.
    fn connection_id(&self) -> ConnectionId;

    /// Authenticated identity; `None` until the handshake completes.
    fn identity(&self) -> Option<PlayerId>;

    /// Current handshake status.
    fn status(&self) -> LoginStatus;

    /// When the session was constructed. Used only for the login timeout.
    fn created_at(&self) -> Instant;

    /// Whether [`dispose`](Self::dispose) has already run.
    fn is_disposed(&self) -> bool;

    /// Begins the handshake. Must not block: implementations spawn their
    /// own task and report progress through their [`EventSender`].
    fn start(&self) -> Result<(), SessionError>;

    /// Sends one keep-alive frame to an authenticated peer.
    fn send_keep_alive(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Closes the connection with the given reason. Idempotent.
    fn disconnect(&self, reason: DisconnectReason) -> impl Future<Output = ()> + Send;

    /// Releases the session's resources, including the accepted stream.
    ///
    /// Once a factory has built a session the stream is never handed back
    /// to the transport's `release`; dropping it here is its release.
    /// Transports must free everything a connection holds (capacity slot,
    /// pooled buffer) when it is dropped.
    fn dispose(&self);
}

/// A stream handed back by a [`SessionFactory`] that could not use it.
///
/// The core returns `stream` to the transport's release path.
#[derive(Debug)]
pub struct Rejected<T> {
    pub stream: T,
    pub error: SessionError,
}

/// Builds a [`LoginSession`] around a freshly accepted stream.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use gpcm_session::{ConnectionId, EventSender, Rejected, SessionFactory};
/// # use gpcm_session::{DisconnectReason, LoginSession, LoginStatus, PlayerId, SessionError};
/// # use tokio::time::Instant;
/// # struct MySession;
/// # impl MySession {
/// #     fn new(_: (), _: ConnectionId, _: EventSender<MySession>) -> Self { MySession }
/// # }
/// # impl LoginSession for MySession {
/// #     fn connection_id(&self) -> ConnectionId { ConnectionId::new(1) }
/// #     fn identity(&self) -> Option<PlayerId> { None }
/// #     fn status(&self) -> LoginStatus { LoginStatus::InProgress }
/// #     fn created_at(&self) -> Instant { Instant::now() }
/// #     fn is_disposed(&self) -> bool { false }
/// #     fn start(&self) -> Result<(), SessionError> { Ok(()) }
/// #     async fn send_keep_alive(&self) -> Result<(), SessionError> { Ok(()) }
/// #     async fn disconnect(&self, _reason: DisconnectReason) {}
/// #     fn dispose(&self) {}
/// # }
///
/// struct MyFactory;
///
/// impl SessionFactory for MyFactory {
///     type Stream = ();
///     type Session = MySession;
///
///     fn create(
///         &self,
///         stream: (),
///         id: ConnectionId,
///         events: EventSender<MySession>,
///     ) -> Result<Arc<MySession>, Rejected<()>> {
///         Ok(Arc::new(MySession::new(stream, id, events)))
///     }
/// }
/// ```
pub trait SessionFactory: Send + Sync + 'static {
    /// The accepted stream type (the transport's connection).
    type Stream: Send + 'static;
    /// The session type produced.
    type Session: LoginSession;

    /// Binds a new session to `stream` under the core-assigned `id`.
    ///
    /// On failure the stream must be handed back inside [`Rejected`] so the
    /// caller can release it.
    fn create(
        &self,
        stream: Self::Stream,
        id: ConnectionId,
        events: EventSender<Self::Session>,
    ) -> Result<Arc<Self::Session>, Rejected<Self::Stream>>;
}
