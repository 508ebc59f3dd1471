//! Session notifications.
//!
//! Every session receives an [`EventSender`] at construction and reports
//! its two terminal milestones through it. The core owns the single
//! receiving end and handles events in send order, so a session's
//! `Disconnected` is always observed after its own `LoginSucceeded`.
//!
//! Dropping the receiver is how the core unsubscribes: later sends are
//! discarded without error.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::LoginSession;

/// A notification emitted by a session.
pub enum SessionEvent<S> {
    /// The handshake completed and the session's identity is set.
    LoginSucceeded(Arc<S>),
    /// The connection ended, for whatever reason.
    Disconnected(Arc<S>),
}

impl<S: LoginSession> fmt::Debug for SessionEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginSucceeded(s) => f
                .debug_tuple("LoginSucceeded")
                .field(&s.connection_id())
                .finish(),
            Self::Disconnected(s) => f
                .debug_tuple("Disconnected")
                .field(&s.connection_id())
                .finish(),
        }
    }
}

/// Receiving half of the session notification channel.
pub type EventReceiver<S> = mpsc::UnboundedReceiver<SessionEvent<S>>;

/// Sending half handed to every session.
///
/// Cheap to clone. Sends never block and never fail from the caller's
/// point of view.
pub struct EventSender<S> {
    tx: mpsc::UnboundedSender<SessionEvent<S>>,
}

impl<S> Clone for EventSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: LoginSession> EventSender<S> {
    /// Reports a completed handshake.
    pub fn login_succeeded(&self, session: Arc<S>) {
        self.send(SessionEvent::LoginSucceeded(session));
    }

    /// Reports that the connection has ended.
    pub fn disconnected(&self, session: Arc<S>) {
        self.send(SessionEvent::Disconnected(session));
    }

    /// Whether the core has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: SessionEvent<S>) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!(?event, "session event dropped, no subscriber");
        }
    }
}

/// Creates a notification channel.
pub fn event_channel<S: LoginSession>() -> (EventSender<S>, EventReceiver<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
