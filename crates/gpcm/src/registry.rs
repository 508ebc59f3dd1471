//! Connection registry: the processing and active session maps.
//!
//! A freshly accepted session lives in `processing`, keyed by its
//! connection id, until its handshake completes. It then moves to `active`,
//! keyed by the player it authenticated as. Both maps are sharded
//! [`DashMap`]s, so every operation here is atomic per key and no global
//! lock exists.
//!
//! Shard guards never outlive a single statement: nothing in this module
//! calls into a session while a map entry is borrowed, apart from the
//! synchronous getters `connection_id()` and `identity()`.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gpcm_session::{ConnectionId, LoginSession, PlayerId};

use crate::config::DuplicateLoginPolicy;
use crate::error::RegistryError;

/// Outcome of [`ConnectionRegistry::promote_to_active`].
///
/// Any session carried by a variant has already been removed from the
/// active map; the caller disconnects it with
/// [`DisconnectReason::Superseded`](gpcm_session::DisconnectReason::Superseded).
pub enum Promotion<S> {
    /// The session is now the active holder of its identity.
    Promoted {
        /// The previous holder, if the identity was already active.
        superseded: Option<Arc<S>>,
    },
    /// The previous holder was removed and the session was left where it
    /// was ([`DuplicateLoginPolicy::EvictOnly`]).
    Evicted { previous: Arc<S> },
    /// The session already holds its identity. Nothing changed.
    AlreadyActive,
    /// The session reported a login without an identity.
    MissingIdentity,
    /// The session was disposed before its login was handled.
    Disposed,
}

impl<S: LoginSession> fmt::Debug for Promotion<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Promoted { superseded } => f
                .debug_struct("Promoted")
                .field("superseded", &superseded.as_ref().map(|s| s.connection_id()))
                .finish(),
            Self::Evicted { previous } => f
                .debug_struct("Evicted")
                .field("previous", &previous.connection_id())
                .finish(),
            Self::AlreadyActive => f.write_str("AlreadyActive"),
            Self::MissingIdentity => f.write_str("MissingIdentity"),
            Self::Disposed => f.write_str("Disposed"),
        }
    }
}

impl<S> Promotion<S> {
    /// The session the caller has to disconnect, if any.
    pub fn into_displaced(self) -> Option<Arc<S>> {
        match self {
            Self::Promoted { superseded } => superseded,
            Self::Evicted { previous } => Some(previous),
            _ => None,
        }
    }
}

/// The two session maps of one server.
pub struct ConnectionRegistry<S> {
    processing: DashMap<ConnectionId, Arc<S>>,
    active: DashMap<PlayerId, Arc<S>>,
}

impl<S: LoginSession> ConnectionRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            processing: DashMap::new(),
            active: DashMap::new(),
        }
    }

    /// Inserts a freshly constructed session into the processing map.
    pub fn register_processing(&self, session: Arc<S>) -> Result<(), RegistryError> {
        let connection_id = session.connection_id();
        match self.processing.entry(connection_id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Moves a session that completed its handshake into the active map.
    ///
    /// Last login wins: a different connection holding the same identity is
    /// removed and handed back for disconnection. Whether the new session
    /// takes its place in the same step depends on `policy`.
    pub fn promote_to_active(
        &self,
        session: &Arc<S>,
        policy: DuplicateLoginPolicy,
    ) -> Promotion<S> {
        let Some(player_id) = session.identity() else {
            return Promotion::MissingIdentity;
        };
        if session.is_disposed() {
            return Promotion::Disposed;
        }
        let connection_id = session.connection_id();

        match policy {
            DuplicateLoginPolicy::EvictAndPromote => {
                self.processing.remove(&connection_id);
                match self.active.insert(player_id, Arc::clone(session)) {
                    Some(previous) if previous.connection_id() == connection_id => {
                        Promotion::AlreadyActive
                    }
                    superseded => Promotion::Promoted { superseded },
                }
            }
            DuplicateLoginPolicy::EvictOnly => match self.active.entry(player_id) {
                Entry::Occupied(holder) => {
                    if holder.get().connection_id() == connection_id {
                        Promotion::AlreadyActive
                    } else {
                        let (_, previous) = holder.remove_entry();
                        Promotion::Evicted { previous }
                    }
                }
                Entry::Vacant(slot) => {
                    // Out of processing before it becomes visible in active.
                    // Nothing takes an active guard while holding a
                    // processing one, so this nesting cannot deadlock.
                    self.processing.remove(&connection_id);
                    slot.insert(Arc::clone(session));
                    Promotion::Promoted { superseded: None }
                }
            },
        }
    }

    /// Removes a disconnected session from both maps and disposes it.
    ///
    /// Each map entry is only removed if it still refers to this
    /// connection, so a newer holder of the same identity is left alone.
    /// Returns `true` if the session was found in either map. Idempotent.
    ///
    /// The session is disposed even when it was in neither map. A displaced
    /// or sweep-cleaned session is already out of the maps when its
    /// disconnect arrives, and this is its only release point.
    pub fn remove_on_disconnect(&self, session: &Arc<S>) -> bool {
        let connection_id = session.connection_id();

        let from_processing = self.remove_processing_entry(session);
        let from_active = session.identity().is_some_and(|player_id| {
            self.active
                .remove_if(&player_id, |_, holder| {
                    holder.connection_id() == connection_id
                })
                .is_some()
        });

        if !session.is_disposed() {
            session.dispose();
        }
        from_processing || from_active
    }

    /// Removes `session` from the processing map if the entry under its id
    /// is this very session.
    pub fn remove_processing_entry(&self, session: &Arc<S>) -> bool {
        self.processing
            .remove_if(&session.connection_id(), |_, entry| Arc::ptr_eq(entry, session))
            .is_some()
    }

    /// The active session for `player_id`, if any.
    pub fn get_active(&self, player_id: PlayerId) -> Option<Arc<S>> {
        self.active.get(&player_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `player_id` currently has an active session.
    pub fn is_active(&self, player_id: PlayerId) -> bool {
        self.active.contains_key(&player_id)
    }

    /// Whether `connection_id` is still in the handshake phase.
    pub fn is_processing(&self, connection_id: ConnectionId) -> bool {
        self.processing.contains_key(&connection_id)
    }

    /// Number of authenticated sessions.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of sessions still in the handshake phase.
    pub fn processing_count(&self) -> usize {
        self.processing.len()
    }

    /// Point-in-time copy of the processing sessions.
    pub fn processing_snapshot(&self) -> Vec<Arc<S>> {
        self.processing
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Point-in-time copy of the active sessions.
    pub fn active_snapshot(&self) -> Vec<Arc<S>> {
        self.active
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Point-in-time copy of the active identities.
    pub fn active_identities(&self) -> Vec<PlayerId> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Empties both maps and returns every session they held, active
    /// sessions first.
    pub fn clear(&self) -> Vec<Arc<S>> {
        let mut drained = Vec::with_capacity(self.active.len() + self.processing.len());
        self.active.retain(|_, session| {
            drained.push(Arc::clone(session));
            false
        });
        self.processing.retain(|_, session| {
            drained.push(Arc::clone(session));
            false
        });
        drained
    }
}

impl<S: LoginSession> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
