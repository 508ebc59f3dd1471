//! Session-marker persistence.
//!
//! The user database keeps a "current session" marker per user so other
//! services can tell who is online. The connection core writes to it once:
//! at shutdown, every marker is zeroed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::{PlayerId, StorageError};

/// Persistence capability used by the shutdown sequence.
pub trait SessionStore: Send + Sync + 'static {
    /// Zeroes the current-session marker of every user.
    ///
    /// Best effort: the caller logs a failure and carries on.
    fn reset_all_session_markers(
        &self,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl<T: SessionStore> SessionStore for Arc<T> {
    fn reset_all_session_markers(
        &self,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).reset_all_session_markers()
    }
}

/// In-memory [`SessionStore`] for development servers and tests.
///
/// Markers are plain session keys; `0` means "not logged in".
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    markers: Mutex<HashMap<PlayerId, u32>>,
    offline: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the session key a player is currently logged in with.
    pub async fn set_marker(&self, player_id: PlayerId, session_key: u32) {
        self.markers.lock().await.insert(player_id, session_key);
    }

    /// Current marker for `player_id`, `0` if none.
    pub async fn marker(&self, player_id: PlayerId) -> u32 {
        self.markers
            .lock()
            .await
            .get(&player_id)
            .copied()
            .unwrap_or(0)
    }

    /// Simulates losing the database connection. While offline every
    /// operation fails with [`StorageError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }
}

impl SessionStore for MemorySessionStore {
    async fn reset_all_session_markers(&self) -> Result<(), StorageError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable("store is offline".into()));
        }
        let mut markers = self.markers.lock().await;
        for key in markers.values_mut() {
            *key = 0;
        }
        tracing::debug!(users = markers.len(), "session markers reset");
        Ok(())
    }
}
