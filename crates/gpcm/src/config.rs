//! Server configuration.

use std::time::Duration;

use gpcm_tick::TickConfig;
use gpcm_transport::TcpTransportConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DuplicateLoginPolicy
// ---------------------------------------------------------------------------

/// What happens when a login completes for an identity that is already
/// active on another connection.
///
/// Either way the previous holder is disconnected with
/// [`DisconnectReason::Superseded`](gpcm_session::DisconnectReason::Superseded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateLoginPolicy {
    /// The new session replaces the previous holder in the active set.
    #[default]
    EvictAndPromote,
    /// The previous holder is evicted but the new session is not promoted
    /// in the same step. It stays out of the active set and is dropped
    /// from the processing set by the next sweep.
    EvictOnly,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Configuration for the login server.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening address. GPCM clients expect port 29900.
    pub bind_addr: String,

    /// Maximum number of simultaneously open connections, processing and
    /// active combined.
    pub max_connections: usize,

    /// Seconds a connection may spend in the login handshake before it is
    /// disconnected.
    pub login_timeout_secs: u64,

    /// Seconds between two maintenance passes (timeout sweep and
    /// keep-alive broadcast).
    pub maintenance_period_secs: u64,

    /// Sent to clients that connect while the server is full.
    pub server_full_message: String,

    /// How many sessions are disconnected in parallel during shutdown.
    pub shutdown_concurrency: usize,

    /// See [`DuplicateLoginPolicy`].
    pub duplicate_login_policy: DuplicateLoginPolicy,

    /// Initial capacity of each connection's read buffer, in bytes.
    pub read_buffer_size: usize,

    /// Idle read buffers kept for reuse.
    pub buffer_pool_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let transport = TcpTransportConfig::default();
        Self {
            bind_addr: transport.bind_addr,
            max_connections: transport.max_connections,
            login_timeout_secs: 20,
            maintenance_period_secs: 15,
            server_full_message: transport.server_full_message,
            shutdown_concurrency: 64,
            duplicate_login_policy: DuplicateLoginPolicy::default(),
            read_buffer_size: transport.read_buffer_size,
            buffer_pool_size: transport.buffer_pool_size,
        }
    }
}

impl ServerConfig {
    /// Clamp zero values that would stall the server.
    ///
    /// - `max_connections`, `shutdown_concurrency`, `read_buffer_size` → at least 1
    /// - `login_timeout_secs`, `maintenance_period_secs` → at least 1
    pub fn validated(mut self) -> Self {
        fn at_least_one<T: PartialOrd + From<u8> + Copy>(field: &str, value: &mut T) {
            if *value < T::from(1) {
                tracing::warn!(field, "config value must be at least 1, clamping");
                *value = T::from(1);
            }
        }
        at_least_one("max_connections", &mut self.max_connections);
        at_least_one("shutdown_concurrency", &mut self.shutdown_concurrency);
        at_least_one("read_buffer_size", &mut self.read_buffer_size);
        at_least_one("login_timeout_secs", &mut self.login_timeout_secs);
        at_least_one("maintenance_period_secs", &mut self.maintenance_period_secs);
        self
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_secs(self.maintenance_period_secs)
    }

    /// Settings for the TCP transport built by
    /// [`LoginServerBuilder`](crate::LoginServerBuilder).
    pub fn transport_config(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            bind_addr: self.bind_addr.clone(),
            max_connections: self.max_connections,
            server_full_message: self.server_full_message.clone(),
            read_buffer_size: self.read_buffer_size,
            buffer_pool_size: self.buffer_pool_size,
        }
    }

    /// Settings for the maintenance tick scheduler.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig::with_period(self.maintenance_period())
    }
}
