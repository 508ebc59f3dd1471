//! # GPCM
//!
//! Connection lifecycle core of a GameSpy Presence Connection Manager
//! style login server.
//!
//! The byte-level login handshake is delegated to a session type supplied
//! through a [`SessionFactory`]. This crate owns everything around it:
//!
//! - the accept loop that turns transport streams into registered
//!   sessions ([`LoginServer::accept_stream`]),
//! - the [`ConnectionRegistry`] of in-handshake and authenticated sessions,
//!   with "last login wins" for duplicate identities,
//! - the periodic login-timeout sweep and keep-alive broadcast
//!   ([`maintenance`]),
//! - the ordered shutdown sequence ([`LoginServer::shutdown`]),
//! - a small admin surface (`is_connected`, `force_logout`, counts).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpcm::prelude::*;
//!
//! // Implement SessionFactory and SessionStore, then:
//! // let server = LoginServerBuilder::new()
//! //     .bind("0.0.0.0:29900")
//! //     .build(my_factory, my_store)
//! //     .await?;
//! // server.run().await
//! ```

#![allow(async_fn_in_trait)]

mod config;
mod error;
mod logging;
pub mod maintenance;
mod registry;
mod server;

pub use config::{DuplicateLoginPolicy, ServerConfig};
pub use error::{GpcmError, RegistryError};
pub use logging::init_logging;
pub use registry::{ConnectionRegistry, Promotion};
pub use server::{LoginServer, LoginServerBuilder};

pub use gpcm_session::{
    ConnectionId, DisconnectReason, EventSender, LoginSession, LoginStatus, PlayerId, Rejected,
    SessionError, SessionEvent, SessionFactory, SessionStore, StorageError,
};

/// Commonly used types, re-exported for convenience.
///
/// ```rust
/// use gpcm::prelude::*;
/// ```
pub mod prelude {
    pub use crate::maintenance::{BroadcastReport, SweepReport};
    pub use crate::{
        ConnectionRegistry, DuplicateLoginPolicy, GpcmError, LoginServer, LoginServerBuilder,
        Promotion, RegistryError, ServerConfig, init_logging,
    };

    pub use gpcm_session::{
        ConnectionId, DisconnectReason, EventReceiver, EventSender, LoginSession, LoginStatus,
        MemorySessionStore, PlayerId, Rejected, SessionError, SessionEvent, SessionFactory,
        SessionStore, StorageError, event_channel,
    };

    pub use gpcm_tick::{TickConfig, TickPolicy};
    pub use gpcm_transport::{
        Connection, TcpConnection, TcpTransport, TcpTransportConfig, Transport, TransportError,
    };
}
