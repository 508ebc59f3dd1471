//! Login session capabilities for the GPCM server.
//!
//! The byte-level login handshake lives in a per-connection session object
//! that this workspace does not implement. This crate defines the contract
//! the connection core uses to drive such an object:
//!
//! 1. **Identity types**: [`ConnectionId`], [`PlayerId`], [`LoginStatus`],
//!    [`DisconnectReason`]
//! 2. **Capabilities**: [`LoginSession`] (start, keep-alive, disconnect,
//!    dispose) and [`SessionFactory`] (bind a session to an accepted stream)
//! 3. **Notifications**: [`SessionEvent`] delivered through an
//!    [`EventSender`] injected into every session at construction
//! 4. **Persistence**: [`SessionStore`], the one write the core performs
//!    against the user database
//!
//! # How it fits in the stack
//!
//! ```text
//! Connection core (gpcm)       ← registry, sweeper, keep-alives, shutdown
//!     ↕
//! Session capabilities (this crate)
//!     ↕
//! Transport (gpcm-transport)   ← accepted TCP streams
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod events;
mod session;
mod store;
mod types;

pub use error::{SessionError, StorageError};
pub use events::{EventReceiver, EventSender, SessionEvent, event_channel};
pub use session::{LoginSession, Rejected, SessionFactory};
pub use store::{MemorySessionStore, SessionStore};
pub use types::{ConnectionId, DisconnectReason, LoginStatus, PlayerId};
