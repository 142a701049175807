//! # Error Types
//!
//! Error handling for the session runtime.
//!
//! This module defines every error variant that can surface from framing,
//! message decoding, dispatch, the connection table and the spawn directory.
//!
//! ## Error Categories
//! - **Framing**: length headers outside the configured bound (fatal for a connection)
//! - **Dispatch**: unknown message ids, unauthenticated access, malformed payloads
//! - **Registration**: duplicate handlers for one message id
//! - **Directory**: unknown prefabs, unknown entities, duplicate spawns
//! - **Transport / Config**: backend failures and invalid configuration
//!
//! Only framing violations close a connection. Everything else is reported and
//! the connection stays open.
//!
//! ## Example Usage
//! ```rust
//! use net_session::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn check_length(length: usize, max: usize) -> Result<usize> {
//!     if length > max {
//!         return Err(ProtocolError::FramingViolation { length, max });
//!     }
//!     Ok(length)
//! }
//!
//! match check_length(70_000, 16 * 1024) {
//!     Ok(len) => info!(len, "length accepted"),
//!     Err(e) => error!(error = %e, "length rejected"),
//! }
//! ```

use crate::server::connection::ConnectionId;
use crate::spawn::{NetworkId, PrefabId};
use std::io;
use thiserror::Error;

/// Static diagnostic strings, borrowed on error paths to avoid allocations.
pub mod constants {
    /// Transport errors
    pub const ERR_TRANSPORT_SEND_FAILED: &str = "Transport refused the outgoing bytes";
    pub const ERR_SESSION_OPEN: &str = "Session is already connecting or connected";

    /// Payload errors
    pub const ERR_PAYLOAD_TOO_SHORT: &str = "Payload is shorter than the 2-byte message id";

    /// Logging errors
    pub const ERR_LOGGING_INSTALLED: &str = "A global tracing subscriber is already installed";

    /// Authentication errors
    pub const ERR_AUTH_REJECTED: &str = "Credentials rejected by server";
}

/// Primary error type for all runtime operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A length header announced a payload outside `[0, max]`.
    #[error("Framing violation: header announced {length} bytes (max {max})")]
    FramingViolation { length: usize, max: usize },

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("Message too large: {size} bytes (max {max})")]
    OversizedMessage { size: usize, max: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No handler registered for message id {0:#06x}")]
    UnknownMessage(u16),

    #[error("Connection {0} is not authenticated")]
    Unauthenticated(ConnectionId),

    #[error("A handler is already registered for message id {0:#06x}")]
    DuplicateHandler(u16),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Prefab {0} is not in the catalogue")]
    UnknownPrefab(PrefabId),

    #[error("Entity {0} is not spawned")]
    UnknownEntity(NetworkId),

    #[error("Entity {0} is already spawned")]
    AlreadySpawned(NetworkId),

    #[error("Connection {connection} already joined the world with entity {entity}")]
    AlreadyJoined {
        connection: ConnectionId,
        entity: NetworkId,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
