//! # net-session
//!
//! Transport-agnostic session layer for authoritative game servers: stream framing,
//! message dispatch, connection lifecycle with pluggable authentication, and
//! spawn/ownership replication of networked entities.
//!
//! ## Layers
//! - **core**: length-prefix framing over arbitrarily chunked byte streams
//! - **protocol**: typed messages, the per-role message registry, authentication
//! - **server** / **client**: one world object per role, driven by `update()`
//! - **spawn**: network identities and the server/client spawn directories
//! - **transport**: the byte-delivery contract plus memory and TCP backends
//! - **utils**: buffer pool, metrics, logging setup
//!
//! ## Threading
//! Each world is single-threaded. Transports may do I/O elsewhere but hand bytes
//! to the world through `poll`, called from the world's own `update`.
//!
//! ## Example
//! ```rust
//! use net_session::config::NetworkConfig;
//! use net_session::protocol::NetworkMessage;
//! use net_session::server::NetworkServer;
//! use net_session::transport::memory::MemoryNetwork;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! impl NetworkMessage for Chat {
//!     const ID: u16 = 0x0001;
//! }
//!
//! let network = MemoryNetwork::new();
//! let mut server = NetworkServer::new(&NetworkConfig::default(), network.server_transport());
//! server
//!     .register_handler::<Chat, _>(true, |_server, connection, chat| {
//!         tracing::info!(connection = %connection, text = %chat.text, "chat");
//!         Ok(())
//!     })
//!     .unwrap();
//! server.start().unwrap();
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod spawn;
pub mod transport;
pub mod utils;

pub use client::{NetworkClient, SessionState};
pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{DispatchOutcome, NetworkMessage};
pub use server::connection::ConnectionId;
pub use server::{NetworkServer, OwnedEntityPolicy};
pub use spawn::{LocalEntity, NetworkId, Ownership, PrefabId, ServerEntity};
pub use transport::Channel;
