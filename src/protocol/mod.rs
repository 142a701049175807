//! # Message Protocol
//!
//! Typed messages on top of framed payloads, the per-role message registry and
//! the pluggable authentication step.
//!
//! ## Components
//! - **Message**: `NetworkMessage` trait, payload encode/decode
//! - **Messages**: core spawn / unspawn / authentication messages
//! - **Registry**: one handler per message id, with an authentication gate
//! - **Auth**: authenticator traits and the basic username/password pair
//!
//! ## Payload Format
//! ```text
//! [MessageId(2, big-endian)] [Body(N)]
//! ```

pub mod auth;
pub mod message;
pub mod messages;
pub mod registry;

pub use message::{decode_payload, encode_payload, message_id, NetworkMessage};
pub use registry::{DispatchOutcome, MessageRegistry, RegisteredHandler};
