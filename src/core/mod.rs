//! # Core Stream Components
//!
//! Length-prefix framing over boundary-less byte streams.
//!
//! This module carves an unreliable, arbitrarily chunked byte stream into discrete
//! application payloads and wraps outgoing payloads with their length header.
//!
//! ## Components
//! - **Framing**: `frame` / `unframe` and the per-connection `FramingBuffer`
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Length headers above the configured maximum are fatal for the connection
//! - Validation happens before any payload byte is buffered

pub mod framing;

pub use framing::{frame, frame_into, unframe, FramingBuffer, HEADER_SIZE};
