//! # Stream Framer
//!
//! Converts a raw, boundary-less byte stream into length-delimited payloads and back.
//!
//! Every frame on the wire is `[4-byte big-endian length][payload]`. The reader side
//! keeps a private [`FramingBuffer`] per connection so partial headers and partial
//! payloads survive across reads of any size.
//!
//! ## Zero-copy
//! When a chunk starts on a frame boundary and holds a complete frame, the payload is
//! handed out as a view straight into the chunk. Only frames that span reads are copied
//! into the framing buffer, whose storage grows to the largest frame seen and is then
//! reused for every later message.
//!
//! ## Usage
//! ```rust
//! use net_session::core::framing::{frame_into, unframe, FramingBuffer};
//!
//! let mut wire = Vec::new();
//! frame_into(b"hello", &mut wire).unwrap();
//!
//! let mut state = FramingBuffer::new();
//! let mut seen = Vec::new();
//! // feed the frame in two reads
//! assert!(unframe(&wire[..3], &mut state, 1024, |p| seen.push(p.to_vec())));
//! assert!(unframe(&wire[3..], &mut state, 1024, |p| seen.push(p.to_vec())));
//! assert_eq!(seen, vec![b"hello".to_vec()]);
//! ```

use crate::error::{ProtocolError, Result};
use tracing::warn;

/// Size of the big-endian length header in bytes
pub const HEADER_SIZE: usize = 4;

/// Per-connection reassembly state: a reusable byte array and the fill position.
///
/// Never shared between connections.
#[derive(Debug, Default)]
pub struct FramingBuffer {
    buffer: Vec<u8>,
    position: usize,
}

impl FramingBuffer {
    /// Create an empty framing buffer; storage grows on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framing buffer on top of existing storage (e.g. taken from a pool).
    pub fn with_storage(mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        Self {
            buffer,
            position: 0,
        }
    }

    /// Number of bytes of an incomplete frame currently held.
    pub fn buffered(&self) -> usize {
        self.position
    }

    /// Drop any partially reassembled frame.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Release the underlying storage, e.g. to hand it back to a pool.
    pub fn into_storage(self) -> Vec<u8> {
        self.buffer
    }

    fn announced_length(&self) -> usize {
        read_length(&self.buffer[..HEADER_SIZE])
    }

    fn ensure_len(&mut self, len: usize) {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }
}

#[inline]
fn read_length(header: &[u8]) -> usize {
    u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
}

/// Prepend the length header to `payload`, writing into `out`.
///
/// Returns the number of bytes written (`payload.len() + 4`).
///
/// # Errors
/// `OutputTooSmall` if `out` cannot hold the framed payload, `OversizedMessage` if the
/// payload length does not fit the 32-bit header.
pub fn frame(payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::OversizedMessage {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let needed = payload.len() + HEADER_SIZE;
    if out.len() < needed {
        return Err(ProtocolError::OutputTooSmall {
            needed,
            available: out.len(),
        });
    }

    out[..HEADER_SIZE].copy_from_slice(&length.to_be_bytes());
    out[HEADER_SIZE..needed].copy_from_slice(payload);
    Ok(needed)
}

/// Frame `payload` into a growable buffer, replacing its contents.
pub fn frame_into(payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    out.resize(payload.len() + HEADER_SIZE, 0);
    frame(payload, out)?;
    Ok(())
}

/// Consume a newly arrived chunk of stream bytes.
///
/// Calls `on_message` once per completed payload, in stream order. A trailing partial
/// frame stays buffered in `state` for the next call.
///
/// Returns `false` if a length header outside `[0, max_message_size]` was seen; the
/// caller must close the connection. `on_message` is never called for that frame and
/// the reassembly state is reset.
pub fn unframe<F>(
    chunk: &[u8],
    state: &mut FramingBuffer,
    max_message_size: usize,
    mut on_message: F,
) -> bool
where
    F: FnMut(&[u8]),
{
    let mut chunk = chunk;

    while !chunk.is_empty() {
        // Whole frames at a boundary are handed out without copying
        if state.position == 0 && chunk.len() >= HEADER_SIZE {
            let length = read_length(chunk);
            if length > max_message_size {
                warn!(length, max = max_message_size, "Length header out of bounds");
                return false;
            }
            let total = HEADER_SIZE + length;
            if chunk.len() >= total {
                on_message(&chunk[HEADER_SIZE..total]);
                chunk = &chunk[total..];
                continue;
            }
        }

        if state.position < HEADER_SIZE {
            state.ensure_len(HEADER_SIZE);
            let n = (HEADER_SIZE - state.position).min(chunk.len());
            state.buffer[state.position..state.position + n].copy_from_slice(&chunk[..n]);
            state.position += n;
            chunk = &chunk[n..];

            if state.position < HEADER_SIZE {
                return true;
            }

            let length = state.announced_length();
            if length > max_message_size {
                warn!(length, max = max_message_size, "Length header out of bounds");
                state.reset();
                return false;
            }
            state.ensure_len(HEADER_SIZE + length);
        }

        let total = HEADER_SIZE + state.announced_length();
        let n = (total - state.position).min(chunk.len());
        state.buffer[state.position..state.position + n].copy_from_slice(&chunk[..n]);
        state.position += n;
        chunk = &chunk[n..];

        if state.position == total {
            state.position = 0;
            on_message(&state.buffer[HEADER_SIZE..total]);
        }
    }

    true
}
