//! Typed message encoding
//!
//! A payload is `[message id: u16 big-endian][body]`. Bodies are encoded with bincode
//! using fixed-width big-endian integers and u64 length prefixes for strings and
//! sequences, so the layout is deterministic and symmetric between encode and decode.
//! Decoding is bounded by the payload length, which stops hostile inner length
//! prefixes before they allocate.

use crate::error::{constants, ProtocolError, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Size of the message id prefix
pub const MESSAGE_ID_SIZE: usize = 2;

/// A message that can cross the wire.
///
/// `ID` must be unique per role; ids `0xFF00..=0xFFFF` are reserved for core messages.
pub trait NetworkMessage: Serialize + DeserializeOwned + 'static {
    /// Wire identifier of this message type
    const ID: u16;
}

fn body_options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(limit)
}

/// Read the message id at the start of a payload.
pub fn message_id(payload: &[u8]) -> Result<u16> {
    match payload {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ProtocolError::MalformedPayload(
            constants::ERR_PAYLOAD_TOO_SHORT.into(),
        )),
    }
}

/// Encode `msg` as a payload (id + body), replacing the contents of `out`.
pub fn encode_payload<M: NetworkMessage>(msg: &M, out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    out.extend_from_slice(&M::ID.to_be_bytes());
    body_options(u64::MAX).serialize_into(&mut *out, msg)?;
    Ok(())
}

/// Decode a payload whose id is expected to be `M::ID`.
pub fn decode_payload<M: NetworkMessage>(payload: &[u8]) -> Result<M> {
    let id = message_id(payload)?;
    if id != M::ID {
        return Err(ProtocolError::MalformedPayload(format!(
            "expected message id {:#06x}, found {id:#06x}",
            M::ID
        )));
    }
    decode_body(&payload[MESSAGE_ID_SIZE..])
}

/// Decode a message body (payload without the id prefix).
pub fn decode_body<M: NetworkMessage>(body: &[u8]) -> Result<M> {
    let msg = body_options(body.len() as u64).deserialize(body)?;
    Ok(msg)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Chat {
        channel: u8,
        text: String,
    }

    impl NetworkMessage for Chat {
        const ID: u16 = 0x0102;
    }

    #[test]
    fn test_payload_layout_is_fixed() {
        let mut out = Vec::new();
        encode_payload(
            &Chat {
                channel: 3,
                text: "hi".into(),
            },
            &mut out,
        )
        .unwrap();

        // id, channel, u64 length, text
        assert_eq!(out, vec![0x01, 0x02, 3, 0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
        assert_eq!(message_id(&out).unwrap(), 0x0102);
    }

    #[test]
    fn test_decode_rejects_wrong_id() {
        let mut out = Vec::new();
        encode_payload(
            &Chat {
                channel: 1,
                text: String::new(),
            },
            &mut out,
        )
        .unwrap();
        out[1] = 0x03;
        assert!(matches!(
            decode_payload::<Chat>(&out),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_hostile_string_length_is_rejected() {
        let mut body = vec![1u8];
        body.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(decode_body::<Chat>(&body).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut out = Vec::new();
        encode_payload(
            &Chat {
                channel: 1,
                text: "x".into(),
            },
            &mut out,
        )
        .unwrap();
        out.push(0);
        assert!(decode_payload::<Chat>(&out).is_err());
    }

    #[test]
    fn test_short_payload_has_no_id() {
        assert!(message_id(&[0x01]).is_err());
        assert!(message_id(&[]).is_err());
    }
}
