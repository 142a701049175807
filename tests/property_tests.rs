//! Property-based tests using proptest
//!
//! Framing and payload decoding invariants over randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use net_session::core::{frame, frame_into, unframe, FramingBuffer, HEADER_SIZE};
use net_session::protocol::message::{decode_payload, encode_payload, message_id};
use net_session::protocol::messages::{AuthRequestMessage, SpawnMessage};
use net_session::NetworkMessage;
use proptest::prelude::*;

const MAX: usize = 4096;

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    frame_into(payload, &mut out).expect("framing should not fail");
    out
}

// Property: any payload within bounds survives any chunking exactly once
proptest! {
    #[test]
    fn prop_unframe_recovers_payload_across_chunks(
        payload in prop::collection::vec(any::<u8>(), 0..=MAX),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
    ) {
        let bytes = framed(&payload);
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
        points.sort_unstable();

        let mut state = FramingBuffer::new();
        let mut messages = Vec::new();
        let mut start = 0;
        for point in points.into_iter().chain(std::iter::once(bytes.len())) {
            prop_assert!(unframe(&bytes[start..point], &mut state, MAX, |m| messages.push(m.to_vec())));
            start = point;
        }

        prop_assert_eq!(messages.len(), 1);
        prop_assert_eq!(&messages[0], &payload);
        prop_assert_eq!(state.buffered(), 0);
    }
}

// Property: a header announcing max + 1 (or more) is always a violation
proptest! {
    #[test]
    fn prop_oversized_header_is_rejected(
        max in 0usize..100_000,
        excess in 1usize..1_000,
        split in 0usize..HEADER_SIZE,
    ) {
        let announced = (max + excess) as u32;
        let mut bytes = announced.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);

        let mut state = FramingBuffer::new();
        let mut called = false;
        let first = unframe(&bytes[..split], &mut state, max, |_| called = true);
        let rest = unframe(&bytes[split..], &mut state, max, |_| called = true);

        prop_assert!(first, "a partial header is never a violation");
        prop_assert!(!rest);
        prop_assert!(!called);
    }
}

// Property: frame writes exactly header + payload and never more
proptest! {
    #[test]
    fn prop_frame_size_is_exact(
        payload in prop::collection::vec(any::<u8>(), 0..512),
        slack in 0usize..16,
    ) {
        let mut out = vec![0xEE; payload.len() + HEADER_SIZE + slack];
        let written = frame(&payload, &mut out).expect("buffer is large enough");
        prop_assert_eq!(written, payload.len() + HEADER_SIZE);
        prop_assert!(out[written..].iter().all(|b| *b == 0xEE));
    }
}

// Property: decoding arbitrary bytes never panics, only errors
proptest! {
    #[test]
    fn prop_decode_arbitrary_bytes_is_safe(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = message_id(&bytes);
        let _ = decode_payload::<SpawnMessage>(&bytes);
        let _ = decode_payload::<AuthRequestMessage>(&bytes);
    }
}

// Property: encoded credentials decode back regardless of content
proptest! {
    #[test]
    fn prop_auth_request_encoding_is_symmetric(username in ".{0,32}", password in ".{0,32}") {
        let request = AuthRequestMessage { username, password };
        let mut payload = Vec::new();
        encode_payload(&request, &mut payload).expect("encoding should not fail");

        prop_assert_eq!(message_id(&payload).unwrap(), AuthRequestMessage::ID);
        prop_assert_eq!(decode_payload::<AuthRequestMessage>(&payload).unwrap(), request);
    }
}
