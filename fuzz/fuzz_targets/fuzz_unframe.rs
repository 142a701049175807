#![no_main]

use libfuzzer_sys::fuzz_target;
use net_session::core::{unframe, FramingBuffer, HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    // First byte picks the read size so frames straddle chunk boundaries
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let chunk_size = usize::from(split).max(1);
    let mut state = FramingBuffer::new();

    for chunk in stream.chunks(chunk_size) {
        let ok = unframe(chunk, &mut state, 4096, |payload| {
            assert!(payload.len() <= 4096);
        });
        if !ok {
            return;
        }
    }
    assert!(state.buffered() < HEADER_SIZE + 4096);
});
