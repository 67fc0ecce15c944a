#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::vcdiff::decoder::{self, DecodeOptions, InstructionIterator, StreamDecoder};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    let _ = decoder::decode_memory(data, &[]);

    if data.len() >= 2 {
        let split = data.len() / 2;
        let (source, delta) = data.split_at(split);
        let _ = decoder::decode_memory(delta, source);
    }

    // Walk instructions without executing them, with a small window cap.
    let opts = DecodeOptions {
        max_window_size: 1 << 16,
        ..Default::default()
    };
    let mut dec = StreamDecoder::with_options(data, opts);
    while let Ok(Some(raw)) = dec.read_window() {
        let iter = InstructionIterator::with_code_table(
            &raw.inst,
            &raw.addr,
            raw.header.source_len(),
            dec.code_table(),
            dec.new_address_cache(),
        );
        for op in iter {
            if op.is_err() {
                break;
            }
        }
    }
});
