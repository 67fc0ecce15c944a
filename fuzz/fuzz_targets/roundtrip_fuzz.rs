#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::compress::decoder;
use vcdelta::compress::encoder::{self, CompressOptions};
use vcdelta::hash::config::MatcherConfig;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte selects the options, the rest splits into source and target.
    let flags = data[0];
    let payload = &data[1..];
    let split = if flags & 1 != 0 { payload.len() / 2 } else { 0 };
    let (source, target) = payload.split_at(split);

    let matcher = match (flags >> 1) & 3 {
        0 => MatcherConfig::FAST,
        1 => MatcherConfig::THOROUGH,
        _ => MatcherConfig::default(),
    };
    let opts = CompressOptions {
        window_size: 64 + usize::from(flags >> 3) * 97,
        look_for_target_matches: flags & 0x80 == 0,
        checksum: true,
        matcher,
    };

    let delta = encoder::encode_all(Vec::new(), source, target, opts).unwrap();
    let decoded = decoder::decode_all(source, &delta).unwrap();
    assert_eq!(decoded, target);
});
