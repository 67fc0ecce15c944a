// Integration tests for the VCDIFF format layer.
//
// These tests verify:
//   - Hand-built windows decode to the expected target
//   - Format details (magic bytes, indicators, checksum, enc_len)
//   - Custom code tables and VCD_TARGET windows
//   - Decoder robustness against malformed input

use std::io::Cursor;
use std::sync::Arc;

use vcdelta::compress::encoder::code_table_data;
use vcdelta::vcdiff::{
    AddressCache, CodeTable, DecodeError, DecodeOptions, DeltaOp, FileHeader, InstKind,
    InstructionIterator, InstructionMap, NoSource, SegmentOrigin, SourceSegment, StreamDecoder,
    StreamEncoder, VCDIFF_MAGIC, WindowEncoder, WindowHeader, decode_memory,
};

// ===========================================================================
// Helpers
// ===========================================================================

/// Encode `target` from `ops` in a single window and check the decoder
/// rebuilds it.
fn roundtrip_ops(source: &[u8], target: &[u8], ops: &[DeltaOp]) -> Vec<u8> {
    let segment = (!source.is_empty()).then(|| SourceSegment::dictionary(source.len() as u64));
    let mut we = WindowEncoder::new(segment, true);
    let mut offset = 0usize;
    for op in ops {
        match *op {
            DeltaOp::Add { len } => we.add(&target[offset..offset + len as usize]).unwrap(),
            DeltaOp::Copy { len, addr } => we.copy(len, addr).unwrap(),
            DeltaOp::Run { len } => we.run(len, target[offset]).unwrap(),
        }
        offset += op.len() as usize;
    }
    assert_eq!(offset, target.len(), "ops do not cover the target");

    let mut enc = StreamEncoder::new(Vec::new());
    enc.write_window(we, Some(target)).unwrap();
    let delta = enc.finish().unwrap();

    let decoded = decode_memory(&delta, source).unwrap();
    assert_eq!(decoded, target, "roundtrip mismatch");
    delta
}

fn add_only(target: &[u8]) -> Vec<u8> {
    roundtrip_ops(&[], target, &[DeltaOp::Add { len: target.len() as u32 }])
}

fn window_header(delta: &[u8], file_header_len: usize) -> WindowHeader {
    WindowHeader::decode(&mut Cursor::new(&delta[file_header_len..]))
        .unwrap()
        .unwrap()
}

// ===========================================================================
// Roundtrips
// ===========================================================================

#[test]
fn add_text() {
    add_only(b"Hello, world!");
    add_only("h\u{e9}llo w\u{f6}rld \u{1f600}".as_bytes());
}

#[test]
fn add_all_byte_values() {
    let data: Vec<u8> = (0..=255u8).collect();
    add_only(&data);
}

#[test]
fn single_byte_target() {
    add_only(b"x");
}

#[test]
fn copy_whole_source() {
    let source = b"The quick brown fox jumps over the lazy dog".to_vec();
    roundtrip_ops(
        &source,
        &source,
        &[DeltaOp::Copy {
            len: source.len() as u32,
            addr: 0,
        }],
    );
}

#[test]
fn small_edit_between_copies() {
    let source = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let target = b"0123456789ABCDEFghijklmnopqrstuvwxyz";
    roundtrip_ops(
        source,
        target,
        &[
            DeltaOp::Copy { len: 10, addr: 0 },
            DeltaOp::Add { len: 6 },
            DeltaOp::Copy { len: 20, addr: 16 },
        ],
    );
}

#[test]
fn self_copy_overlapping_expands_pattern() {
    // "abc" then a 27-byte copy from target offset 0 repeats it.
    let target = b"abc".repeat(10);
    roundtrip_ops(
        &[],
        &target,
        &[DeltaOp::Add { len: 3 }, DeltaOp::Copy { len: 27, addr: 0 }],
    );
}

#[test]
fn run_then_add() {
    let mut target = vec![0u8; 100];
    target.extend_from_slice(b"tail");
    roundtrip_ops(&[], &target, &[DeltaOp::Run { len: 100 }, DeltaOp::Add { len: 4 }]);
}

#[test]
fn copies_hit_the_address_cache() {
    // Repeated copies from the same addresses use NEAR and SAME modes.
    let source: Vec<u8> = (0..64u8).collect();
    let mut target = Vec::new();
    let mut ops = Vec::new();
    for round in 0..6u64 {
        for addr in [0u64, 16, 32, 48] {
            target.extend_from_slice(&source[addr as usize..addr as usize + 8]);
            ops.push(DeltaOp::Copy { len: 8, addr });
        }
        target.push(round as u8);
        ops.push(DeltaOp::Add { len: 1 });
    }
    roundtrip_ops(&source, &target, &ops);
}

#[test]
fn many_small_instructions() {
    let source: Vec<u8> = (0..200u8).collect();
    let mut target = Vec::new();
    let mut ops = Vec::new();
    for i in 0..50u8 {
        target.push(i.wrapping_mul(7));
        ops.push(DeltaOp::Add { len: 1 });
        let addr = u64::from(i) * 3;
        target.extend_from_slice(&source[addr as usize..addr as usize + 4]);
        ops.push(DeltaOp::Copy { len: 4, addr });
    }
    roundtrip_ops(&source, &target, &ops);
}

#[test]
fn large_add_copy_and_run() {
    let source: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let mut target = source[..50_000].to_vec();
    target.extend(std::iter::repeat_n(0xEE, 70_000));
    target.extend((0..30_000u32).map(|i| (i % 7) as u8));
    roundtrip_ops(
        &source,
        &target,
        &[
            DeltaOp::Copy { len: 50_000, addr: 0 },
            DeltaOp::Run { len: 70_000 },
            DeltaOp::Add { len: 30_000 },
        ],
    );
}

// ===========================================================================
// Format details
// ===========================================================================

#[test]
fn magic_version_and_indicator() {
    let delta = add_only(b"abc");
    assert_eq!(&delta[..3], &VCDIFF_MAGIC);
    assert_eq!(delta[3], 0);
    assert_eq!(delta[4], 0, "no code table and no app header");
}

#[test]
fn window_carries_checksum() {
    let target = b"checksum me please";
    let delta = add_only(target);
    let wh = window_header(&delta, 5);
    assert_eq!(wh.adler32, Some(vcdelta::vcdiff::checksum::adler32(target)));
    assert_eq!(delta[5] & 0x04, 0x04);
}

#[test]
fn enc_len_matches_sections() {
    let delta = add_only(b"abcdefgh");
    let wh = window_header(&delta, 5);
    assert_eq!(wh.enc_len, wh.compute_enc_len());
    let mut hdr = Vec::new();
    wh.encode(&mut hdr).unwrap();
    let total = 5 + hdr.len() as u64 + wh.data_len + wh.inst_len + wh.addr_len;
    assert_eq!(total, delta.len() as u64);
}

#[test]
fn app_header_roundtrip() {
    let mut enc = StreamEncoder::new(Vec::new());
    enc.set_app_header(b"vcdelta test".to_vec());
    let mut we = WindowEncoder::new(None, false);
    we.add(b"payload").unwrap();
    enc.write_window(we, Some(b"payload")).unwrap();
    let delta = enc.finish().unwrap();

    let header = FileHeader::decode(&mut Cursor::new(&delta)).unwrap();
    assert_eq!(header.app_header.as_deref(), Some(&b"vcdelta test"[..]));
    assert_eq!(decode_memory(&delta, &[]).unwrap(), b"payload");
}

#[test]
fn compound_opcodes_are_used() {
    // ADD 1 followed by COPY 4 fits one opcode of the default table.
    let source = b"wxyzwxyz";
    let target = b"!wxyz";
    let delta = roundtrip_ops(
        source,
        target,
        &[DeltaOp::Add { len: 1 }, DeltaOp::Copy { len: 4, addr: 0 }],
    );
    let wh = window_header(&delta, 5);
    assert_eq!(wh.inst_len, 1);
}

#[test]
fn instruction_iterator_lists_window() {
    let source = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let target = b"0123456789ABCDEFghijklmnopqrstuvwxyz";
    let ops = [
        DeltaOp::Copy { len: 10, addr: 0 },
        DeltaOp::Add { len: 6 },
        DeltaOp::Copy { len: 20, addr: 16 },
    ];
    let delta = roundtrip_ops(source, target, &ops);

    let mut decoder = StreamDecoder::new(&delta[..]);
    let raw = decoder.read_window().unwrap().unwrap();
    let listed: Vec<DeltaOp> = InstructionIterator::new(&raw.inst, &raw.addr, raw.header.source_len())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(listed, ops);
    assert!(decoder.read_window().unwrap().is_none());
}

// ===========================================================================
// VCD_TARGET windows
// ===========================================================================

#[test]
fn target_segment_copies_earlier_output() {
    let first = b"abcdefgh";
    let mut enc = StreamEncoder::new(Vec::new());

    let mut we = WindowEncoder::new(None, true);
    we.add(first).unwrap();
    enc.write_window(we, Some(first)).unwrap();

    let segment = SourceSegment {
        origin: SegmentOrigin::Target,
        len: 4,
        offset: 2,
    };
    let mut we = WindowEncoder::new(Some(segment), true);
    we.copy(4, 0).unwrap();
    we.add(b"!").unwrap();
    we.copy(4, 0).unwrap();
    enc.write_window(we, Some(b"cdef!cdef")).unwrap();
    let delta = enc.finish().unwrap();

    let mut out = Cursor::new(Vec::new());
    let written = vcdelta::vcdiff::decode(&mut NoSource, &delta[..], &mut out).unwrap();
    assert_eq!(written, 17);
    assert_eq!(out.into_inner(), b"abcdefghcdef!cdef");
}

#[test]
fn target_segment_beyond_output_is_truncated() {
    let mut enc = StreamEncoder::new(Vec::new());
    let mut we = WindowEncoder::new(None, false);
    we.add(b"abc").unwrap();
    enc.write_window(we, None).unwrap();

    let segment = SourceSegment {
        origin: SegmentOrigin::Target,
        len: 10,
        offset: 0,
    };
    let mut we = WindowEncoder::new(Some(segment), false);
    we.copy(3, 0).unwrap();
    enc.write_window(we, None).unwrap();
    let delta = enc.finish().unwrap();

    let err = decode_memory(&delta, &[]).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated(_)), "{err:?}");
}

// ===========================================================================
// Custom code tables
// ===========================================================================

/// The default table with opcodes 1 and 20 exchanged.
fn shuffled_table() -> CodeTable {
    let mut entries = *CodeTable::standard().entries();
    entries.swap(1, 20);
    CodeTable::from_entries(entries)
}

#[test]
fn custom_code_table_roundtrip() {
    let table = shuffled_table();
    let map = Arc::new(InstructionMap::build(&table, 8).unwrap());

    let source = b"the source dictionary bytes";
    let target = b"the target: source dictionary bytes plus more";

    let mut enc = StreamEncoder::new(Vec::new());
    enc.set_code_table(code_table_data(&table, 4, 3).unwrap());
    let mut we = WindowEncoder::with_code_table(
        Some(SourceSegment::dictionary(source.len() as u64)),
        true,
        map,
        AddressCache::new(),
    )
    .unwrap();
    we.add(b"the target: ").unwrap();
    we.copy(23, 4).unwrap();
    we.add(b" plus more").unwrap();
    enc.write_window(we, Some(target)).unwrap();
    let delta = enc.finish().unwrap();
    assert_eq!(delta[4] & 0x02, 0x02, "VCD_CODETABLE set");

    assert_eq!(decode_memory(&delta, source).unwrap(), target);

    let mut decoder = StreamDecoder::new(&delta[..]);
    decoder.read_header().unwrap();
    assert_eq!(decoder.code_table(), &table);
}

#[test]
fn custom_code_table_with_smaller_cache() {
    let table = CodeTable::standard().clone();
    let map = Arc::new(InstructionMap::build(&table, 8).unwrap());
    let cache = AddressCache::with_sizes(2, 1).unwrap();

    let source: Vec<u8> = (0..128u8).collect();
    let mut target = Vec::new();
    let mut enc = StreamEncoder::new(Vec::new());
    enc.set_code_table(code_table_data(&table, 2, 1).unwrap());
    let mut we = WindowEncoder::with_code_table(
        Some(SourceSegment::dictionary(source.len() as u64)),
        false,
        map,
        cache,
    )
    .unwrap();
    for addr in [10u64, 50, 10, 90, 50, 10] {
        we.copy(6, addr).unwrap();
        target.extend_from_slice(&source[addr as usize..addr as usize + 6]);
    }
    enc.write_window(we, None).unwrap();
    let delta = enc.finish().unwrap();

    assert_eq!(decode_memory(&delta, &source).unwrap(), target);
}

#[test]
fn custom_code_table_can_be_refused() {
    let table = shuffled_table();
    let mut enc = StreamEncoder::new(Vec::new());
    enc.set_code_table(code_table_data(&table, 4, 3).unwrap());
    let delta = enc.finish().unwrap();

    let opts = DecodeOptions {
        allow_custom_code_table: false,
        ..Default::default()
    };
    let mut decoder = StreamDecoder::with_options(&delta[..], opts);
    assert!(matches!(decoder.read_header(), Err(DecodeError::Unsupported(_))));
}

#[test]
fn code_table_without_fallback_is_rejected() {
    // Turn every size-0 ADD into a NOOP: no way left to express long ADDs.
    let mut entries = *CodeTable::standard().entries();
    for entry in entries.iter_mut() {
        if entry.first.kind == InstKind::Add && entry.first.size == 0 {
            entry.first = vcdelta::vcdiff::Instruction::NOOP;
        }
    }
    let table = CodeTable::from_entries(entries);
    assert!(InstructionMap::build(&table, 8).is_err());
}

// ===========================================================================
// Malformed input
// ===========================================================================

#[test]
fn reject_bad_magic() {
    let err = decode_memory(b"XYZ\x00\x00", &[]).unwrap_err();
    assert!(matches!(err, DecodeError::BadMagic([b'X', b'Y', b'Z'])));
}

#[test]
fn reject_bad_version() {
    let err = decode_memory(&[0xD6, 0xC3, 0xC4, 0x01, 0x00], &[]).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedVersion(1)));
}

#[test]
fn reject_truncated_header() {
    for len in 0..5 {
        let err = decode_memory(&[0xD6, 0xC3, 0xC4, 0x00, 0x00][..len], &[]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated(_)), "len {len}: {err:?}");
    }
}

#[test]
fn reject_unknown_header_bits() {
    let err = decode_memory(&[0xD6, 0xC3, 0xC4, 0x00, 0x80], &[]).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidHeaderIndicator(0x80)));
}

#[test]
fn reject_secondary_compression() {
    let err = decode_memory(&[0xD6, 0xC3, 0xC4, 0x00, 0x01, 0x02], &[]).unwrap_err();
    assert!(matches!(err, DecodeError::Unsupported(_)));
}

#[test]
fn reject_both_source_and_target_bits() {
    let err = decode_memory(&[0xD6, 0xC3, 0xC4, 0x00, 0x00, 0x03], &[]).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidWindowIndicator(0x03)));
}

#[test]
fn reject_truncated_window() {
    let delta = add_only(b"a reasonably long target window");
    for cut in 6..delta.len() {
        let err = decode_memory(&delta[..cut], &[]).unwrap_err();
        assert!(
            matches!(err, DecodeError::Truncated(_)),
            "cut at {cut}: {err:?}"
        );
    }
}

#[test]
fn reject_overlong_integer() {
    // Window length field with six continuation bytes.
    let delta = [
        0xD6, 0xC3, 0xC4, 0x00, 0x00, 0x00, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01,
    ];
    let err = decode_memory(&delta, &[]).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedInteger), "{err:?}");
}

#[test]
fn reject_copy_address_out_of_range() {
    // ADD 4 followed by COPY 4 from address 9 (SELF mode), past the four
    // bytes produced so far.
    let delta = [
        0xD6, 0xC3, 0xC4, 0x00, 0x00, // file header
        0x00, // no source
        0x0C, // enc_len
        0x08, // target length
        0x00, // delta indicator
        0x04, // data length
        0x02, // inst length
        0x01, // addr length
        b'a', b'b', b'c', b'd', //
        0x05, // ADD size 4
        0x14, // COPY size 4, mode 0
        0x09, // address
    ];
    let err = decode_memory(&delta, &[]).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidInput(_)), "{err:?}");
}

#[test]
fn reject_short_target() {
    let mut enc = StreamEncoder::new(Vec::new());
    let mut we = WindowEncoder::new(None, false);
    we.add(b"abcd").unwrap();
    let mut sections = we.finish(None);
    sections.target_len = 6;
    enc.write_sections(&sections).unwrap();
    let delta = enc.finish().unwrap();

    let err = decode_memory(&delta, &[]).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidInput(_)), "{err:?}");
}
