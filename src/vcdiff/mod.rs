// VCDIFF format implementation (RFC 3284).
//
// - `varint`: base-128 big-endian integers (at most 5 bytes)
// - `code_table`: instruction code table, default and custom
// - `instruction_map`: inverse code table used by the encoder
// - `address_cache`: NEAR/SAME address cache for COPY addresses
// - `header`: file header and window header
// - `checksum`: Adler-32 for the VCD_ADLER32 extension
// - `encoder` / `decoder`: window emission and reconstruction

pub mod address_cache;
pub mod checksum;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod instruction_map;
pub mod varint;

pub use address_cache::AddressCache;
pub use code_table::{CodeTable, CodeTableEntry, DeltaOp, InstKind, Instruction};
pub use decoder::{
    ChecksumMode, DecodeError, DecodeOptions, InstructionIterator, NoSource, SeekSource,
    SourceProvider, StreamDecoder, decode, decode_memory,
};
pub use encoder::{StreamEncoder, WindowEncoder, WindowSections};
pub use header::{CodeTableData, FileHeader, SegmentOrigin, SourceSegment, VCDIFF_MAGIC, WindowHeader};
pub use instruction_map::InstructionMap;
