// High-level delta API on top of the VCDIFF codec and the match engine.
//
// - `encoder`: DeltaEncoder, streaming encode with a once-indexed source
// - `decoder`: DeltaDecoder, streaming decode with progress tracking

pub mod decoder;
pub mod encoder;

pub use decoder::{ChecksumMode, DecodeOptions, DeltaDecoder};
pub use encoder::{CompressOptions, DeltaEncoder, EncodeError, EncodeStats};
