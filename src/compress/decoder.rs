// Streaming delta decoder.
//
// DeltaDecoder wraps StreamDecoder with:
//   - Decode options (window size limit, checksum policy)
//   - Progress tracking (bytes decoded, windows decoded)
//   - Window-by-window decoding: one reconstructed window in memory at a time
//
// The target must be readable and seekable as well as writable, since
// windows may use earlier target output as their source segment.

use std::io::{Cursor, Read, Seek, Write};

use crate::vcdiff::decoder::{self, DecodeError, SourceProvider, StreamDecoder};

pub use crate::vcdiff::decoder::{ChecksumMode, DEFAULT_MAX_WINDOW_SIZE, DecodeOptions};

// ---------------------------------------------------------------------------
// DeltaDecoder
// ---------------------------------------------------------------------------

pub struct DeltaDecoder<R: Read> {
    inner: StreamDecoder<R>,
}

impl<R: Read> DeltaDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, DecodeOptions::default())
    }

    pub fn with_options(reader: R, opts: DecodeOptions) -> Self {
        Self {
            inner: StreamDecoder::with_options(reader, opts),
        }
    }

    /// Decode all remaining windows into `target`. Returns the total number
    /// of bytes decoded.
    pub fn decode_to<S, T>(&mut self, source: &mut S, target: &mut T) -> Result<u64, DecodeError>
    where
        S: SourceProvider + ?Sized,
        T: Read + Write + Seek,
    {
        while self.decode_window_to(source, target)?.is_some() {}
        Ok(self.bytes_decoded())
    }

    /// Decode the next window. Returns its size, or `None` at end of stream.
    pub fn decode_window_to<S, T>(&mut self, source: &mut S, target: &mut T) -> Result<Option<u64>, DecodeError>
    where
        S: SourceProvider + ?Sized,
        T: Read + Write + Seek,
    {
        let before = self.inner.bytes_written();
        if self.inner.decode_window(source, target)? {
            Ok(Some(self.inner.bytes_written() - before))
        } else {
            Ok(None)
        }
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.inner.bytes_written()
    }

    pub fn windows_decoded(&self) -> u64 {
        self.inner.windows_decoded()
    }

    /// Application header of the stream, once the header has been read.
    pub fn app_header(&self) -> Option<&[u8]> {
        self.inner.file_header()?.app_header.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Apply `patch` to `source`, writing the target to `target`.
pub fn decode<S, R, T>(source: &mut S, patch: R, target: &mut T, opts: DecodeOptions) -> Result<u64, DecodeError>
where
    S: SourceProvider + ?Sized,
    R: Read,
    T: Read + Write + Seek,
{
    decoder::decode_with_options(source, patch, target, opts)
}

/// Decode an in-memory delta against an in-memory source.
pub fn decode_all(source: &[u8], delta: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Cursor::new(Vec::new());
    let mut src = source;
    DeltaDecoder::new(delta).decode_to(&mut src, &mut out)?;
    Ok(out.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
