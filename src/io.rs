// File-level helpers for delta encoding/decoding.
//
// `encode_file()` reads the source into memory and streams the target
// through a buffered reader. `decode_file()` reads the source on demand
// through `SeekSource` and writes the output file directly, since windows
// may read back earlier output.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::compress::decoder::{DecodeOptions, DeltaDecoder};
use crate::compress::encoder::{self, CompressOptions, EncodeError};
use crate::vcdiff::decoder::{DecodeError, NoSource, SeekSource};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `encode_file()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeFileStats {
    pub source_size: u64,
    pub target_size: u64,
    pub delta_size: u64,
    pub windows: u64,
}

/// Statistics returned by `decode_file()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeFileStats {
    pub source_size: u64,
    pub delta_size: u64,
    pub output_size: u64,
    pub windows: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// encode_file
// ---------------------------------------------------------------------------

/// Encode `target_path` against `source_path` (or against nothing) into
/// `delta_path`.
pub fn encode_file(
    source_path: Option<&Path>,
    target_path: &Path,
    delta_path: &Path,
    opts: CompressOptions,
) -> Result<EncodeFileStats, IoError> {
    let source: Box<dyn io::Read> = match source_path {
        Some(path) => Box::new(BufReader::with_capacity(BUF_SIZE, File::open(path)?)),
        None => Box::new(io::empty()),
    };
    let target = BufReader::with_capacity(BUF_SIZE, File::open(target_path)?);
    let mut delta = BufWriter::with_capacity(BUF_SIZE, File::create(delta_path)?);

    let stats = encoder::encode(source, target, &mut delta, opts)?;
    let delta_file = delta.into_inner().map_err(|e| e.into_error())?;
    let delta_size = delta_file.metadata()?.len();

    log::info!(
        "encoded {} target bytes against {} source bytes into {delta_size} bytes ({} windows)",
        stats.target_len,
        stats.source_len,
        stats.windows
    );

    Ok(EncodeFileStats {
        source_size: stats.source_len,
        target_size: stats.target_len,
        delta_size,
        windows: stats.windows,
    })
}

// ---------------------------------------------------------------------------
// decode_file
// ---------------------------------------------------------------------------

/// Apply `delta_path` to `source_path` (if any), writing `output_path`.
pub fn decode_file(
    source_path: Option<&Path>,
    delta_path: &Path,
    output_path: &Path,
    opts: DecodeOptions,
) -> Result<DecodeFileStats, IoError> {
    let delta_file = File::open(delta_path)?;
    let delta_size = delta_file.metadata()?.len();
    let mut decoder = DeltaDecoder::with_options(BufReader::with_capacity(BUF_SIZE, delta_file), opts);

    let mut output = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output_path)?;

    let (source_size, output_size) = match source_path {
        Some(path) => {
            let mut source = SeekSource::new(BufReader::with_capacity(BUF_SIZE, File::open(path)?))?;
            let size = std::fs::metadata(path)?.len();
            (size, decoder.decode_to(&mut source, &mut output)?)
        }
        None => (0, decoder.decode_to(&mut NoSource, &mut output)?),
    };
    output.flush()?;

    log::info!(
        "decoded {output_size} bytes from {delta_size}-byte delta ({} windows)",
        decoder.windows_decoded()
    );

    Ok(DecodeFileStats {
        source_size,
        delta_size,
        output_size,
        windows: decoder.windows_decoded(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
