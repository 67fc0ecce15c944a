// Streaming delta encoder.
//
// DeltaEncoder provides a streaming API for delta compression:
//   - The whole source is held in memory and indexed once
//   - Target data is fed in chunks via write_target()
//   - Each full window is matched, encoded and written immediately
//   - Every window names the entire source as its segment (offset 0)

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::hash::config::MatcherConfig;
use crate::hash::matching::MatchEngine;
use crate::vcdiff::code_table::{CodeTable, CodeTableError, DeltaOp, default_table_bytes};
use crate::vcdiff::encoder::{StreamEncoder, WindowEncoder};
use crate::vcdiff::header::{CodeTableData, SourceSegment};
use crate::vcdiff::varint::MAX_VARINT_VALUE;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Default target window size (16 MiB).
pub const DEFAULT_WINDOW_SIZE: usize = 1 << 24;

/// Configuration for the streaming delta encoder.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// Maximum target bytes per window.
    pub window_size: usize,
    /// Allow COPYs from earlier bytes of the same target window.
    pub look_for_target_matches: bool,
    /// Emit an Adler-32 checksum per window.
    pub checksum: bool,
    pub matcher: MatcherConfig,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            look_for_target_matches: true,
            checksum: false,
            matcher: MatcherConfig::default(),
        }
    }
}

impl CompressOptions {
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.window_size == 0 {
            return Err(EncodeError::InvalidOptions("window size must be non-zero".into()));
        }
        if u32::try_from(self.window_size).is_err() {
            return Err(EncodeError::InvalidOptions(format!(
                "window size {} exceeds {}",
                self.window_size,
                u32::MAX
            )));
        }
        self.matcher.validate().map_err(EncodeError::InvalidOptions)
    }

    /// Largest source this configuration can address.
    pub fn max_source_len(&self) -> u64 {
        let by_varint = MAX_VARINT_VALUE.saturating_sub(self.window_size as u64);
        let by_index = (u64::from(u32::MAX) - 1) * self.matcher.block_size as u64;
        by_varint.min(by_index)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    CodeTable(#[from] CodeTableError),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("source of {len} bytes exceeds the {max}-byte limit")]
    SourceTooLarge { len: u64, max: u64 },
}

// ---------------------------------------------------------------------------
// DeltaEncoder
// ---------------------------------------------------------------------------

/// Streaming delta encoder.
///
/// # Example
/// ```no_run
/// use vcdelta::compress::encoder::{CompressOptions, DeltaEncoder};
/// let source = b"original data";
/// let mut output = Vec::new();
/// let mut enc = DeltaEncoder::new(&mut output, source, CompressOptions::default()).unwrap();
/// enc.write_target(b"modified data").unwrap();
/// enc.finish().unwrap();
/// ```
pub struct DeltaEncoder<'s, W: Write> {
    stream: StreamEncoder<W>,
    opts: CompressOptions,
    engine: MatchEngine<'s>,
    segment: Option<SourceSegment>,
    buffer: Vec<u8>,
    bytes_in: u64,
}

impl<'s, W: Write> DeltaEncoder<'s, W> {
    /// Validate `opts` and index `source`.
    pub fn new(writer: W, source: &'s [u8], opts: CompressOptions) -> Result<Self, EncodeError> {
        opts.validate()?;
        let max = opts.max_source_len();
        if source.len() as u64 > max {
            return Err(EncodeError::SourceTooLarge {
                len: source.len() as u64,
                max,
            });
        }

        let engine = MatchEngine::new(opts.matcher, source);
        let segment = (!source.is_empty()).then(|| SourceSegment::dictionary(source.len() as u64));

        Ok(Self {
            stream: StreamEncoder::new(writer),
            opts,
            engine,
            segment,
            buffer: Vec::new(),
            bytes_in: 0,
        })
    }

    /// Attach an application header. Only effective before the first
    /// window is written.
    pub fn set_app_header(&mut self, data: Vec<u8>) {
        self.stream.set_app_header(data);
    }

    /// Feed target data. Every time `window_size` bytes are available a
    /// window is encoded and written.
    pub fn write_target(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.bytes_in += data.len() as u64;
        let window_size = self.opts.window_size;
        let mut offset = 0usize;

        if !self.buffer.is_empty() {
            let take = (window_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            offset += take;

            if self.buffer.len() == window_size {
                let window = std::mem::take(&mut self.buffer);
                self.encode_window(&window)?;
                self.buffer = window;
                self.buffer.clear();
            }
        }

        // Full windows straight from the caller's slice.
        while offset + window_size <= data.len() {
            let end = offset + window_size;
            self.encode_window(&data[offset..end])?;
            offset = end;
        }

        if offset < data.len() {
            self.buffer.extend_from_slice(&data[offset..]);
        }
        Ok(())
    }

    /// Flush the partial window and finish the stream. An empty target
    /// still produces one empty window.
    ///
    /// Returns the writer and the number of windows written.
    pub fn finish(mut self) -> Result<(W, u64), EncodeError> {
        if !self.buffer.is_empty() || self.stream.windows_written() == 0 {
            let remaining = std::mem::take(&mut self.buffer);
            self.encode_window(&remaining)?;
        }
        let windows = self.stream.windows_written();
        Ok((self.stream.finish()?, windows))
    }

    /// Target bytes received so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn windows_written(&self) -> u64 {
        self.stream.windows_written()
    }

    fn encode_window(&mut self, window: &[u8]) -> Result<(), EncodeError> {
        let ops = self
            .engine
            .find_matches(window, self.opts.look_for_target_matches);
        let mut we = WindowEncoder::new(self.segment, self.opts.checksum);
        emit_ops(&mut we, window, &ops)?;
        self.stream.write_window(we, Some(window))?;
        Ok(())
    }
}

/// Replay planned operations into a window encoder. RUN bytes and ADD
/// literals are taken from `target`.
pub fn emit_ops(we: &mut WindowEncoder, target: &[u8], ops: &[DeltaOp]) -> Result<(), CodeTableError> {
    let mut pos = 0usize;
    for op in ops {
        let len = op.len() as usize;
        match *op {
            DeltaOp::Add { .. } => we.add(&target[pos..pos + len])?,
            DeltaOp::Copy { len, addr } => we.copy(len, addr)?,
            DeltaOp::Run { len } => we.run(len, target[pos])?,
        }
        pos += len;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Summary of an encode run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub source_len: u64,
    pub target_len: u64,
    pub windows: u64,
}

/// Encode `target` against `source`, writing the delta to `out`.
///
/// The source is read fully; the target is streamed one window at a time.
pub fn encode<S: Read, T: Read, W: Write>(
    mut source: S,
    mut target: T,
    out: W,
    opts: CompressOptions,
) -> Result<EncodeStats, EncodeError> {
    opts.validate()?;
    let mut source_buf = Vec::new();
    source.read_to_end(&mut source_buf)?;

    let window_size = opts.window_size;
    let mut enc = DeltaEncoder::new(out, &source_buf, opts)?;
    let mut chunk = Vec::with_capacity(window_size.min(1 << 20));
    loop {
        chunk.clear();
        target.by_ref().take(window_size as u64).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            break;
        }
        enc.write_target(&chunk)?;
    }

    let target_len = enc.bytes_in();
    let (_, windows) = enc.finish()?;
    Ok(EncodeStats {
        source_len: source_buf.len() as u64,
        target_len,
        windows,
    })
}

/// Encode an in-memory target against an in-memory source.
pub fn encode_all<W: Write>(
    writer: W,
    source: &[u8],
    target: &[u8],
    opts: CompressOptions,
) -> Result<W, EncodeError> {
    let mut enc = DeltaEncoder::new(writer, source, opts)?;
    enc.write_target(target)?;
    let (w, _) = enc.finish()?;
    Ok(w)
}

/// Build the VCD_CODETABLE header block for `table`: the table's bytes
/// delta-encoded against the default table's bytes.
pub fn code_table_data(table: &CodeTable, near_size: u8, same_size: u8) -> Result<CodeTableData, EncodeError> {
    let bytes = table.to_bytes();
    let delta = encode_all(Vec::new(), default_table_bytes(), &bytes, CompressOptions::default())?;
    Ok(CodeTableData {
        near_size,
        same_size,
        delta,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
