// VCDIFF decoder: window parsing and instruction replay.
//
// State progression: file header (once, possibly loading a custom code
// table through a nested decode), then for each window the window header,
// the three sections, and instruction execution against the source
// segment and the window's own output.
//
// Buffers (sections, window output, source copy scratch) are reused across
// windows. The reconstructed window is held in memory and written to the
// target only once it is complete and verified.

use std::borrow::Cow;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use thiserror::Error;

use super::address_cache::{AddressCache, AddressCacheError};
use super::checksum;
use super::code_table::{
    CODE_TABLE_BYTES, CodeTable, CodeTableError, DeltaOp, InstKind, Instruction,
    default_table_bytes,
};
use super::header::{self, CodeTableData, FileHeader, SegmentOrigin, WindowHeader};
use super::varint::{self, VarIntError};

// ---------------------------------------------------------------------------
// Decoder error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("not a VCDIFF stream (magic {0:02X?})")]
    BadMagic([u8; 3]),
    #[error("unsupported VCDIFF version {0:#04X}")]
    UnsupportedVersion(u8),
    #[error("invalid header indicator {0:#04X}")]
    InvalidHeaderIndicator(u8),
    #[error("invalid window indicator {0:#04X}")]
    InvalidWindowIndicator(u8),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("malformed variable-length integer")]
    MalformedInteger,
    #[error("truncated stream: {0}")]
    Truncated(&'static str),
    #[error("custom code table decoded to {0} bytes, expected {CODE_TABLE_BYTES}")]
    CodeTableSize(usize),
    #[error(transparent)]
    CodeTable(#[from] CodeTableError),
    #[error("window uses the source dictionary but no source was supplied")]
    MissingSource,
    #[error("window of {len} bytes exceeds the {max}-byte limit")]
    WindowTooLarge { len: u64, max: u64 },
    #[error("checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<VarIntError> for DecodeError {
    fn from(e: VarIntError) -> Self {
        match e {
            VarIntError::Underflow => DecodeError::Truncated("integer"),
            VarIntError::TooLong => DecodeError::MalformedInteger,
            VarIntError::Io(e) => DecodeError::Io(e),
        }
    }
}

impl From<AddressCacheError> for DecodeError {
    fn from(e: AddressCacheError) -> Self {
        DecodeError::InvalidInput(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Source provider trait
// ---------------------------------------------------------------------------

/// Source dictionary for COPY instructions.
pub trait SourceProvider {
    /// Read bytes at absolute `offset` into `buf`; returns the count read,
    /// short only at end of source.
    fn read_source(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DecodeError>;

    /// Total source length, if known.
    fn source_len(&self) -> Option<u64>;

    /// Contiguous in-memory view of `[offset, offset + len)`, when the
    /// source can provide one.
    fn source_slice(&self, _offset: u64, _len: usize) -> Option<&[u8]> {
        None
    }

    /// False for the placeholder used when decoding without a source.
    fn is_present(&self) -> bool {
        true
    }
}

impl SourceProvider for &[u8] {
    fn read_source(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DecodeError> {
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(0);
        };
        let available = self.get(offset..).unwrap_or_default();
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn source_len(&self) -> Option<u64> {
        Some(self.len() as u64)
    }

    fn source_slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let offset = usize::try_from(offset).ok()?;
        self.get(offset..offset.checked_add(len)?)
    }
}

impl SourceProvider for Vec<u8> {
    fn read_source(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DecodeError> {
        self.as_slice().read_source(offset, buf)
    }

    fn source_len(&self) -> Option<u64> {
        Some(self.len() as u64)
    }

    fn source_slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let offset = usize::try_from(offset).ok()?;
        self.get(offset..offset.checked_add(len)?)
    }
}

/// Stand-in for "no source": any dictionary window fails with
/// [`DecodeError::MissingSource`].
pub struct NoSource;

impl SourceProvider for NoSource {
    fn read_source(&mut self, _offset: u64, _buf: &mut [u8]) -> Result<usize, DecodeError> {
        Err(DecodeError::MissingSource)
    }

    fn source_len(&self) -> Option<u64> {
        None
    }

    fn is_present(&self) -> bool {
        false
    }
}

/// Seekable reader (typically a file) used as the source dictionary.
pub struct SeekSource<R: Read + Seek> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> SeekSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, len })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> SourceProvider for SeekSource<R> {
    fn read_source(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DecodeError> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn source_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Default upper bound on a window's target, buffered segment and section lengths.
pub const DEFAULT_MAX_WINDOW_SIZE: u64 = 1 << 26;

/// What to do with a window's Adler-32 checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Mismatch is an error.
    #[default]
    Verify,
    /// Mismatch is logged.
    Warn,
    /// Checksums are not computed.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub max_window_size: u64,
    pub checksum: ChecksumMode,
    pub allow_custom_code_table: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_window_size: DEFAULT_MAX_WINDOW_SIZE,
            checksum: ChecksumMode::Verify,
            allow_custom_code_table: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Window decoder
// ---------------------------------------------------------------------------

/// Borrowed DATA/INST/ADDR sections of one window.
#[derive(Clone, Copy)]
pub struct WindowData<'a> {
    pub data: &'a [u8],
    pub inst: &'a [u8],
    pub addr: &'a [u8],
}

/// Replay one window's instructions into `output` (cleared first).
///
/// `source` holds the window's source segment starting at `source_offset`;
/// addresses below the segment length read from it, the rest from
/// `output` itself.
#[allow(clippy::too_many_arguments)]
pub fn decode_window_into<P: SourceProvider + ?Sized>(
    header: &WindowHeader,
    sections: WindowData<'_>,
    table: &CodeTable,
    acache: &mut AddressCache,
    source: &mut P,
    source_offset: u64,
    copy_buf: &mut Vec<u8>,
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let target_len = usize::try_from(header.target_window_len)
        .map_err(|_| DecodeError::InvalidInput("target window length overflows".into()))?;
    let seg_len = header.source_len();

    output.clear();
    output.reserve(target_len);

    let mut addrs = acache.reset(sections.addr);
    let inst = sections.inst;
    let data = sections.data;
    let mut inst_pos = 0usize;
    let mut data_pos = 0usize;

    while inst_pos < inst.len() {
        let entry = *table.get(inst[inst_pos]);
        inst_pos += 1;

        for half in [entry.first, entry.second] {
            if half.is_noop() {
                continue;
            }
            let size = if half.size == 0 {
                let (val, consumed) = varint::read_usize(&inst[inst_pos..])?;
                inst_pos += consumed;
                val
            } else {
                half.size as usize
            };

            if size > target_len - output.len() {
                return Err(DecodeError::InvalidInput(format!(
                    "{} of {size} bytes overruns the {target_len}-byte target window",
                    half.kind
                )));
            }

            match half.kind {
                InstKind::Add => {
                    let bytes = data
                        .get(data_pos..data_pos + size)
                        .ok_or_else(|| DecodeError::InvalidInput("data section underflow (ADD)".into()))?;
                    output.extend_from_slice(bytes);
                    data_pos += size;
                }
                InstKind::Run => {
                    let &byte = data
                        .get(data_pos)
                        .ok_or_else(|| DecodeError::InvalidInput("data section underflow (RUN)".into()))?;
                    data_pos += 1;
                    output.resize(output.len() + size, byte);
                }
                InstKind::Copy => {
                    let here = seg_len + output.len() as u64;
                    let addr = addrs.next(acache, half.mode, here)?;
                    copy_instruction(addr, size, seg_len, source, source_offset, copy_buf, output)?;
                }
                InstKind::Noop => {}
            }
        }
    }

    if output.len() != target_len {
        return Err(DecodeError::InvalidInput(format!(
            "target size mismatch: expected {target_len}, got {}",
            output.len()
        )));
    }
    Ok(())
}

#[inline]
fn copy_instruction<P: SourceProvider + ?Sized>(
    addr: u64,
    size: usize,
    seg_len: u64,
    source: &mut P,
    source_offset: u64,
    copy_buf: &mut Vec<u8>,
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    if addr < seg_len {
        if addr + size as u64 > seg_len {
            return Err(DecodeError::InvalidInput(
                "COPY spans source/target boundary".into(),
            ));
        }
        let src_offset = source_offset + addr;
        if let Some(slice) = source.source_slice(src_offset, size) {
            output.extend_from_slice(slice);
        } else {
            copy_buf.resize(size, 0);
            let n = source.read_source(src_offset, copy_buf)?;
            if n < size {
                return Err(DecodeError::InvalidInput(format!(
                    "source underflow: requested {size} bytes at offset {src_offset}, got {n}"
                )));
            }
            output.extend_from_slice(copy_buf);
        }
    } else {
        let start = (addr - seg_len) as usize;
        if start + size <= output.len() {
            output.extend_from_within(start..start + size);
        } else {
            // Overlapping: bytes written by this COPY feed its later reads.
            for i in start..start + size {
                let byte = output[i];
                output.push(byte);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stream decoder
// ---------------------------------------------------------------------------

/// A window whose sections have been read but not executed.
#[derive(Debug, Clone)]
pub struct RawWindow {
    pub header: WindowHeader,
    pub data: Vec<u8>,
    pub inst: Vec<u8>,
    pub addr: Vec<u8>,
}

/// Decodes a complete VCDIFF stream (file header + all windows).
pub struct StreamDecoder<R: Read> {
    reader: R,
    opts: DecodeOptions,
    file_header: Option<FileHeader>,
    code_table: Cow<'static, CodeTable>,
    acache: AddressCache,
    data_buf: Vec<u8>,
    inst_buf: Vec<u8>,
    addr_buf: Vec<u8>,
    copy_buf: Vec<u8>,
    segment_buf: Vec<u8>,
    window_buf: Vec<u8>,
    windows: u64,
    written: u64,
}

impl<R: Read> StreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, DecodeOptions::default())
    }

    pub fn with_options(reader: R, opts: DecodeOptions) -> Self {
        Self {
            reader,
            opts,
            file_header: None,
            code_table: Cow::Borrowed(CodeTable::standard()),
            acache: AddressCache::new(),
            data_buf: Vec::new(),
            inst_buf: Vec::new(),
            addr_buf: Vec::new(),
            copy_buf: Vec::new(),
            segment_buf: Vec::new(),
            window_buf: Vec::new(),
            windows: 0,
            written: 0,
        }
    }

    /// Read the file header if that has not happened yet.
    pub fn read_header(&mut self) -> Result<&FileHeader, DecodeError> {
        let hdr = match self.file_header.take() {
            Some(hdr) => hdr,
            None => {
                let hdr = FileHeader::decode(&mut self.reader)?;
                if let Some(ct) = &hdr.code_table {
                    if !self.opts.allow_custom_code_table {
                        return Err(DecodeError::Unsupported(
                            "custom code table inside a code table delta".into(),
                        ));
                    }
                    let (table, cache) = load_code_table(ct)?;
                    log::debug!(
                        "custom code table: near {} same {}",
                        ct.near_size,
                        ct.same_size
                    );
                    self.code_table = Cow::Owned(table);
                    self.acache = cache;
                }
                hdr
            }
        };
        Ok(self.file_header.insert(hdr))
    }

    pub fn file_header(&self) -> Option<&FileHeader> {
        self.file_header.as_ref()
    }

    /// Code table in effect (after the header has been read).
    pub fn code_table(&self) -> &CodeTable {
        &self.code_table
    }

    /// A fresh cache with this stream's near/same sizes.
    pub fn new_address_cache(&self) -> AddressCache {
        let mut cache = self.acache.clone();
        cache.init();
        cache
    }

    pub fn windows_decoded(&self) -> u64 {
        self.windows
    }

    /// Target bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn check_limits(&self, wh: &WindowHeader) -> Result<(), DecodeError> {
        let max = self.opts.max_window_size;
        // Dictionary segments are read through the provider; only a
        // VCD_TARGET segment is buffered.
        let buffered_segment = match wh.segment {
            Some(seg) if seg.origin == SegmentOrigin::Target => seg.len,
            _ => 0,
        };
        let lens = [
            wh.target_window_len,
            buffered_segment,
            wh.data_len,
            wh.inst_len,
            wh.addr_len,
        ];
        for len in lens {
            if len > max {
                return Err(DecodeError::WindowTooLarge { len, max });
            }
        }
        let computed = wh.compute_enc_len();
        if wh.enc_len != computed {
            log::warn!(
                "window {}: delta encoding length {} does not match sections ({computed})",
                self.windows,
                wh.enc_len
            );
        }
        Ok(())
    }

    /// Read the next window without executing it.
    pub fn read_window(&mut self) -> Result<Option<RawWindow>, DecodeError> {
        self.read_header()?;
        let Some(header) = WindowHeader::decode(&mut self.reader)? else {
            return Ok(None);
        };
        self.check_limits(&header)?;
        let data = header::read_section(&mut self.reader, header.data_len, "data section")?;
        let inst = header::read_section(&mut self.reader, header.inst_len, "instruction section")?;
        let addr = header::read_section(&mut self.reader, header.addr_len, "address section")?;
        self.windows += 1;
        Ok(Some(RawWindow {
            header,
            data,
            inst,
            addr,
        }))
    }

    /// Decode the next window and append it to `target`.
    /// Returns `Ok(false)` when there are no more windows.
    ///
    /// `target` is read back for windows whose source segment is earlier
    /// target output; its position is restored before writing.
    pub fn decode_window<S, T>(&mut self, source: &mut S, target: &mut T) -> Result<bool, DecodeError>
    where
        S: SourceProvider + ?Sized,
        T: Read + Write + Seek,
    {
        self.read_header()?;
        let Some(wh) = WindowHeader::decode(&mut self.reader)? else {
            return Ok(false);
        };
        self.check_limits(&wh)?;

        header::read_section_into(&mut self.reader, wh.data_len, "data section", &mut self.data_buf)?;
        header::read_section_into(&mut self.reader, wh.inst_len, "instruction section", &mut self.inst_buf)?;
        header::read_section_into(&mut self.reader, wh.addr_len, "address section", &mut self.addr_buf)?;

        let sections = WindowData {
            data: &self.data_buf,
            inst: &self.inst_buf,
            addr: &self.addr_buf,
        };

        match wh.segment {
            None => {
                let mut empty: &[u8] = &[];
                decode_window_into(
                    &wh,
                    sections,
                    &self.code_table,
                    &mut self.acache,
                    &mut empty,
                    0,
                    &mut self.copy_buf,
                    &mut self.window_buf,
                )?;
            }
            Some(seg) if seg.origin == SegmentOrigin::Dictionary => {
                if !source.is_present() {
                    return Err(DecodeError::MissingSource);
                }
                if let Some(len) = source.source_len()
                    && seg.offset.checked_add(seg.len).is_none_or(|end| end > len)
                {
                    return Err(DecodeError::InvalidInput(format!(
                        "source segment {}+{} beyond {len}-byte source",
                        seg.offset, seg.len
                    )));
                }
                decode_window_into(
                    &wh,
                    sections,
                    &self.code_table,
                    &mut self.acache,
                    source,
                    seg.offset,
                    &mut self.copy_buf,
                    &mut self.window_buf,
                )?;
            }
            Some(seg) => {
                let resume = target.stream_position()?;
                target.seek(SeekFrom::Start(seg.offset))?;
                let read = header::read_section_into(target, seg.len, "target segment", &mut self.segment_buf);
                target.seek(SeekFrom::Start(resume))?;
                read?;
                let mut segment: &[u8] = &self.segment_buf;
                decode_window_into(
                    &wh,
                    sections,
                    &self.code_table,
                    &mut self.acache,
                    &mut segment,
                    0,
                    &mut self.copy_buf,
                    &mut self.window_buf,
                )?;
            }
        }

        if let Some(expected) = wh.adler32 {
            match self.opts.checksum {
                ChecksumMode::Ignore => {}
                mode => {
                    let actual = checksum::adler32(&self.window_buf);
                    if actual != expected {
                        if mode == ChecksumMode::Verify {
                            return Err(DecodeError::ChecksumMismatch { expected, actual });
                        }
                        log::warn!(
                            "window {}: checksum mismatch (expected {expected:#010X}, got {actual:#010X})",
                            self.windows
                        );
                    }
                }
            }
        }

        target.write_all(&self.window_buf)?;
        log::debug!(
            "window {}: {} bytes, data/inst/addr {}/{}/{}",
            self.windows,
            self.window_buf.len(),
            wh.data_len,
            wh.inst_len,
            wh.addr_len
        );
        self.windows += 1;
        self.written += self.window_buf.len() as u64;
        Ok(true)
    }

    /// Decode all remaining windows. Returns the total bytes written.
    pub fn decode_to_end<S, T>(&mut self, source: &mut S, target: &mut T) -> Result<u64, DecodeError>
    where
        S: SourceProvider + ?Sized,
        T: Read + Write + Seek,
    {
        while self.decode_window(source, target)? {}
        Ok(self.written)
    }
}

/// Rebuild a custom code table from its header block.
fn load_code_table(data: &CodeTableData) -> Result<(CodeTable, AddressCache), DecodeError> {
    let nested = DecodeOptions {
        max_window_size: CODE_TABLE_BYTES as u64,
        checksum: ChecksumMode::Verify,
        allow_custom_code_table: false,
    };
    let mut dictionary: &[u8] = default_table_bytes();
    let mut table = Cursor::new(Vec::with_capacity(CODE_TABLE_BYTES));
    decode_with_options(&mut dictionary, &data.delta[..], &mut table, nested)?;

    let bytes = table.into_inner();
    if bytes.len() != CODE_TABLE_BYTES {
        return Err(DecodeError::CodeTableSize(bytes.len()));
    }
    let table = CodeTable::from_bytes(&bytes)?;
    let cache = AddressCache::with_sizes(data.near_size as usize, data.same_size as usize)?;
    Ok((table, cache))
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Apply `patch` to `source`, appending the reconstructed target to
/// `target`. Returns the number of bytes written.
pub fn decode<S, R, T>(source: &mut S, patch: R, target: &mut T) -> Result<u64, DecodeError>
where
    S: SourceProvider + ?Sized,
    R: Read,
    T: Read + Write + Seek,
{
    decode_with_options(source, patch, target, DecodeOptions::default())
}

pub fn decode_with_options<S, R, T>(
    source: &mut S,
    patch: R,
    target: &mut T,
    opts: DecodeOptions,
) -> Result<u64, DecodeError>
where
    S: SourceProvider + ?Sized,
    R: Read,
    T: Read + Write + Seek,
{
    let mut decoder = StreamDecoder::with_options(patch, opts);
    decoder.decode_to_end(source, target)
}

/// Decode a delta held in memory against an in-memory source.
pub fn decode_memory(delta: &[u8], source: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut src = source;
    let mut out = Cursor::new(Vec::new());
    decode(&mut src, delta, &mut out)?;
    Ok(out.into_inner())
}

// ---------------------------------------------------------------------------
// Instruction iterator (for inspection/debugging)
// ---------------------------------------------------------------------------

/// Walk a window's instructions, resolving sizes and COPY addresses
/// without producing output.
pub struct InstructionIterator<'a> {
    inst_data: &'a [u8],
    addr_data: &'a [u8],
    inst_pos: usize,
    addr_pos: usize,
    code_table: &'a CodeTable,
    acache: AddressCache,
    segment_len: u64,
    target_pos: u64,
    pending_second: Option<Instruction>,
}

impl<'a> InstructionIterator<'a> {
    pub fn new(inst_section: &'a [u8], addr_section: &'a [u8], segment_len: u64) -> Self {
        Self::with_code_table(
            inst_section,
            addr_section,
            segment_len,
            CodeTable::standard(),
            AddressCache::new(),
        )
    }

    pub fn with_code_table(
        inst_section: &'a [u8],
        addr_section: &'a [u8],
        segment_len: u64,
        code_table: &'a CodeTable,
        mut acache: AddressCache,
    ) -> Self {
        acache.init();
        Self {
            inst_data: inst_section,
            addr_data: addr_section,
            inst_pos: 0,
            addr_pos: 0,
            code_table,
            acache,
            segment_len,
            target_pos: 0,
            pending_second: None,
        }
    }

    fn resolve(&mut self, half: Instruction) -> Result<DeltaOp, DecodeError> {
        let size = if half.size == 0 {
            let (val, consumed) = varint::read_u64(&self.inst_data[self.inst_pos..])?;
            self.inst_pos += consumed;
            u32::try_from(val).map_err(|_| DecodeError::MalformedInteger)?
        } else {
            u32::from(half.size)
        };

        let op = match half.kind {
            InstKind::Run => DeltaOp::Run { len: size },
            InstKind::Add => DeltaOp::Add { len: size },
            InstKind::Copy => {
                let here = self.segment_len + self.target_pos;
                let (addr, consumed) =
                    self.acache
                        .decode(half.mode, &self.addr_data[self.addr_pos..], here)?;
                self.addr_pos += consumed;
                DeltaOp::Copy { len: size, addr }
            }
            InstKind::Noop => return Err(DecodeError::InvalidInput("NOOP has no operation".into())),
        };

        self.target_pos += u64::from(size);
        Ok(op)
    }
}

impl Iterator for InstructionIterator<'_> {
    type Item = Result<DeltaOp, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let half = match self.pending_second.take() {
                Some(half) => half,
                None => {
                    let &opcode = self.inst_data.get(self.inst_pos)?;
                    self.inst_pos += 1;
                    let entry = self.code_table.get(opcode);
                    if !entry.second.is_noop() {
                        self.pending_second = Some(entry.second);
                    }
                    entry.first
                }
            };
            if !half.is_noop() {
                return Some(self.resolve(half));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
