// VCDIFF encoder: instruction encoding and window emission.
//
// Takes ADD/COPY/RUN calls in target order and produces the three window
// sections, packing consecutive instructions into compound opcodes when the
// code table has one. Match finding lives in the hash module.

use std::io::{self, Write};
use std::sync::Arc;

use super::address_cache::AddressCache;
use super::checksum;
use super::code_table::{CodeTableError, InstKind, Instruction};
use super::header::{CodeTableData, FileHeader, SegmentOrigin, SourceSegment, WindowHeader};
use super::instruction_map::InstructionMap;
use super::varint;

impl SourceSegment {
    /// A dictionary segment starting at the origin of the source.
    pub fn dictionary(len: u64) -> Self {
        SourceSegment {
            origin: SegmentOrigin::Dictionary,
            len,
            offset: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Window encoder
// ---------------------------------------------------------------------------

/// Accumulates the instructions of one window.
pub struct WindowEncoder {
    data_section: Vec<u8>,
    inst_section: Vec<u8>,
    addr_section: Vec<u8>,

    acache: AddressCache,
    map: Arc<InstructionMap>,

    /// Opcode last written and its index in `inst_section`, while it can
    /// still absorb a following instruction.
    last_opcode: Option<(u8, usize)>,

    target_len: u64,
    segment: Option<SourceSegment>,
    emit_checksum: bool,
    instructions: usize,
}

impl WindowEncoder {
    /// Window encoder for the default code table.
    pub fn new(segment: Option<SourceSegment>, emit_checksum: bool) -> Self {
        Self {
            data_section: Vec::new(),
            inst_section: Vec::new(),
            addr_section: Vec::new(),
            acache: AddressCache::new(),
            map: InstructionMap::standard(),
            last_opcode: None,
            target_len: 0,
            segment,
            emit_checksum,
            instructions: 0,
        }
    }

    /// Window encoder for a custom table. `cache` must not produce modes
    /// the map cannot express.
    pub fn with_code_table(
        segment: Option<SourceSegment>,
        emit_checksum: bool,
        map: Arc<InstructionMap>,
        cache: AddressCache,
    ) -> Result<Self, CodeTableError> {
        if cache.max_mode() > map.max_mode() {
            return Err(CodeTableError::NoFallback {
                kind: InstKind::Copy,
                mode: cache.max_mode(),
            });
        }
        let mut we = Self::new(segment, emit_checksum);
        we.map = map;
        we.acache = cache;
        we.acache.init();
        Ok(we)
    }

    /// Current position in the source-then-target address space.
    #[inline]
    fn here(&self) -> u64 {
        self.segment.map_or(0, |s| s.len) + self.target_len
    }

    /// Target bytes described so far.
    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions
    }

    pub fn add(&mut self, data: &[u8]) -> Result<(), CodeTableError> {
        if data.is_empty() {
            return Ok(());
        }
        self.data_section.extend_from_slice(data);
        self.encode_instruction(InstKind::Add, data.len() as u32, 0)?;
        self.target_len += data.len() as u64;
        Ok(())
    }

    /// COPY `len` bytes from `addr`, which must precede the current
    /// position: `0..segment_len` is the source segment, the rest is this
    /// window's target.
    pub fn copy(&mut self, len: u32, addr: u64) -> Result<(), CodeTableError> {
        if len == 0 {
            return Ok(());
        }
        let (mode, encoded) = self.acache.encode(addr, self.here());
        self.addr_section.extend_from_slice(encoded.as_bytes());
        self.encode_instruction(InstKind::Copy, len, mode)?;
        self.target_len += u64::from(len);
        Ok(())
    }

    pub fn run(&mut self, len: u32, byte: u8) -> Result<(), CodeTableError> {
        if len == 0 {
            return Ok(());
        }
        self.data_section.push(byte);
        self.encode_instruction(InstKind::Run, len, 0)?;
        self.target_len += u64::from(len);
        Ok(())
    }

    /// Finalize the window. `target_data` is the reconstructed window, used
    /// for the checksum when one was requested.
    pub fn finish(self, target_data: Option<&[u8]>) -> WindowSections {
        let checksum = if self.emit_checksum {
            target_data.map(checksum::adler32)
        } else {
            None
        };

        WindowSections {
            segment: self.segment,
            target_len: self.target_len,
            checksum,
            instructions: self.instructions,
            data_section: self.data_section,
            inst_section: self.inst_section,
            addr_section: self.addr_section,
        }
    }

    // -----------------------------------------------------------------------
    // Opcode selection
    // -----------------------------------------------------------------------

    fn encode_instruction(&mut self, kind: InstKind, size: u32, mode: u8) -> Result<(), CodeTableError> {
        self.instructions += 1;
        let inline = u8::try_from(size).ok();
        let inst = |size: u8| Instruction { kind, size, mode };

        if let Some((last, pos)) = self.last_opcode {
            if let Some(sz) = inline
                && let Some(op) = self.map.lookup_combined(last, inst(sz))
            {
                self.inst_section[pos] = op;
                self.last_opcode = None;
                return Ok(());
            }
            if let Some(op) = self.map.lookup_combined(last, inst(0)) {
                self.inst_section[pos] = op;
                varint::push_u64(&mut self.inst_section, u64::from(size));
                self.last_opcode = None;
                return Ok(());
            }
        }

        let pos = self.inst_section.len();
        if let Some(sz) = inline
            && let Some(op) = self.map.lookup_single(inst(sz))
        {
            self.inst_section.push(op);
            self.last_opcode = Some((op, pos));
            return Ok(());
        }

        let op = self
            .map
            .lookup_single(inst(0))
            .ok_or(CodeTableError::NoFallback { kind, mode })?;
        self.inst_section.push(op);
        varint::push_u64(&mut self.inst_section, u64::from(size));
        self.last_opcode = Some((op, pos));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Window sections
// ---------------------------------------------------------------------------

/// A finalized window, ready to be framed.
#[derive(Debug, Clone)]
pub struct WindowSections {
    pub segment: Option<SourceSegment>,
    pub target_len: u64,
    pub checksum: Option<u32>,
    pub instructions: usize,
    pub data_section: Vec<u8>,
    pub inst_section: Vec<u8>,
    pub addr_section: Vec<u8>,
}

impl WindowSections {
    pub fn header(&self) -> WindowHeader {
        let mut wh = WindowHeader {
            segment: self.segment,
            enc_len: 0,
            target_window_len: self.target_len,
            data_len: self.data_section.len() as u64,
            inst_len: self.inst_section.len() as u64,
            addr_len: self.addr_section.len() as u64,
            adler32: self.checksum,
        };
        wh.enc_len = wh.compute_enc_len();
        wh
    }

    /// Write header and sections.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header().encode(w)?;
        w.write_all(&self.data_section)?;
        w.write_all(&self.inst_section)?;
        w.write_all(&self.addr_section)
    }
}

// ---------------------------------------------------------------------------
// Full-stream encoder
// ---------------------------------------------------------------------------

/// Writes a complete VCDIFF stream: file header, then windows.
pub struct StreamEncoder<W: Write> {
    writer: W,
    header_written: bool,
    file_header: FileHeader,
    windows: u64,
}

impl<W: Write> StreamEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
            file_header: FileHeader::default(),
            windows: 0,
        }
    }

    /// Attach an application header (extension) to the file header.
    pub fn set_app_header(&mut self, data: Vec<u8>) {
        self.file_header.app_header = Some(data);
    }

    /// Announce a custom code table. Windows must then be built with
    /// [`WindowEncoder::with_code_table`] for the same table.
    pub fn set_code_table(&mut self, data: CodeTableData) {
        self.file_header.code_table = Some(data);
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.file_header.encode(&mut self.writer)?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn write_window(&mut self, window: WindowEncoder, target_data: Option<&[u8]>) -> io::Result<()> {
        let sections = window.finish(target_data);
        self.write_sections(&sections)
    }

    pub fn write_sections(&mut self, sections: &WindowSections) -> io::Result<()> {
        self.ensure_header()?;
        log::debug!(
            "window {}: target {} bytes, {} instructions, data/inst/addr {}/{}/{}",
            self.windows,
            sections.target_len,
            sections.instructions,
            sections.data_section.len(),
            sections.inst_section.len(),
            sections.addr_section.len()
        );
        self.windows += 1;
        sections.write_to(&mut self.writer)
    }

    /// Number of windows written so far.
    pub fn windows_written(&self) -> u64 {
        self.windows
    }

    /// Flush and return the inner writer. A stream with no windows still
    /// gets its file header.
    pub fn finish(mut self) -> io::Result<W> {
        self.ensure_header()?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::code_table::CodeTable;
    use crate::vcdiff::header::VCDIFF_MAGIC;

    #[test]
    fn small_add_uses_inline_size() {
        let mut we = WindowEncoder::new(None, false);
        we.add(b"hello").unwrap();
        let s = we.finish(None);
        assert_eq!(s.inst_section, vec![6]);
        assert_eq!(s.data_section, b"hello");
        assert_eq!(s.target_len, 5);
    }

    #[test]
    fn long_add_falls_back_to_size_zero() {
        let mut we = WindowEncoder::new(None, false);
        we.add(&[7u8; 300]).unwrap();
        let s = we.finish(None);
        assert_eq!(s.inst_section, vec![1, 0x82, 0x2C]);
    }

    #[test]
    fn run_always_carries_size() {
        let mut we = WindowEncoder::new(None, false);
        we.run(100, 0xAA).unwrap();
        let s = we.finish(None);
        assert_eq!(s.inst_section, vec![0, 100]);
        assert_eq!(s.data_section, vec![0xAA]);
    }

    #[test]
    fn add_then_copy_packs_compound() {
        let mut we = WindowEncoder::new(Some(SourceSegment::dictionary(1024)), false);
        we.add(b"X").unwrap();
        // address 100 at here=1025: SELF, value 100
        we.copy(4, 100).unwrap();
        let s = we.finish(None);
        assert_eq!(s.inst_section, vec![163]);
        assert_eq!(s.addr_section, vec![100]);
        assert_eq!(s.target_len, 5);
    }

    #[test]
    fn copy_then_add_packs_compound() {
        let mut we = WindowEncoder::new(Some(SourceSegment::dictionary(1024)), false);
        we.copy(4, 100).unwrap();
        we.add(b"Y").unwrap();
        let s = we.finish(None);
        assert_eq!(s.inst_section, vec![247]);
    }

    #[test]
    fn at_most_two_instructions_per_opcode() {
        let mut we = WindowEncoder::new(Some(SourceSegment::dictionary(1024)), false);
        we.add(b"A").unwrap();
        we.copy(4, 100).unwrap();
        we.add(b"B").unwrap();
        let s = we.finish(None);
        // ADD+COPY compound, then a fresh ADD(1)
        assert_eq!(s.inst_section, vec![163, 2]);
    }

    #[test]
    fn checksum_requires_target_data() {
        let target = b"hello world";
        let mut we = WindowEncoder::new(None, true);
        we.add(target).unwrap();
        let s = we.finish(Some(target));
        assert_eq!(s.checksum, Some(checksum::adler32(target)));

        let mut bytes = Vec::new();
        s.write_to(&mut bytes).unwrap();
        let wh = WindowHeader::decode(&mut std::io::Cursor::new(&bytes)).unwrap().unwrap();
        assert_eq!(wh.adler32, s.checksum);
        assert_eq!(wh.enc_len, wh.compute_enc_len());
    }

    #[test]
    fn custom_map_with_too_few_modes_is_rejected() {
        let map = Arc::new(InstructionMap::build(CodeTable::standard(), 3).unwrap());
        let err = WindowEncoder::with_code_table(None, false, map, AddressCache::new()).err();
        assert_eq!(
            err,
            Some(CodeTableError::NoFallback {
                kind: InstKind::Copy,
                mode: 8
            })
        );
    }

    #[test]
    fn stream_encoder_writes_header_once() {
        let mut out = Vec::new();
        let mut enc = StreamEncoder::new(&mut out);
        enc.write_window(WindowEncoder::new(None, false), None).unwrap();
        enc.write_window(WindowEncoder::new(None, false), None).unwrap();
        assert_eq!(enc.windows_written(), 2);
        enc.finish().unwrap();

        assert_eq!(&out[..3], &VCDIFF_MAGIC);
        assert_eq!(out[3..5], [0, 0]);
        // two empty windows: ind, enc_len 5, tgt 0, del 0, three zero lengths
        assert_eq!(&out[5..], &[0, 5, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0]);
    }
}
