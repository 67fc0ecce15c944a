// VCDIFF file header and per-window header encoding/decoding (RFC 3284,
// Sections 4.1 to 4.3).

use std::io::{self, Read, Write};

use bitflags::bitflags;

use super::decoder::DecodeError;
use super::varint;

// ---------------------------------------------------------------------------
// Magic and indicator bytes
// ---------------------------------------------------------------------------

pub const VCDIFF_MAGIC: [u8; 3] = [0xD6, 0xC3, 0xC4];
pub const VCDIFF_VERSION: u8 = 0x00;

bitflags! {
    /// `Hdr_Indicator`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HdrIndicator: u8 {
        const SECONDARY = 1 << 0;
        const CODE_TABLE = 1 << 1;
        /// Application header (extension).
        const APP_HEADER = 1 << 2;
    }
}

bitflags! {
    /// `Win_Indicator`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WinIndicator: u8 {
        const SOURCE = 1 << 0;
        const TARGET = 1 << 1;
        /// Adler-32 of the target window follows the section lengths
        /// (extension).
        const ADLER32 = 1 << 2;
    }
}

bitflags! {
    /// `Delta_Indicator`. Only the empty set is produced or accepted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeltaIndicator: u8 {
        const DATA_COMP = 1 << 0;
        const INST_COMP = 1 << 1;
        const ADDR_COMP = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Low-level readers
// ---------------------------------------------------------------------------

pub(crate) fn read_byte<R: Read>(r: &mut R, what: &'static str) -> Result<u8, DecodeError> {
    let mut b = [0u8; 1];
    match r.read_exact(&mut b) {
        Ok(()) => Ok(b[0]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Truncated(what)),
        Err(e) => Err(DecodeError::Io(e)),
    }
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
pub(crate) fn read_section<R: Read>(
    r: &mut R,
    len: u64,
    what: &'static str,
) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    read_section_into(r, len, what, &mut buf)?;
    Ok(buf)
}

/// As [`read_section`], reusing `buf`.
pub(crate) fn read_section_into<R: Read>(
    r: &mut R,
    len: u64,
    what: &'static str,
    buf: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    buf.clear();
    r.by_ref().take(len).read_to_end(buf)?;
    if buf.len() as u64 != len {
        return Err(DecodeError::Truncated(what));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Custom code table block of the file header, still delta-compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTableData {
    pub near_size: u8,
    pub same_size: u8,
    /// A complete VCDIFF delta that rebuilds the 1536-byte table from the
    /// default table's bytes.
    pub delta: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub code_table: Option<CodeTableData>,
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    pub fn indicator(&self) -> HdrIndicator {
        let mut ind = HdrIndicator::empty();
        ind.set(HdrIndicator::CODE_TABLE, self.code_table.is_some());
        ind.set(HdrIndicator::APP_HEADER, self.app_header.is_some());
        ind
    }

    /// Layout: magic, version, hdr_ind, [code table], [app header].
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&VCDIFF_MAGIC)?;
        w.write_all(&[VCDIFF_VERSION, self.indicator().bits()])?;

        if let Some(ct) = &self.code_table {
            varint::write_usize(w, ct.delta.len() + 2)?;
            w.write_all(&[ct.near_size, ct.same_size])?;
            w.write_all(&ct.delta)?;
        }

        if let Some(data) = &self.app_header {
            varint::write_usize(w, data.len())?;
            w.write_all(data)?;
        }

        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 3];
        for b in magic.iter_mut() {
            *b = read_byte(r, "file header")?;
        }
        if magic != VCDIFF_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = read_byte(r, "file header")?;
        if version != VCDIFF_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let raw = read_byte(r, "file header")?;
        let ind = HdrIndicator::from_bits(raw).ok_or(DecodeError::InvalidHeaderIndicator(raw))?;

        if ind.contains(HdrIndicator::SECONDARY) {
            let id = read_byte(r, "secondary compressor id")?;
            return Err(DecodeError::Unsupported(format!(
                "secondary compressor {id}"
            )));
        }

        let code_table = if ind.contains(HdrIndicator::CODE_TABLE) {
            let len = varint::stream_read_u64(r)?;
            let data_len = len.checked_sub(2).ok_or_else(|| {
                DecodeError::InvalidInput(format!("code table block of {len} bytes"))
            })?;
            let near_size = read_byte(r, "code table")?;
            let same_size = read_byte(r, "code table")?;
            let delta = read_section(r, data_len, "code table")?;
            Some(CodeTableData {
                near_size,
                same_size,
                delta,
            })
        } else {
            None
        };

        let app_header = if ind.contains(HdrIndicator::APP_HEADER) {
            let len = varint::stream_read_u64(r)?;
            Some(read_section(r, len, "application header")?)
        } else {
            None
        };

        Ok(Self {
            code_table,
            app_header,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-window header
// ---------------------------------------------------------------------------

/// Where a window's source segment lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOrigin {
    /// The source dictionary (`VCD_SOURCE`).
    Dictionary,
    /// Previously reconstructed target output (`VCD_TARGET`).
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSegment {
    pub origin: SegmentOrigin,
    pub len: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowHeader {
    pub segment: Option<SourceSegment>,
    /// Length of the delta encoding that follows this field.
    pub enc_len: u64,
    pub target_window_len: u64,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    pub adler32: Option<u32>,
}

impl WindowHeader {
    pub fn indicator(&self) -> WinIndicator {
        let mut ind = match self.segment.map(|s| s.origin) {
            None => WinIndicator::empty(),
            Some(SegmentOrigin::Dictionary) => WinIndicator::SOURCE,
            Some(SegmentOrigin::Target) => WinIndicator::TARGET,
        };
        ind.set(WinIndicator::ADLER32, self.adler32.is_some());
        ind
    }

    /// Source segment length, or 0 when the window has none.
    #[inline]
    pub fn source_len(&self) -> u64 {
        self.segment.map_or(0, |s| s.len)
    }

    /// Layout: win_ind, [segment len, offset], enc_len, target len,
    /// delta_ind, data/inst/addr lengths, [adler32 big-endian].
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.indicator().bits()])?;

        if let Some(seg) = &self.segment {
            varint::write_u64(w, seg.len)?;
            varint::write_u64(w, seg.offset)?;
        }

        varint::write_u64(w, self.enc_len)?;
        varint::write_u64(w, self.target_window_len)?;
        w.write_all(&[DeltaIndicator::empty().bits()])?;
        varint::write_u64(w, self.data_len)?;
        varint::write_u64(w, self.inst_len)?;
        varint::write_u64(w, self.addr_len)?;

        if let Some(cksum) = self.adler32 {
            w.write_all(&cksum.to_be_bytes())?;
        }

        Ok(())
    }

    /// Number of bytes following the `enc_len` field.
    pub fn compute_enc_len(&self) -> u64 {
        let mut len = 1u64; // delta indicator
        len += varint::sizeof_u64(self.target_window_len) as u64;
        len += varint::sizeof_u64(self.data_len) as u64;
        len += varint::sizeof_u64(self.inst_len) as u64;
        len += varint::sizeof_u64(self.addr_len) as u64;
        len += self.data_len + self.inst_len + self.addr_len;
        if self.adler32.is_some() {
            len += 4;
        }
        len
    }

    /// Read the next window header. Returns `None` at end of stream.
    pub fn decode<R: Read>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        let mut b = [0u8; 1];
        let raw = match r.read_exact(&mut b) {
            Ok(()) => b[0],
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(DecodeError::Io(e)),
        };

        let has_checksum = raw & WinIndicator::ADLER32.bits() != 0;
        let origin = match raw & !WinIndicator::ADLER32.bits() {
            0 => None,
            1 => Some(SegmentOrigin::Dictionary),
            2 => Some(SegmentOrigin::Target),
            _ => return Err(DecodeError::InvalidWindowIndicator(raw)),
        };

        let segment = match origin {
            Some(origin) => {
                let len = varint::stream_read_u64(r)?;
                let offset = varint::stream_read_u64(r)?;
                Some(SourceSegment {
                    origin,
                    len,
                    offset,
                })
            }
            None => None,
        };

        let enc_len = varint::stream_read_u64(r)?;
        let target_window_len = varint::stream_read_u64(r)?;

        let delta_ind = read_byte(r, "window header")?;
        if delta_ind != 0 {
            return Err(DecodeError::Unsupported(format!(
                "compressed window sections (delta indicator {delta_ind:#04x})"
            )));
        }

        let data_len = varint::stream_read_u64(r)?;
        let inst_len = varint::stream_read_u64(r)?;
        let addr_len = varint::stream_read_u64(r)?;

        let adler32 = if has_checksum {
            let mut ck = [0u8; 4];
            for byte in ck.iter_mut() {
                *byte = read_byte(r, "window checksum")?;
            }
            Some(u32::from_be_bytes(ck))
        } else {
            None
        };

        let hdr = WindowHeader {
            segment,
            enc_len,
            target_window_len,
            data_len,
            inst_len,
            addr_len,
            adler32,
        };

        let expected = hdr.compute_enc_len();
        if enc_len != expected {
            log::warn!("window delta length is {enc_len}, sections imply {expected}");
        }

        Ok(Some(hdr))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
