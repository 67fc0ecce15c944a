// VCDIFF code tables (RFC 3284, Sections 5.4 and 7).
//
// An opcode byte selects a pair of instructions from a 256-entry table.
// The default table is generated from the RFC 3284 descriptor; custom
// tables travel in the file header as 1536 bytes laid out as six 256-byte
// arrays: inst1, inst2, size1, size2, mode1, mode2.

use std::fmt;
use std::sync::LazyLock;

use thiserror::Error;

/// Serialized size of a code table.
pub const CODE_TABLE_BYTES: usize = 1536;

/// Smallest COPY size with an inline opcode in the default table.
pub const MIN_COPY_INLINE: u8 = 4;

/// Instruction kinds, numbered as on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstKind {
    #[default]
    Noop = 0,
    Add = 1,
    Run = 2,
    Copy = 3,
}

impl InstKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(InstKind::Noop),
            1 => Some(InstKind::Add),
            2 => Some(InstKind::Run),
            3 => Some(InstKind::Copy),
            _ => None,
        }
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstKind::Noop => "NOOP",
            InstKind::Add => "ADD",
            InstKind::Run => "RUN",
            InstKind::Copy => "COPY",
        };
        f.write_str(name)
    }
}

/// One half of a code table entry.
///
/// `size == 0` means the size follows the opcode as a varint. `mode` is
/// only meaningful for COPY.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub kind: InstKind,
    pub size: u8,
    pub mode: u8,
}

impl Instruction {
    pub const NOOP: Instruction = Instruction {
        kind: InstKind::Noop,
        size: 0,
        mode: 0,
    };

    pub const fn add(size: u8) -> Self {
        Instruction {
            kind: InstKind::Add,
            size,
            mode: 0,
        }
    }

    pub const fn run(size: u8) -> Self {
        Instruction {
            kind: InstKind::Run,
            size,
            mode: 0,
        }
    }

    pub const fn copy(size: u8, mode: u8) -> Self {
        Instruction {
            kind: InstKind::Copy,
            size,
            mode,
        }
    }

    #[inline]
    pub fn is_noop(&self) -> bool {
        self.kind == InstKind::Noop
    }
}

/// A code table entry: one or two instructions sharing an opcode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub first: Instruction,
    pub second: Instruction,
}

impl CodeTableEntry {
    const fn single(first: Instruction) -> Self {
        CodeTableEntry {
            first,
            second: Instruction::NOOP,
        }
    }

    #[inline]
    pub fn is_compound(&self) -> bool {
        !self.first.is_noop() && !self.second.is_noop()
    }
}

/// A complete 256-entry code table.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeTable {
    entries: [CodeTableEntry; 256],
}

impl fmt::Debug for CodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeTable")
            .field("max_mode", &self.max_mode())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeTableError {
    #[error("code table has no size-0 opcode for {kind} (mode {mode})")]
    NoFallback { kind: InstKind, mode: u8 },
    #[error("opcode {opcode} has invalid instruction type {kind}")]
    InvalidKind { opcode: usize, kind: u8 },
    #[error("code table data is {0} bytes, expected {CODE_TABLE_BYTES}")]
    InvalidSize(usize),
}

static DEFAULT_TABLE: LazyLock<CodeTable> = LazyLock::new(build_default_code_table);

impl Default for CodeTable {
    fn default() -> Self {
        DEFAULT_TABLE.clone()
    }
}

impl CodeTable {
    /// The process-wide default table.
    pub fn standard() -> &'static CodeTable {
        &DEFAULT_TABLE
    }

    pub fn from_entries(entries: [CodeTableEntry; 256]) -> Self {
        CodeTable { entries }
    }

    #[inline]
    pub fn get(&self, opcode: u8) -> &CodeTableEntry {
        &self.entries[opcode as usize]
    }

    pub fn entries(&self) -> &[CodeTableEntry; 256] {
        &self.entries
    }

    /// Highest COPY mode referenced by any entry.
    pub fn max_mode(&self) -> u8 {
        self.entries
            .iter()
            .flat_map(|e| [e.first, e.second])
            .filter(|i| i.kind == InstKind::Copy)
            .map(|i| i.mode)
            .max()
            .unwrap_or(0)
    }

    /// Parse the RFC 3284 Section 7 serialization.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodeTableError> {
        if bytes.len() != CODE_TABLE_BYTES {
            return Err(CodeTableError::InvalidSize(bytes.len()));
        }
        let (inst1, rest) = bytes.split_at(256);
        let (inst2, rest) = rest.split_at(256);
        let (size1, rest) = rest.split_at(256);
        let (size2, rest) = rest.split_at(256);
        let (mode1, mode2) = rest.split_at(256);

        let kind = |opcode: usize, b: u8| {
            InstKind::from_u8(b).ok_or(CodeTableError::InvalidKind { opcode, kind: b })
        };

        let mut entries = [CodeTableEntry::default(); 256];
        for (op, entry) in entries.iter_mut().enumerate() {
            entry.first = Instruction {
                kind: kind(op, inst1[op])?,
                size: size1[op],
                mode: mode1[op],
            };
            entry.second = Instruction {
                kind: kind(op, inst2[op])?,
                size: size2[op],
                mode: mode2[op],
            };
        }
        Ok(CodeTable { entries })
    }

    /// Serialize to the RFC 3284 Section 7 layout.
    pub fn to_bytes(&self) -> [u8; CODE_TABLE_BYTES] {
        let mut out = [0u8; CODE_TABLE_BYTES];
        for (op, e) in self.entries.iter().enumerate() {
            out[op] = e.first.kind as u8;
            out[256 + op] = e.second.kind as u8;
            out[512 + op] = e.first.size;
            out[768 + op] = e.second.size;
            out[1024 + op] = e.first.mode;
            out[1280 + op] = e.second.mode;
        }
        out
    }
}

/// Raw bytes of the default table; the dictionary custom tables are
/// delta-encoded against.
pub fn default_table_bytes() -> &'static [u8; CODE_TABLE_BYTES] {
    static BYTES: LazyLock<[u8; CODE_TABLE_BYTES]> =
        LazyLock::new(|| CodeTable::standard().to_bytes());
    &BYTES
}

/// Generate the RFC 3284 default table from its descriptor.
fn build_default_code_table() -> CodeTable {
    let mut tbl = [CodeTableEntry::default(); 256];
    let mut idx: usize = 0;

    const ADD_SIZES: u8 = 17;
    const NEAR_MODES: u8 = 4;
    const SAME_MODES: u8 = 3;
    const CPY_SIZES: u8 = 15;
    const ADDCOPY_ADD_MAX: u8 = 4;
    const ADDCOPY_NEAR_CPY_MAX: u8 = 6;
    const ADDCOPY_SAME_CPY_MAX: u8 = 4;
    const COPYADD_ADD_MAX: u8 = 1;
    const COPYADD_NEAR_CPY_MAX: u8 = 4;
    const COPYADD_SAME_CPY_MAX: u8 = 4;
    const CPY_MODES: u8 = 2 + NEAR_MODES + SAME_MODES;
    const FIRST_SAME_MODE: u8 = 2 + NEAR_MODES;

    tbl[idx] = CodeTableEntry::single(Instruction::run(0));
    idx += 1;

    for size in 0..=ADD_SIZES {
        tbl[idx] = CodeTableEntry::single(Instruction::add(size));
        idx += 1;
    }

    for mode in 0..CPY_MODES {
        tbl[idx] = CodeTableEntry::single(Instruction::copy(0, mode));
        idx += 1;
        for size in MIN_COPY_INLINE..MIN_COPY_INLINE + CPY_SIZES {
            tbl[idx] = CodeTableEntry::single(Instruction::copy(size, mode));
            idx += 1;
        }
    }

    for mode in 0..CPY_MODES {
        let cpy_max = if mode < FIRST_SAME_MODE {
            ADDCOPY_NEAR_CPY_MAX
        } else {
            ADDCOPY_SAME_CPY_MAX
        };
        for add_size in 1..=ADDCOPY_ADD_MAX {
            for cpy_size in MIN_COPY_INLINE..=cpy_max {
                tbl[idx] = CodeTableEntry {
                    first: Instruction::add(add_size),
                    second: Instruction::copy(cpy_size, mode),
                };
                idx += 1;
            }
        }
    }

    for mode in 0..CPY_MODES {
        let cpy_max = if mode < FIRST_SAME_MODE {
            COPYADD_NEAR_CPY_MAX
        } else {
            COPYADD_SAME_CPY_MAX
        };
        for cpy_size in MIN_COPY_INLINE..=cpy_max {
            for add_size in 1..=COPYADD_ADD_MAX {
                tbl[idx] = CodeTableEntry {
                    first: Instruction::copy(cpy_size, mode),
                    second: Instruction::add(add_size),
                };
                idx += 1;
            }
        }
    }

    debug_assert_eq!(idx, 256, "code table must have exactly 256 entries");
    CodeTable { entries: tbl }
}

// ---------------------------------------------------------------------------
// Delta operations
// ---------------------------------------------------------------------------

/// An instruction with its resolved size, as produced by the match engine
/// or walked out of a window by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    /// Emit `len` literal bytes from the data section.
    Add { len: u32 },
    /// Copy `len` bytes from `addr` in the source-then-target address space.
    Copy { len: u32, addr: u64 },
    /// Repeat one data-section byte `len` times.
    Run { len: u32 },
}

impl DeltaOp {
    #[inline]
    pub fn len(&self) -> u32 {
        match *self {
            DeltaOp::Add { len } | DeltaOp::Copy { len, .. } | DeltaOp::Run { len } => len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
