// VCDIFF address cache (RFC 3284, Section 5.3).
//
// COPY addresses are written relative to one of the NEAR slots, to the
// current position, absolutely, or as a single byte indexing the SAME
// cache. Encoder and decoder run identical updates so their caches agree
// after every address.

use thiserror::Error;

use super::varint;

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// Address is `here - value`.
pub const VCD_HERE: u8 = 1;

pub const DEFAULT_NEAR_SIZE: usize = 4;
pub const DEFAULT_SAME_SIZE: usize = 3;

/// Modes 0..=255.
const MAX_MODE_COUNT: usize = 256;

/// NEAR/SAME address cache.
///
/// With the default sizes (near 4, same 3) there are nine modes:
///   0      SELF  absolute
///   1      HERE  here - value
///   2..5   NEAR  near\[mode-2\] + value
///   6..8   SAME  same\[(mode-6)*256 + byte\]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCache {
    s_near: usize,
    s_same: usize,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::build(DEFAULT_NEAR_SIZE, DEFAULT_SAME_SIZE)
    }

    /// Cache with `s_near` NEAR slots and `s_same` SAME blocks. Modes are
    /// single bytes, so `2 + s_near + s_same` may not exceed 256.
    pub fn with_sizes(s_near: usize, s_same: usize) -> Result<Self, AddressCacheError> {
        if 2 + s_near + s_same > MAX_MODE_COUNT {
            return Err(AddressCacheError::TooManyModes {
                near: s_near,
                same: s_same,
            });
        }
        Ok(Self::build(s_near, s_same))
    }

    fn build(s_near: usize, s_same: usize) -> Self {
        Self {
            s_near,
            s_same,
            near: vec![0; s_near],
            same: vec![0; s_same * 256],
            next_slot: 0,
        }
    }

    /// Zero both caches. Called at the start of every window.
    pub fn init(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    /// Re-initialize for a new window and expose its address section for
    /// sequential decoding.
    pub fn reset<'a>(&mut self, section: &'a [u8]) -> AddressReader<'a> {
        self.init();
        AddressReader {
            data: section,
            pos: 0,
        }
    }

    /// Total number of address modes (2 + near + same).
    #[inline]
    pub fn mode_count(&self) -> usize {
        2 + self.s_near + self.s_same
    }

    /// Highest valid mode number.
    #[inline]
    pub fn max_mode(&self) -> u8 {
        (self.mode_count() - 1) as u8
    }

    #[inline]
    pub fn s_near(&self) -> usize {
        self.s_near
    }

    #[inline]
    pub fn s_same(&self) -> usize {
        self.s_same
    }

    #[inline]
    fn same_start(&self) -> usize {
        2 + self.s_near
    }

    /// Record `addr` in both caches.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        if self.s_near > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.s_near;
        }
        if self.s_same > 0 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            self.same[idx] = addr;
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Pick the cheapest mode for `addr` at position `here`.
    ///
    /// A SAME hit always wins. Otherwise SELF, HERE and each NEAR slot are
    /// compared by encoded value, earlier candidates winning ties.
    pub fn encode(&mut self, addr: u64, here: u64) -> (u8, EncodedAddr) {
        debug_assert!(addr < here, "COPY address {addr} not before {here}");

        if self.s_same > 0 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            if self.same[idx] == addr {
                let mode = (self.same_start() + idx / 256) as u8;
                self.update(addr);
                return (mode, EncodedAddr::SameByte((idx % 256) as u8));
            }
        }

        let mut best_mode = VCD_SELF;
        let mut best_val = addr;

        let here_val = here - addr;
        if here_val < best_val {
            best_mode = VCD_HERE;
            best_val = here_val;
        }

        for (i, &near) in self.near.iter().enumerate() {
            if let Some(d) = addr.checked_sub(near)
                && d < best_val
            {
                best_mode = (i + 2) as u8;
                best_val = d;
            }
        }

        self.update(addr);
        (best_mode, EncodedAddr::varint(best_val))
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Decode one address from the front of `addr_data`.
    ///
    /// Returns `(address, bytes_consumed)`.
    pub fn decode(
        &mut self,
        mode: u8,
        addr_data: &[u8],
        here: u64,
    ) -> Result<(u64, usize), AddressCacheError> {
        let m = mode as usize;
        if m >= self.mode_count() {
            return Err(AddressCacheError::InvalidMode(mode));
        }
        let same_start = self.same_start();

        let (addr, consumed) = if m < same_start {
            let (raw, consumed) =
                varint::read_u64(addr_data).map_err(|_| AddressCacheError::Truncated)?;
            let addr = match m {
                0 => Some(raw),
                1 => here.checked_sub(raw),
                _ => self.near[m - 2].checked_add(raw),
            };
            let addr = addr.ok_or(AddressCacheError::InvalidAddress { addr: raw, here })?;
            (addr, consumed)
        } else {
            let &byte = addr_data.first().ok_or(AddressCacheError::Truncated)?;
            let slot = m - same_start;
            (self.same[slot * 256 + byte as usize], 1)
        };

        if addr >= here {
            return Err(AddressCacheError::InvalidAddress { addr, here });
        }

        self.update(addr);
        Ok((addr, consumed))
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Address section reader
// ---------------------------------------------------------------------------

/// Cursor over a window's address section.
#[derive(Debug)]
pub struct AddressReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AddressReader<'a> {
    /// Decode the next COPY address through `cache`.
    pub fn next(
        &mut self,
        cache: &mut AddressCache,
        mode: u8,
        here: u64,
    ) -> Result<u64, AddressCacheError> {
        let (addr, consumed) = cache.decode(mode, &self.data[self.pos..], here)?;
        self.pos += consumed;
        Ok(addr)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

// ---------------------------------------------------------------------------
// Encoded address
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedAddr {
    /// SELF, HERE and NEAR modes.
    VarInt {
        bytes: [u8; varint::MAX_VARINT_LEN],
        len: usize,
    },
    /// SAME modes.
    SameByte(u8),
}

impl EncodedAddr {
    fn varint(val: u64) -> Self {
        let mut buf = [0u8; varint::MAX_VARINT_LEN];
        let len = varint::encode_u64(val, &mut buf);
        let mut bytes = [0u8; varint::MAX_VARINT_LEN];
        bytes[..len].copy_from_slice(&buf[varint::MAX_VARINT_LEN - len..]);
        EncodedAddr::VarInt { bytes, len }
    }

    pub fn len(&self) -> usize {
        match self {
            EncodedAddr::VarInt { len, .. } => *len,
            EncodedAddr::SameByte(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedAddr::VarInt { bytes, len } => &bytes[..*len],
            EncodedAddr::SameByte(b) => std::slice::from_ref(b),
        }
    }

    /// The integer value carried by a non-SAME encoding.
    pub fn value(&self) -> Option<u64> {
        match self {
            EncodedAddr::VarInt { .. } => varint::read_u64(self.as_bytes()).ok().map(|(v, _)| v),
            EncodedAddr::SameByte(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressCacheError {
    #[error("address section underflow")]
    Truncated,
    #[error("address mode {0} out of range")]
    InvalidMode(u8),
    #[error("COPY address {addr} invalid at position {here}")]
    InvalidAddress { addr: u64, here: u64 },
    #[error("cache sizes near {near} same {same} need more than 256 modes")]
    TooManyModes { near: usize, same: usize },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
