// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first, bit 7 set on every
// byte except the last. Encoded integers are at most 5 bytes (35 bits); a
// sixth continuation byte marks a corrupt stream.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Maximum encoded length of a wire integer.
pub const MAX_VARINT_LEN: usize = 5;

/// Largest value representable in [`MAX_VARINT_LEN`] bytes.
pub const MAX_VARINT_VALUE: u64 = (1 << (7 * MAX_VARINT_LEN)) - 1;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `num` into the tail of `buf`, returning the number of bytes used.
///
/// Values above [`MAX_VARINT_VALUE`] are a caller bug; callers validate
/// lengths against that bound before framing a window.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    debug_assert!(num <= MAX_VARINT_VALUE, "varint {num} exceeds 35 bits");
    let mut i = MAX_VARINT_LEN;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 || i == 0 {
            break;
        }
    }
    buf[MAX_VARINT_LEN - 1] &= 0x7F;
    MAX_VARINT_LEN - i
}

pub fn write_u64<W: Write>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    w.write_all(&buf[MAX_VARINT_LEN - len..])
}

pub fn write_usize<W: Write>(w: &mut W, num: usize) -> io::Result<()> {
    write_u64(w, num as u64)
}

/// Append a varint to an in-memory section.
#[inline]
pub fn push_u64(out: &mut Vec<u8>, num: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    out.extend_from_slice(&buf[MAX_VARINT_LEN - len..]);
}

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Decode a varint from the front of `data`. Returns `(value, consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(VarIntError::TooLong);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        Err(VarIntError::TooLong)
    } else {
        Err(VarIntError::Underflow)
    }
}

pub fn read_usize(data: &[u8]) -> Result<(usize, usize), VarIntError> {
    let (val, len) = read_u64(data)?;
    let val = usize::try_from(val).map_err(|_| VarIntError::TooLong)?;
    Ok((val, len))
}

// ---------------------------------------------------------------------------
// Decoding from `Read`
// ---------------------------------------------------------------------------

/// Read a varint from a stream. End of input inside the integer is
/// reported as [`VarIntError::Underflow`].
pub fn stream_read_u64<R: Read>(r: &mut R) -> Result<u64, VarIntError> {
    let mut val: u64 = 0;
    let mut buf = [0u8; 1];
    for _ in 0..MAX_VARINT_LEN {
        match r.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(VarIntError::Underflow);
            }
            Err(e) => return Err(VarIntError::Io(e)),
        }
        let byte = buf[0];
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(val);
        }
    }
    Err(VarIntError::TooLong)
}

pub fn stream_read_usize<R: Read>(r: &mut R) -> Result<usize, VarIntError> {
    let val = stream_read_u64(r)?;
    usize::try_from(val).map_err(|_| VarIntError::TooLong)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Encoded byte-length of `num`.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}

#[inline]
pub fn sizeof_usize(num: usize) -> usize {
    sizeof_u64(num as u64)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VarIntError {
    /// Input ended in the middle of an integer.
    #[error("varint underflow (truncated input)")]
    Underflow,
    /// A sixth continuation byte was seen.
    #[error("varint longer than {MAX_VARINT_LEN} bytes")]
    TooLong,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PartialEq for VarIntError {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (VarIntError::Underflow, VarIntError::Underflow)
                | (VarIntError::TooLong, VarIntError::TooLong)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
