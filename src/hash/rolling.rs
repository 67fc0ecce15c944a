// Polynomial rolling hash over a fixed-width byte window.
//
//   hash(w) = sum(w[i] * 257^(n-1-i)) mod 2^22
//
// Sliding the window one byte to the right costs one table lookup, one
// multiply and two masks.

/// Hash multiplier.
pub const HASH_MULT: u32 = 257;

/// Hash modulus (power of two). `HASH_BASE * HASH_MULT` fits in a `u32`.
pub const HASH_BASE: u32 = 1 << 22;

#[inline(always)]
fn mod_base(v: u32) -> u32 {
    v & (HASH_BASE - 1)
}

/// Rolling hash for windows of `window_size` bytes.
#[derive(Clone)]
pub struct RollingHash {
    window_size: usize,
    /// `remove_table[b]` cancels `b`'s contribution as the oldest byte:
    /// `hash(w[0..n]) + remove_table[w[0]]` is the partial hash of `w[1..n]`.
    remove_table: [u32; 256],
}

impl RollingHash {
    /// `window_size` must be at least 2.
    pub fn new(window_size: usize) -> Self {
        debug_assert!(window_size >= 2, "rolling hash window must be >= 2 bytes");

        // 257^(n-1) mod 2^22
        let mut multiplier = 1u32;
        for _ in 1..window_size {
            multiplier = mod_base(multiplier.wrapping_mul(HASH_MULT));
        }

        let mut remove_table = [0u32; 256];
        let mut byte_times_multiplier = 0u32;
        for entry in remove_table.iter_mut() {
            *entry = mod_base(HASH_BASE.wrapping_sub(byte_times_multiplier));
            byte_times_multiplier = mod_base(byte_times_multiplier + multiplier);
        }

        Self {
            window_size,
            remove_table,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    #[inline(always)]
    pub fn hash_step(partial: u32, next: u8) -> u32 {
        mod_base(partial * HASH_MULT + u32::from(next))
    }

    /// Hash of `data[..window_size]`.
    #[inline]
    pub fn hash(&self, data: &[u8]) -> u32 {
        debug_assert!(data.len() >= self.window_size);
        data[..self.window_size]
            .iter()
            .fold(0, |h, &b| Self::hash_step(h, b))
    }

    /// Hash of the window shifted one byte right, given the old hash, the
    /// byte leaving on the left and the byte entering on the right.
    #[inline(always)]
    pub fn update(&self, old_hash: u32, old_first: u8, new_last: u8) -> u32 {
        let partial = mod_base(old_hash + self.remove_table[old_first as usize]);
        Self::hash_step(partial, new_last)
    }
}
