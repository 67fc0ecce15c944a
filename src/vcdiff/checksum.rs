// Adler-32 over a reconstructed target window (the VCD_ADLER32 extension).

/// Adler-32 of `data`, SIMD-accelerated when the `adler32` feature is on.
pub fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        // Largest n with 255n(n+1)/2 + (n+1)(MOD_ADLER-1) < 2^32.
        const NMAX: usize = 5552;
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for chunk in data.chunks(NMAX) {
            for &byte in chunk {
                a += u32::from(byte);
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b << 16) | a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"a"), 0x0062_0062);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn long_input_does_not_overflow() {
        let data = vec![0xFFu8; 100_000];
        let a = adler32(&data);
        // Recompute naively with modulo on every byte.
        let (mut x, mut y) = (1u32, 0u32);
        for &b in &data {
            x = (x + u32::from(b)) % 65521;
            y = (y + x) % 65521;
        }
        assert_eq!(a, (y << 16) | x);
    }
}
