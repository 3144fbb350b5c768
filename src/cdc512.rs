//! # CDC-512: streaming 512-bit mixing fingerprint
//!
//! Non-cryptographic hash used for whole-file and per-block fingerprints.
//! Cheap constant-time-per-byte streaming over large file ranges, no
//! allocations. It only needs to resist accidental collisions, not
//! adversarial ones.
//!
//! The digest value is defined by the initial word constants, the mixing
//! schedule, and the byte-order normalization below; changing any of them
//! changes every stored digest and invalidates persisted index state. The
//! known-answer vectors in the test suite are the binding reference.
//!
//! ## Byte-order model
//!
//! State words are initialized to the byte-swap of the magic constants and
//! input blocks are absorbed as little-endian words, so the in-memory word
//! values are identical on every platform. Digest output is always emitted
//! in big-endian byte order.

/// Digest length in bytes (eight 64-bit words).
pub const DIGEST_LEN: usize = 64;

/// Number of input bytes absorbed per mixing round.
const CHUNK_LEN: usize = 64;

/// Initial state: magic words stored byte-swapped (big-endian canonical form
/// loaded on a little-endian host).
const INIT: [u64; 8] = [
    0xA640524A5B44F1FCu64.swap_bytes(),
    0xC535059705F0BB7Eu64.swap_bytes(),
    0xC8ED76CF6B6EA626u64.swap_bytes(),
    0x531D1E8E254EA59Eu64.swap_bytes(),
    0x8C0FE7F3E46E2A80u64.swap_bytes(),
    0x1C53F41FD1E3A7F8u64.swap_bytes(),
    0x08D4DEAAA1C33335u64.swap_bytes(),
    0x4C592980FBE9B011u64.swap_bytes(),
];

/// Streaming CDC-512 context.
///
/// ```ignore
/// let mut ctx = Cdc512::new();
/// ctx.update(&bytes);
/// let digest = ctx.finish();
/// println!("{digest}");
/// ```
///
/// Note that `update` zero-pads a trailing partial 64-byte chunk *per call*:
/// incremental updates equal a one-shot update only when every call but the
/// last passes a multiple of 64 bytes. Block-sized feeding is always aligned.
#[derive(Clone, Debug)]
pub struct Cdc512 {
    state: [u64; 8],
    p: u64,
}

impl Default for Cdc512 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cdc512 {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: INIT, p: 0 }
    }

    /// Reset to the initial state, discarding any absorbed input.
    pub fn reset(&mut self) {
        self.state = INIT;
        self.p = 0;
    }

    /// One-shot convenience: digest of a single byte slice.
    #[must_use]
    pub fn digest_of(data: &[u8]) -> Digest {
        let mut ctx = Self::new();
        ctx.update(data);
        ctx.finish()
    }

    /// Absorb `data`. Zero-length input is a no-op.
    pub fn update(&mut self, data: &[u8]) {
        self.p = self.p.wrapping_add(data.len() as u64);

        let mut chunks = data.chunks_exact(CHUNK_LEN);
        for chunk in &mut chunks {
            let v = load_words(chunk);
            self.mix_with(&v);
            self.mix();
        }

        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut pad = [0u8; CHUNK_LEN];
            pad[..tail.len()].copy_from_slice(tail);
            let v = load_words(&pad);
            self.mix_with(&v);
            self.mix();
        }
    }

    /// Absorb the length terminator and emit the digest.
    #[must_use]
    pub fn finish(&mut self) -> Digest {
        if self.p != 0 {
            let pad = [self.p; 8];
            self.mix_with(&pad);
            self.mix();
        }

        let mut out = [0u8; DIGEST_LEN];
        for (bytes, word) in out.chunks_exact_mut(8).zip(self.state.iter()) {
            bytes.copy_from_slice(&word.to_be_bytes());
        }
        Digest(out)
    }

    /// One row of the mixing schedule against another block `v`.
    fn mix_with(&mut self, v: &[u64; 8]) {
        let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = self.state;

        a = a.wrapping_sub(v[4]); f ^= v[7] >> 9;           h = h.wrapping_add(v[0]);
        b = b.wrapping_sub(v[5]); g ^= v[0] << 9;           a = a.wrapping_add(v[1]);
        c = c.wrapping_sub(v[6]); h ^= v[1] >> 23;          b = b.wrapping_add(v[2]);
        d = d.wrapping_sub(v[7]); a ^= v[2] << 15;          c = c.wrapping_add(v[3]);
        e = e.wrapping_sub(v[0]); b ^= v[3] >> 14;          d = d.wrapping_add(v[4]);
        f = f.wrapping_sub(v[1]); c ^= v[4] << 20;          e = e.wrapping_add(v[5]);
        g = g.wrapping_sub(v[2]); d ^= v[5] >> 17;          f = f.wrapping_add(v[6]);
        h = h.wrapping_sub(v[3]); e ^= v[6] << 14;          g = g.wrapping_add(v[7]);

        self.state = [a, b, c, d, e, f, g, h];
    }

    /// Self-diffusion round. Unlike [`mix_with`](Self::mix_with), each step
    /// reads the freshly mutated words (the sequence is aliased on purpose).
    fn mix(&mut self) {
        let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = self.state;

        a = a.wrapping_sub(e); f ^= h >> 9;           h = h.wrapping_add(a);
        b = b.wrapping_sub(f); g ^= a << 9;           a = a.wrapping_add(b);
        c = c.wrapping_sub(g); h ^= b >> 23;          b = b.wrapping_add(c);
        d = d.wrapping_sub(h); a ^= c << 15;          c = c.wrapping_add(d);
        e = e.wrapping_sub(a); b ^= d >> 14;          d = d.wrapping_add(e);
        f = f.wrapping_sub(b); c ^= e << 20;          e = e.wrapping_add(f);
        g = g.wrapping_sub(c); d ^= f >> 17;          f = f.wrapping_add(g);
        h = h.wrapping_sub(d); e ^= g << 14;          g = g.wrapping_add(h);

        self.state = [a, b, c, d, e, f, g, h];
    }
}

fn load_words(chunk: &[u8]) -> [u64; 8] {
    debug_assert_eq!(chunk.len(), CHUNK_LEN);
    let mut v = [0u64; 8];
    for (word, bytes) in v.iter_mut().zip(chunk.chunks_exact(8)) {
        *word = u64::from_le_bytes(bytes.try_into().unwrap());
    }
    v
}

/// A finished 64-byte CDC-512 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; DIGEST_LEN]);

/// Base-50 alphabet for the short textual form. Contains no path separators,
/// so short strings are safe inside file names.
const SHORT_ALPHABET: &[u8; 50] = b"._,=~!@#$%^&-+0123456789abcdefghijklmnopqrstuvwxyz";

impl Digest {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Compact base-50 form: for each 64-bit word from high index to low,
    /// emit base-50 digits least-significant first until the word is
    /// exhausted. Zero words contribute nothing; the all-zero digest yields
    /// the empty string.
    #[must_use]
    pub fn to_short_string(&self) -> String {
        let mut s = String::new();
        for i in (0..8).rev() {
            let bytes: [u8; 8] = self.0[i * 8..(i + 1) * 8].try_into().unwrap();
            let mut word = u64::from_le_bytes(bytes);
            while word != 0 {
                s.push(SHORT_ALPHABET[(word % 50) as usize] as char);
                word /= 50;
            }
        }
        s
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = std::array::TryFromSliceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Digest(bytes.try_into()?))
    }
}

/// Long form: 128 uppercase hex digits with a `-` after every two bytes.
impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, pair) in self.0.chunks_exact(2).enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{:02X}{:02X}", pair[0], pair[1])?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({self})")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
