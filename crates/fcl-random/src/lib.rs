#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

pub const DEFAULT_RNG_SEED: u64 = 0xC0DE_CAFE;
pub const DEFAULT_RANGE_EXPONENT: i32 = 29;

pub const RANDOM_REASON_CODES: [&str; 2] = [
    "random_float_range_contract",
    "random_range_exponent_contract",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandomError {
    InvalidRange { low: f32, high: f32 },
    InvalidExponent(i32),
}

impl RandomError {
    #[must_use]
    pub const fn reason_code(self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "random_float_range_contract",
            Self::InvalidExponent(_) => "random_range_exponent_contract",
        }
    }
}

impl std::fmt::Display for RandomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRange { low, high } => {
                write!(f, "float range must be finite with low < high (low={low} high={high})")
            }
            Self::InvalidExponent(exp) => {
                write!(f, "range exponent {exp} outside representable f32 powers of two")
            }
        }
    }
}

impl std::error::Error for RandomError {}

// ── MT19937 Mersenne Twister ─────────────────────────────────────────────

const MT_N: usize = 624;
const MT_M: usize = 397;
const MT_MATRIX_A: u32 = 0x9908_b0df;
const MT_UPPER_MASK: u32 = 0x8000_0000;
const MT_LOWER_MASK: u32 = 0x7fff_ffff;
const MT_INIT_MULT: u32 = 1_812_433_253;

/// MT19937 with classic `init_genrand` seeding.
///
/// This is the generator conformance suites use for their input streams, so
/// a given seed reproduces the same inputs as any other MT19937 harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mt19937Rng {
    mt: Vec<u32>,
    pos: usize,
}

impl Mt19937Rng {
    /// After seeding, `pos = N` meaning a twist is required before first output.
    #[must_use]
    pub fn from_u32_seed(seed: u32) -> Self {
        let mut mt = vec![0u32; MT_N];
        mt[0] = seed;
        for i in 1..MT_N {
            mt[i] = MT_INIT_MULT
                .wrapping_mul(mt[i - 1] ^ (mt[i - 1] >> 30))
                .wrapping_add(i as u32);
        }
        Self { mt, pos: MT_N }
    }

    /// Seeds from the low 32 bits, matching `init_genrand((cl_uint)seed)`.
    #[must_use]
    pub fn from_u64_seed_classic(seed: u64) -> Self {
        Self::from_u32_seed(seed as u32)
    }

    fn twist(&mut self) {
        for kk in 0..(MT_N - MT_M) {
            let y = (self.mt[kk] & MT_UPPER_MASK) | (self.mt[kk + 1] & MT_LOWER_MASK);
            self.mt[kk] = self.mt[kk + MT_M] ^ (y >> 1) ^ if y & 1 != 0 { MT_MATRIX_A } else { 0 };
        }
        for kk in (MT_N - MT_M)..(MT_N - 1) {
            let y = (self.mt[kk] & MT_UPPER_MASK) | (self.mt[kk + 1] & MT_LOWER_MASK);
            self.mt[kk] =
                self.mt[kk + MT_M - MT_N] ^ (y >> 1) ^ if y & 1 != 0 { MT_MATRIX_A } else { 0 };
        }
        let y = (self.mt[MT_N - 1] & MT_UPPER_MASK) | (self.mt[0] & MT_LOWER_MASK);
        self.mt[MT_N - 1] =
            self.mt[MT_M - 1] ^ (y >> 1) ^ if y & 1 != 0 { MT_MATRIX_A } else { 0 };
    }

    #[must_use]
    fn temper(mut y: u32) -> u32 {
        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C_5680;
        y ^= (y << 15) & 0xEFC6_0000;
        y ^= y >> 18;
        y
    }

    #[must_use]
    pub fn next_u32(&mut self) -> u32 {
        if self.pos >= MT_N {
            self.twist();
            self.pos = 0;
        }
        let y = self.mt[self.pos];
        self.pos += 1;
        Self::temper(y)
    }

    /// Single-precision draw between `low` and `high`.
    ///
    /// The interpolation weight is `u32 / 0xFFFF_FFFF` computed in double
    /// precision and narrowed, so `high` itself is reachable on a saturated
    /// draw. The blend is evaluated in `f32` to keep results identical to
    /// other harnesses using the same formula.
    #[must_use]
    pub fn random_float(&mut self, low: f32, high: f32) -> f32 {
        let t = (f64::from(self.next_u32()) / f64::from(u32::MAX)) as f32;
        (1.0 - t) * low + t * high
    }
}

/// Validated closed-open sampling interval for generated inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatRange {
    low: f32,
    high: f32,
}

impl FloatRange {
    pub fn new(low: f32, high: f32) -> Result<Self, RandomError> {
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(RandomError::InvalidRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// `[-2^exp, 2^exp)`.
    pub fn symmetric_pow2(exp: i32) -> Result<Self, RandomError> {
        if !(0..=126).contains(&exp) {
            return Err(RandomError::InvalidExponent(exp));
        }
        let bound = 2.0_f32.powi(exp);
        Self::new(-bound, bound)
    }

    #[must_use]
    pub const fn low(self) -> f32 {
        self.low
    }

    #[must_use]
    pub const fn high(self) -> f32 {
        self.high
    }
}

impl Default for FloatRange {
    fn default() -> Self {
        let bound = (1u32 << DEFAULT_RANGE_EXPONENT) as f32;
        Self {
            low: -bound,
            high: bound,
        }
    }
}

/// The two operand arrays shared by every variant of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPair {
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

impl InputPair {
    #[must_use]
    pub fn len(&self) -> usize {
        self.a.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Digest of the little-endian bit patterns of `a` followed by `b`.
    #[must_use]
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        for value in self.a.iter().chain(&self.b) {
            hasher.update(value.to_bits().to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }
}

/// Seeded producer of one [`InputPair`].
///
/// Generation consumes the generator, so the stream cannot leak into a
/// second run or be shared between harnesses.
#[derive(Debug, Clone)]
pub struct TestVectorGenerator {
    range: FloatRange,
    rng: Mt19937Rng,
}

impl TestVectorGenerator {
    #[must_use]
    pub fn new(seed: u64, range: FloatRange) -> Self {
        Self {
            range,
            rng: Mt19937Rng::from_u64_seed_classic(seed),
        }
    }

    /// Fills `a` completely, then `b`, from one stream. The two arrays come
    /// from disjoint consecutive segments of the sequence.
    #[must_use]
    pub fn generate(mut self, len: usize) -> InputPair {
        let (low, high) = (self.range.low, self.range.high);
        let a = (0..len).map(|_| self.rng.random_float(low, high)).collect();
        let b = (0..len).map(|_| self.rng.random_float(low, high)).collect();
        InputPair { a, b }
    }
}
