#![forbid(unsafe_code)]

//! Seeded randomness for reproducible insert runs.
//!
//! Draw `n` (1-based) of a stream depends only on `(seed, n)`, so any single
//! lane of a run can be regenerated with [`DeterministicRng::from_state`].

use thiserror::Error;

const WEYL_INCREMENT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Run seed used when neither the caller nor the environment supplies one.
pub const DEFAULT_RUN_SEED: u64 = 0x5EED_1E57_CA5E_0001;

pub const RANDOM_REASON_CODES: [&str; 1] = ["random_seed_unparseable"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RandomError {
    #[error("seed `{0}` is neither decimal nor 0x-prefixed hex")]
    SeedUnparseable(String),
}

impl RandomError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::SeedUnparseable(_) => "random_seed_unparseable",
        }
    }
}

/// Source of raw 64-bit draws.
///
/// Everything that consumes randomness takes `&mut impl SeededSource`, so the
/// generator state is always explicit and a stub can stand in for it.
pub trait SeededSource {
    fn next_u64(&mut self) -> u64;

    /// Uniform in `[0, 1)` from the top 53 bits of one draw.
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

/// Splitmix64 finalizer applied to a Weyl sequence keyed by the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    seed: u64,
    position: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self::from_state(seed, 0)
    }

    /// Generator whose next draw is draw `position + 1` of `seed`'s stream.
    #[must_use]
    pub const fn from_state(seed: u64, position: u64) -> Self {
        Self { seed, position }
    }

    #[must_use]
    pub const fn state(self) -> (u64, u64) {
        (self.seed, self.position)
    }

    #[must_use]
    pub const fn draws(self) -> u64 {
        self.position
    }

    /// Skips `steps` draws without computing them.
    pub fn jump_ahead(&mut self, steps: u64) {
        self.position = self.position.wrapping_add(steps);
    }

    #[must_use]
    pub fn fill_u64(&mut self, len: usize) -> Vec<u64> {
        std::iter::repeat_with(|| self.next_u64()).take(len).collect()
    }
}

impl SeededSource for DeterministicRng {
    fn next_u64(&mut self) -> u64 {
        self.position = self.position.wrapping_add(1);
        let key = self.position.wrapping_mul(WEYL_INCREMENT);
        mix(self.seed.wrapping_add(key))
    }
}

impl<S: SeededSource + ?Sized> SeededSource for &mut S {
    fn next_u64(&mut self) -> u64 {
        (**self).next_u64()
    }
}

/// Parses a seed written either in decimal or as `0x`-prefixed hex.
/// Underscores are allowed as digit separators.
pub fn parse_seed(raw: &str) -> Result<u64, RandomError> {
    let digits: String = raw.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse::<u64>(),
    };
    parsed.map_err(|_| RandomError::SeedUnparseable(raw.to_string()))
}

#[must_use]
pub fn resolve_run_seed(explicit: Option<u64>) -> u64 {
    explicit.unwrap_or(DEFAULT_RUN_SEED)
}

const fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
