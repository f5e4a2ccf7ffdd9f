//! Explicit random source for reaction decisions.
//!
//! Decisions never touch a global RNG. Callers own a [`RandomSource`] and pass
//! it in; per-song determinism is a scoped reseed ([`RandomSource::scoped`])
//! whose guard puts the previous generator back when dropped, on every exit
//! path.

use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
    draws: u64,
}

impl RandomSource {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            draws: 0,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            draws: 0,
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.draws += 1;
        self.rng.random::<f64>()
    }

    /// Uniform pick; `None` for an empty slice (no draw consumed).
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        self.draws += 1;
        items.get(self.rng.random_range(0..items.len()))
    }

    /// Number of draws made so far (reseeding does not reset it).
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Reseed for the lifetime of the returned guard when `seed` is `Some`;
    /// with `None` the guard is a pass-through.
    pub fn scoped(&mut self, seed: Option<u64>) -> ReseedGuard<'_> {
        let saved = seed.map(|s| std::mem::replace(&mut self.rng, StdRng::seed_from_u64(s)));
        ReseedGuard { source: self, saved }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

pub struct ReseedGuard<'a> {
    source: &'a mut RandomSource,
    saved: Option<StdRng>,
}

impl Deref for ReseedGuard<'_> {
    type Target = RandomSource;
    fn deref(&self) -> &RandomSource {
        self.source
    }
}

impl DerefMut for ReseedGuard<'_> {
    fn deref_mut(&mut self) -> &mut RandomSource {
        self.source
    }
}

impl Drop for ReseedGuard<'_> {
    fn drop(&mut self) {
        if let Some(rng) = self.saved.take() {
            self.source.rng = rng;
        }
    }
}

/// First 8 bytes (big-endian) of SHA-256; stable across runs and platforms.
pub fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(first)
}
