//! Memory-derived tails appended to a reaction ("heard this before",
//! "this hits harder during battle", "fits right here").

use serde::Deserialize;
use std::collections::BTreeMap;

use super::MemoryStore;
use crate::{decision::Bucket, react::rng::RandomSource};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemoryTuning {
    pub min_seen_for_repeat: u64,
    pub min_seen_for_cross_context: u64,
    pub confidence_margin: f64,
    pub suppress_cross_if_dislike: bool,
    pub suppress_cross_if_tie: bool,
    pub show_fits_here_even_if_small: bool,
    pub max_tail_segments: usize,
}

impl Default for MemoryTuning {
    fn default() -> Self {
        Self {
            min_seen_for_repeat: 2,
            min_seen_for_cross_context: 2,
            confidence_margin: 0.75,
            suppress_cross_if_dislike: true,
            suppress_cross_if_tie: true,
            show_fits_here_even_if_small: true,
            max_tail_segments: 2,
        }
    }
}

/// Template pools per bucket name. `better_other` may use `{best}`,
/// `fits_here` may use `{here}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Variants {
    pub repeat: BTreeMap<String, Vec<String>>,
    pub better_other: BTreeMap<String, Vec<String>>,
    pub fits_here: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommentarySettings {
    #[serde(default)]
    pub tuning: MemoryTuning,
    #[serde(default)]
    pub variants: Variants,
}

#[derive(Debug, Clone, Default)]
pub struct Commentary {
    tuning: MemoryTuning,
    variants: Variants,
}

impl Commentary {
    pub fn new(settings: &CommentarySettings) -> Self {
        Self {
            tuning: settings.tuning.clone(),
            variants: settings.variants.clone(),
        }
    }

    /// Tails for a song that was just recorded under `current_ctx` with `bucket`.
    pub fn tails(
        &self,
        memory: &MemoryStore,
        key: &str,
        current_ctx: &str,
        bucket: Bucket,
        rng: &mut RandomSource,
    ) -> Vec<String> {
        let t = &self.tuning;
        let seen = memory.seen_count(key);
        let mut out = Vec::new();

        if seen >= t.min_seen_for_repeat {
            if let Some(s) = pick(&self.variants.repeat, bucket, rng) {
                out.push(s.to_string());
            }
        }

        if seen >= t.min_seen_for_cross_context {
            if let Some(best) = memory.best_context(key) {
                let confident = best.score > t.confidence_margin || !t.suppress_cross_if_tie;
                if best.context != current_ctx {
                    let suppressed = t.suppress_cross_if_dislike && bucket.memory_slot() == Bucket::Dislike;
                    if !suppressed && confident {
                        if let Some(s) = pick(&self.variants.better_other, bucket, rng) {
                            out.push(s.replace("{best}", &best.context));
                        }
                    }
                } else if t.show_fits_here_even_if_small || confident {
                    if let Some(s) = pick(&self.variants.fits_here, bucket, rng) {
                        out.push(s.replace("{here}", current_ctx));
                    }
                }
            }
        }

        out.truncate(t.max_tail_segments);
        out
    }
}

/// Pools are looked up by the decision bucket, then by its folded core bucket.
fn pick<'a>(
    pools: &'a BTreeMap<String, Vec<String>>,
    bucket: Bucket,
    rng: &mut RandomSource,
) -> Option<&'a String> {
    let pool = pools
        .get(bucket.as_str())
        .filter(|p| !p.is_empty())
        .or_else(|| pools.get(bucket.memory_slot().as_str()))?;
    rng.choose(pool).filter(|s| !s.trim().is_empty())
}
