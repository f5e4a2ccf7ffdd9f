//! Reaction scoring engine.
//!
//! One decision, in order:
//! 1. special rule (fixed text, no randomness)
//! 2. optional per-song reseed of the random source (scoped)
//! 3. unknown policy draw when there is nothing to score on
//! 4. score from bias lists, context weights and artist preferences
//! 5. tier mapping (sign test, or five-tier thresholds)
//! 6. explore override
//! 7. artist-preference flip
//! 8. template pick + placeholder rendering
//! 9. cooldown redraw for an immediate repeat

pub mod config;
pub mod cooldown;
pub mod rng;
pub mod special;

pub use config::{ArtistPreference, BiasLists, BucketWeights, Explore, Mode, ReactionConfig, TierThresholds, UnknownPolicy, Weights};
pub use cooldown::Cooldown;
pub use rng::{stable_hash, RandomSource, ReseedGuard};
pub use special::SpecialRule;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, path::Path};
use tracing::debug;

use crate::{
    context::{ContextManager, ContextProfile},
    decision::{Bucket, ReactionDecision},
    normalize::{norm_tag_for_scoring, normalize},
    telemetry,
};

static RE_MULTI_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("whitespace regex"));

/// Everything a decision looks at besides config and context.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub genres_text: &'a str,
    /// Tags in any form; they are brought to scoring form here.
    pub tags: &'a [String],
    /// `normalize(title)|normalize(artist)`; empty disables per-song seeding.
    pub unique_key: &'a str,
}

/// Which branch produced the bucket (metrics label / debug log).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPath {
    Special,
    Mode,
    Unknown,
    Scored,
    Explore,
}

impl DecisionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionPath::Special => "special",
            DecisionPath::Mode => "mode",
            DecisionPath::Unknown => "unknown",
            DecisionPath::Scored => "scored",
            DecisionPath::Explore => "explore",
        }
    }
}

#[derive(Debug)]
pub struct ReactionEngine {
    cfg: ReactionConfig,
    context: ContextManager,
    cooldown: Cooldown,
}

impl ReactionEngine {
    /// Context paths in `cfg` resolve against `base_dir`.
    pub fn new(cfg: ReactionConfig, base_dir: &Path) -> Self {
        let context = ContextManager::new(&cfg.context, base_dir);
        let cooldown = Cooldown::new(cfg.cooldown_s);
        Self { cfg, context, cooldown }
    }

    pub fn load(path: &Path, base_dir: &Path) -> Self {
        Self::new(ReactionConfig::load(path), base_dir)
    }

    pub fn config(&self) -> &ReactionConfig {
        &self.cfg
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn decide(&mut self, input: &DecisionInput<'_>, rng: &mut RandomSource) -> ReactionDecision {
        self.decide_at(input, rng, Utc::now())
    }

    pub fn decide_at(&mut self, input: &DecisionInput<'_>, rng: &mut RandomSource, now: DateTime<Utc>) -> ReactionDecision {
        if !self.cfg.enabled {
            return ReactionDecision::silent();
        }

        let title_norm = normalize(input.title);
        let artist_norm = normalize(input.artist);

        let special = special::find_special(&self.cfg.special, &title_norm, &artist_norm);
        let forced = special.and_then(SpecialRule::forced_bucket);
        if let Some(rule) = special.filter(|r| !r.react.is_empty()) {
            let bucket = forced.unwrap_or(Bucket::Neutral);
            let text = self.render(&rule.react, input);
            telemetry::decision(bucket, DecisionPath::Special.as_str());
            return ReactionDecision::new(text, bucket);
        }

        let seed = self
            .cfg
            .seed
            .filter(|_| !input.unique_key.is_empty())
            .map(|s| (s as u64) ^ stable_hash(input.unique_key));
        let mut rng = rng.scoped(seed);

        let (bucket, path) = match forced {
            Some(b) => (b, DecisionPath::Special),
            None => self.rate_bucket(input.tags, &artist_norm, &mut rng),
        };

        let template = self.pick_template(bucket, &mut rng);
        let mut text = self.render(&template, input);
        if self.cooldown.is_repeat(&text, now) {
            let alt = self.render(&self.pick_template(bucket, &mut rng), input);
            if alt != text {
                text = alt;
            }
        }
        self.cooldown.record(&text, now);

        telemetry::decision(bucket, path.as_str());
        ReactionDecision::new(text, bucket)
    }

    fn rate_bucket(&self, tags: &[String], artist_norm: &str, rng: &mut RandomSource) -> (Bucket, DecisionPath) {
        if let Some(b) = self.cfg.mode.forced_bucket() {
            return (b, DecisionPath::Mode);
        }

        let ctx = self.context.get_active_profile();
        let tset: BTreeSet<String> = tags
            .iter()
            .map(|t| norm_tag_for_scoring(t))
            .filter(|t| !t.is_empty())
            .collect();
        let pref = self.cfg.preference_for(artist_norm);
        let artist_bias =
            self.cfg.bias.artist_matches(artist_norm) || pref.is_some_and(|p| p.score_bias != 0.0);

        if self.cfg.unknown_policy.enabled && tset.is_empty() && !artist_bias {
            let mut bucket = weighted_draw(&self.cfg.unknown_policy.weights(), rng);
            if bucket == Bucket::Neutral {
                let bias = ctx.bucket_bias(Bucket::Neutral);
                if bias > 0.0 {
                    bucket = Bucket::Like;
                } else if bias < 0.0 {
                    bucket = Bucket::Dislike;
                }
            }
            if let Some(p) = pref {
                bucket = apply_flip(bucket, p, rng);
            }
            if self.cfg.debug {
                debug!(target: "react", ctx = %ctx.name, bucket = %bucket, "unknown policy");
            }
            return (bucket, DecisionPath::Unknown);
        }

        let score = self.score(&tset, artist_norm, &ctx, pref);
        let base = match &self.cfg.thresholds {
            Some(t) => t.bucket_for(score),
            None if score > 0.0 => Bucket::Like,
            None if score < 0.0 => Bucket::Dislike,
            None => Bucket::Neutral,
        };

        let mut bucket = base;
        let mut path = DecisionPath::Scored;
        let explore = &self.cfg.explore;
        if explore.enabled && rng.unit() < explore.chance {
            bucket = weighted_draw(&explore.weights, rng);
            path = DecisionPath::Explore;
        }
        if let Some(p) = pref {
            bucket = apply_flip(bucket, p, rng);
        }

        if self.cfg.debug {
            debug!(target: "react", ctx = %ctx.name, score, base = %base, bucket = %bucket, path = path.as_str(), "scored");
        }
        (bucket, path)
    }

    fn score(&self, tset: &BTreeSet<String>, artist_norm: &str, ctx: &ContextProfile, pref: Option<&ArtistPreference>) -> f64 {
        let w = &self.cfg.weights;
        let bias = &self.cfg.bias;
        let in_artist = |a: &str| artist_norm.contains(a);
        let mut score = 0.0;

        score += bias.like_tags.iter().filter(|t| tset.contains(*t)).count() as f64 * w.tag_like;
        score -= bias.dislike_tags.iter().filter(|t| tset.contains(*t)).count() as f64 * w.tag_dislike;
        score += bias.like_artists.iter().filter(|a| in_artist(a.as_str())).count() as f64 * w.artist_like;
        score -= bias.dislike_artists.iter().filter(|a| in_artist(a.as_str())).count() as f64 * w.artist_dislike;

        score += tset.iter().filter_map(|t| ctx.tag_weights.get(t)).sum::<f64>();
        score += ctx
            .artist_weights
            .iter()
            .filter(|(name, _)| in_artist(name.as_str()))
            .map(|(_, w)| *w)
            .sum::<f64>();

        if let Some(p) = pref {
            score += p.score_bias;
        }

        let sign_bucket = if score > 0.0 {
            Bucket::Like
        } else if score < 0.0 {
            Bucket::Dislike
        } else {
            Bucket::Neutral
        };
        score + ctx.bucket_bias(sign_bucket)
    }

    /// `sets[bucket]`, then the folded core pool (love → like), then
    /// `fallback[bucket]`, then the built-in text.
    fn pick_template(&self, bucket: Bucket, rng: &mut RandomSource) -> String {
        let pools = [bucket, bucket.memory_slot()];
        for b in pools {
            if let Some(t) = self.cfg.sets.get(b.as_str()).and_then(|pool| rng.choose(pool)) {
                return t.clone();
            }
        }
        self.cfg
            .fallback
            .get(bucket.as_str())
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| ReactionConfig::default_text(bucket).to_string())
    }

    fn render(&self, template: &str, input: &DecisionInput<'_>) -> String {
        let genres = if self.cfg.include_genres { input.genres_text } else { "" };
        let out = template
            .replace("{title}", input.title)
            .replace("{artist}", input.artist)
            .replace("{genres}", genres);
        RE_MULTI_WS.replace_all(&out, " ").trim().to_string()
    }
}

/// Draw over like/neutral/dislike. Negative weights count as zero; an
/// all-zero table ends on `dislike`.
pub fn weighted_draw(weights: &BucketWeights, rng: &mut RandomSource) -> Bucket {
    let vals = Bucket::CORE.map(|b| weights.get(b).max(0.0));
    let sum: f64 = vals.iter().sum();
    let sum = if sum > 0.0 { sum } else { 1.0 };

    let r = rng.unit();
    let mut cum = 0.0;
    for (bucket, v) in Bucket::CORE.iter().zip(vals) {
        cum += v / sum;
        if r <= cum {
            return *bucket;
        }
    }
    Bucket::Dislike
}

/// Remaining mass after the flip targets means "stay"; targets summing past 1
/// are scaled down.
pub fn apply_flip(current: Bucket, pref: &ArtistPreference, rng: &mut RandomSource) -> Bucket {
    if pref.flip.is_empty() {
        return current;
    }
    let to: f64 = pref.flip.iter().map(|(_, p)| p).sum();
    let stay = (1.0 - to).max(0.0);
    let total = to + stay;
    let total = if total > 0.0 { total } else { 1.0 };

    let r = rng.unit();
    let mut acc = 0.0;
    for (target, p) in &pref.flip {
        acc += p / total;
        if r <= acc {
            return *target;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(json: &str) -> ReactionEngine {
        ReactionEngine::new(ReactionConfig::from_json_str(json), Path::new("."))
    }

    fn input<'a>(title: &'a str, artist: &'a str, tags: &'a [String]) -> DecisionInput<'a> {
        DecisionInput {
            title,
            artist,
            genres_text: "Pop",
            tags,
            unique_key: "",
        }
    }

    #[test]
    fn disabled_engine_is_silent() {
        let mut e = engine(r#"{"enabled": false}"#);
        let d = e.decide(&input("T", "A", &[]), &mut RandomSource::seeded(1));
        assert_eq!(d, ReactionDecision::silent());
    }

    #[test]
    fn special_rule_text_uses_no_randomness() {
        let mut e = engine(r#"{"special": [{"title_contains": ["never gonna give"], "react": "🎵 Classic! {artist}", "force_bucket": "like"}]}"#);
        let mut rng = RandomSource::seeded(1);
        for artist in ["Rick Astley", "Someone Else"] {
            let d = e.decide(&input("Never Gonna Give You Up", artist, &[]), &mut rng);
            assert_eq!(d.bucket, Bucket::Like);
            assert_eq!(d.text, format!("🎵 Classic! {artist}"));
        }
        assert_eq!(rng.draws(), 0);
    }

    #[test]
    fn special_force_bucket_without_text_still_scores_template() {
        let mut e = engine(r#"{"special": [{"artist_contains": ["villain"], "force_bucket": "dislike"}], "sets": {"dislike": ["Boo."]}}"#);
        let tags = vec!["pop".to_string()];
        let d = e.decide(&input("Any", "The Villain", &tags), &mut RandomSource::seeded(1));
        assert_eq!(d, ReactionDecision::dislike("Boo."));
    }

    #[test]
    fn tags_and_artists_score_by_sign() {
        let mut e = engine(r#"{"bias": {"like_tags": ["pop"], "dislike_tags": ["Hip-Hop"], "dislike_artists": ["bad band"]},
                               "sets": {"like": ["{title} by {artist}: yes!"], "dislike": ["no"], "neutral": ["meh"]}}"#);
        let mut rng = RandomSource::seeded(1);
        let pop = vec!["Pop".to_string()];
        assert_eq!(e.decide(&input("Shape of You", "Ed Sheeran", &pop), &mut rng).text, "Shape of You by Ed Sheeran: yes!");
        let both = vec!["pop".to_string(), "hip hop".to_string()];
        assert_eq!(e.decide(&input("T", "A", &both), &mut rng).bucket, Bucket::Neutral);
        assert_eq!(e.decide(&input("T", "Bad Band", &pop), &mut rng).bucket, Bucket::Dislike);
    }

    #[test]
    fn unknown_policy_only_without_tags_or_artist_bias() {
        let cfg = r#"{"unknown_policy": {"enabled": true, "like": 1.0, "neutral": 0, "dislike": 0},
                      "bias": {"dislike_artists": ["villain"]},
                      "artist_preferences": {"hero": {"score_bias": -1}, "flipper": {"flip": {"dislike": 1.0}}}}"#;
        let mut e = engine(cfg);
        let mut rng = RandomSource::seeded(1);
        // uncovered: nothing to score → unknown draw
        assert_eq!(e.decide(&input("T", "Nobody", &[]), &mut rng).bucket, Bucket::Like);
        // covered: artist bias list → scored path
        assert_eq!(e.decide(&input("T", "The Villain", &[]), &mut rng).bucket, Bucket::Dislike);
        // covered: non-zero preference score_bias → scored path
        assert_eq!(e.decide(&input("T", "Hero", &[]), &mut rng).bucket, Bucket::Dislike);
        // flip-only preference keeps the unknown path but flips afterwards
        assert_eq!(e.decide(&input("T", "Flipper", &[]), &mut rng).bucket, Bucket::Dislike);
    }

    #[test]
    fn seeded_decisions_repeat_and_leave_outer_stream_alone() {
        let cfg = r#"{"seed": 42, "sets": {"like": ["a", "b", "c"], "neutral": ["d", "e"], "dislike": ["f", "g"]}}"#;
        let mut e = engine(cfg);
        let inp = DecisionInput {
            unique_key: "echo|someone",
            ..input("Echo", "Someone", &[])
        };
        let first = e.decide(&inp, &mut RandomSource::seeded(1));
        for outer in 2..10 {
            let mut fresh = engine(cfg);
            assert_eq!(fresh.decide(&inp, &mut RandomSource::seeded(outer)), first);
        }

        let mut rng = RandomSource::seeded(5);
        e.decide(&inp, &mut rng);
        let mut untouched = RandomSource::seeded(5);
        assert_eq!(rng.unit(), untouched.unit());
    }

    #[test]
    fn modes_short_circuit_scoring() {
        let tags = vec!["pop".to_string()];
        let mut e = engine(r#"{"mode": "always_dislike", "bias": {"like_tags": ["pop"]}}"#);
        let d = e.decide(&input("T", "A", &tags), &mut RandomSource::seeded(1));
        assert_eq!(d, ReactionDecision::dislike("Nope."));
    }

    #[test]
    fn explore_overrides_with_its_own_weights() {
        let mut e = engine(
            r#"{"bias": {"like_tags": ["pop"]}, "explore": {"enabled": true, "chance": 1.0, "weights": {"like": 0, "neutral": 0, "dislike": 1.0}}}"#,
        );
        let tags = vec!["pop".to_string()];
        assert_eq!(e.decide(&input("T", "A", &tags), &mut RandomSource::seeded(1)).bucket, Bucket::Dislike);

        // Missing keys keep their own defaults, so a lone `like` does not pin the draw.
        let mut partial = engine(r#"{"explore": {"enabled": true, "chance": 1.0, "weights": {"like": 0}}}"#);
        let mut rng = RandomSource::seeded(5);
        let seen: std::collections::BTreeSet<Bucket> =
            (0..200).map(|_| partial.decide(&input("T", "A", &tags), &mut rng).bucket).collect();
        assert!(!seen.contains(&Bucket::Like));
        assert!(seen.contains(&Bucket::Neutral) && seen.contains(&Bucket::Dislike));
    }

    #[test]
    fn oversized_cooldown_is_clamped_not_fatal() {
        let mut e = engine(r#"{"cooldown_s": 10000000000000000, "bias": {"like_tags": ["pop"]}}"#);
        let tags = vec!["pop".to_string()];
        let d = e.decide(&input("T", "A", &tags), &mut RandomSource::seeded(1));
        assert_eq!(d.bucket, Bucket::Like);
    }

    #[test]
    fn five_tier_thresholds_and_folded_pools() {
        let mut e = engine(r#"{"thresholds": {"love": 2, "like": 1, "dislike": -1, "hate": -2},
                               "bias": {"like_tags": ["pop", "dance"], "dislike_tags": ["noise"]},
                               "sets": {"like": ["yay"]}}"#);
        let mut rng = RandomSource::seeded(1);
        let two = vec!["pop".to_string(), "dance".to_string()];
        assert_eq!(e.decide(&input("T", "A", &two), &mut rng), ReactionDecision::new("yay", Bucket::Love));
        let one = vec!["pop".to_string()];
        assert_eq!(e.decide(&input("T", "A", &one), &mut rng).bucket, Bucket::Like);
        let noise = vec!["noise".to_string()];
        assert_eq!(e.decide(&input("T", "A", &noise), &mut rng).bucket, Bucket::Dislike);
    }

    #[test]
    fn cooldown_redraws_once_on_immediate_repeat() {
        let cfg = |cd: i64| format!(r#"{{"cooldown_s": {cd}, "bias": {{"like_tags": ["pop"]}}, "sets": {{"like": ["A"]}}}}"#);
        let tags = vec!["pop".to_string()];
        let now = Utc::now();

        let mut with_cd = engine(&cfg(60));
        let mut rng = RandomSource::seeded(1);
        with_cd.decide_at(&input("T", "A", &tags), &mut rng, now);
        let d = with_cd.decide_at(&input("T", "A", &tags), &mut rng, now);
        assert_eq!(d.text, "A"); // single-entry pool: redraw yields the same line
        assert_eq!(rng.draws(), 3);

        let mut no_cd = engine(&cfg(0));
        let mut rng = RandomSource::seeded(1);
        no_cd.decide_at(&input("T", "A", &tags), &mut rng, now);
        no_cd.decide_at(&input("T", "A", &tags), &mut rng, now);
        assert_eq!(rng.draws(), 2);
    }

    #[test]
    fn genres_placeholder_and_whitespace() {
        let mut e = engine(r#"{"include_genres": false, "mode": "always_like", "sets": {"like": ["  {title}   [{genres}]  "]}}"#);
        let d = e.decide(&input("Echo", "A", &[]), &mut RandomSource::seeded(1));
        assert_eq!(d.text, "Echo []");
    }

    #[test]
    fn weighted_draw_and_flip_normalization() {
        let mut rng = RandomSource::seeded(9);
        for _ in 0..50 {
            assert_eq!(weighted_draw(&BucketWeights::new(0.0, 0.0, 0.0), &mut rng), Bucket::Dislike);
            assert_eq!(weighted_draw(&BucketWeights::new(-1.0, 3.0, 0.0), &mut rng), Bucket::Neutral);
        }
        let pref = ArtistPreference {
            score_bias: 0.0,
            flip: vec![(Bucket::Dislike, 1.0), (Bucket::Neutral, 1.0)],
        };
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            seen.insert(apply_flip(Bucket::Like, &pref, &mut rng));
        }
        // sum > 1: "stay" has no mass left
        assert!(!seen.contains(&Bucket::Like));
        assert_eq!(seen.len(), 2);
    }
}
