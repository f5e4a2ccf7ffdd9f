//! Reaction configuration (`reactions.json`).
//!
//! Every section is decoded on its own: a malformed `weights` block falls back
//! to default weights (with a warning) without throwing away `sets` or `bias`.
//! Unknown keys are ignored.
//!
//! ```json
//! {
//!   "mode": "score",
//!   "seed": 1234,
//!   "cooldown_s": 30,
//!   "sets": {"like": ["{title}? Yes please!"], "neutral": ["Okay."], "dislike": ["Skip."]},
//!   "bias": {"like_tags": ["pop"], "dislike_artists": ["somebody"]},
//!   "artist_preferences": {"queen": {"score_bias": 1.5, "flip": {"like": 0.2}}},
//!   "context": {"enabled": true, "path": "Memory/contexts.json", "refresh_s": 5}
//! }
//! ```

use serde::{
    de::{self, DeserializeOwned},
    Deserialize, Deserializer,
};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fs, path::Path};
use tracing::{info, warn};

use super::special::SpecialRule;
use crate::{
    context::ContextSettings,
    decision::Bucket,
    normalize::{norm_tag_for_scoring, normalize},
};

pub const DEFAULT_REACTIONS_PATH: &str = "Memory/reactions.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Score,
    AlwaysLike,
    AlwaysDislike,
    AlwaysNeutral,
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Mode::parse(&raw).ok_or_else(|| de::Error::custom(format!("unknown mode {raw:?}")))
    }
}

impl Mode {
    /// Case-insensitive, surrounding whitespace ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "score" => Some(Mode::Score),
            "always_like" => Some(Mode::AlwaysLike),
            "always_dislike" => Some(Mode::AlwaysDislike),
            "always_neutral" => Some(Mode::AlwaysNeutral),
            _ => None,
        }
    }

    pub fn forced_bucket(self) -> Option<Bucket> {
        match self {
            Mode::Score => None,
            Mode::AlwaysLike => Some(Bucket::Like),
            Mode::AlwaysDislike => Some(Bucket::Dislike),
            Mode::AlwaysNeutral => Some(Bucket::Neutral),
        }
    }
}

/// Score contribution per matching bias-list tag or artist.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub tag_like: f64,
    pub tag_dislike: f64,
    pub artist_like: f64,
    pub artist_dislike: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            tag_like: 1.0,
            tag_dislike: 1.0,
            artist_like: 2.0,
            artist_dislike: 2.0,
        }
    }
}

/// Static like/dislike lists. Tags are kept in scoring form, artists normalized.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BiasLists {
    pub like_tags: Vec<String>,
    pub dislike_tags: Vec<String>,
    pub like_artists: Vec<String>,
    pub dislike_artists: Vec<String>,
}

impl BiasLists {
    fn normalized(self) -> Self {
        let tags = |v: Vec<String>| -> Vec<String> {
            v.iter().map(|s| norm_tag_for_scoring(s)).filter(|s| !s.is_empty()).collect()
        };
        let artists = |v: Vec<String>| -> Vec<String> {
            v.iter().map(|s| normalize(s)).filter(|s| !s.is_empty()).collect()
        };
        Self {
            like_tags: tags(self.like_tags),
            dislike_tags: tags(self.dislike_tags),
            like_artists: artists(self.like_artists),
            dislike_artists: artists(self.dislike_artists),
        }
    }

    pub fn artist_matches(&self, artist_norm: &str) -> bool {
        !artist_norm.is_empty()
            && self
                .like_artists
                .iter()
                .chain(&self.dislike_artists)
                .any(|a| artist_norm.contains(a.as_str()))
    }
}

/// Weights over the three core buckets, used for weighted draws.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BucketWeights {
    #[serde(default)]
    pub like: f64,
    #[serde(default)]
    pub neutral: f64,
    #[serde(default)]
    pub dislike: f64,
}

impl BucketWeights {
    pub const fn new(like: f64, neutral: f64, dislike: f64) -> Self {
        Self { like, neutral, dislike }
    }

    pub fn get(&self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::Like => self.like,
            Bucket::Neutral => self.neutral,
            Bucket::Dislike => self.dislike,
            _ => 0.0,
        }
    }
}

/// Draw used when a song offers nothing to score on.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct UnknownPolicy {
    pub enabled: bool,
    pub like: f64,
    pub neutral: f64,
    pub dislike: f64,
}

impl Default for UnknownPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            like: 0.34,
            neutral: 0.33,
            dislike: 0.33,
        }
    }
}

impl UnknownPolicy {
    pub fn weights(&self) -> BucketWeights {
        BucketWeights::new(self.like, self.neutral, self.dislike)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Explore {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_explore_chance")]
    pub chance: f64,
    #[serde(default = "default_explore_weights", deserialize_with = "de_explore_weights")]
    pub weights: BucketWeights,
}

/// Explore weights default key by key, not as a block.
#[derive(Deserialize)]
#[serde(default)]
struct ExploreWeights {
    like: f64,
    neutral: f64,
    dislike: f64,
}

impl Default for ExploreWeights {
    fn default() -> Self {
        let d = default_explore_weights();
        Self {
            like: d.like,
            neutral: d.neutral,
            dislike: d.dislike,
        }
    }
}

fn de_explore_weights<'de, D: Deserializer<'de>>(d: D) -> Result<BucketWeights, D::Error> {
    let w = ExploreWeights::deserialize(d)?;
    Ok(BucketWeights::new(w.like, w.neutral, w.dislike))
}

impl Default for Explore {
    fn default() -> Self {
        Self {
            enabled: false,
            chance: default_explore_chance(),
            weights: default_explore_weights(),
        }
    }
}

fn default_explore_chance() -> f64 {
    0.15
}
fn default_explore_weights() -> BucketWeights {
    BucketWeights::new(0.4, 0.4, 0.2)
}

/// Score thresholds for the five-tier mapping.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub love: f64,
    pub like: f64,
    pub dislike: f64,
    pub hate: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            love: 9.0,
            like: 3.0,
            dislike: -3.0,
            hate: -9.0,
        }
    }
}

impl TierThresholds {
    pub fn bucket_for(&self, score: f64) -> Bucket {
        if score >= self.love {
            Bucket::Love
        } else if score >= self.like {
            Bucket::Like
        } else if score > self.dislike {
            Bucket::Neutral
        } else if score > self.hate {
            Bucket::Dislike
        } else {
            Bucket::Hate
        }
    }
}

/// Per-artist tweaks, matched when the key is a substring of the normalized artist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtistPreference {
    pub score_bias: f64,
    /// Target bucket → probability, clamped to `[0, 1]`.
    pub flip: Vec<(Bucket, f64)>,
}

impl ArtistPreference {
    fn from_value(key: &str, v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let score_bias = obj
            .get("score_bias")
            .or_else(|| obj.get("like_weight"))
            .and_then(as_f64)
            .unwrap_or(0.0);
        let mut flip = Vec::new();
        if let Some(map) = obj.get("flip").and_then(Value::as_object) {
            for (name, p) in map {
                match (Bucket::parse(name), as_f64(p)) {
                    (Some(b), Some(p)) if Bucket::CORE.contains(&b) => flip.push((b, p.clamp(0.0, 1.0))),
                    _ => warn!(target: "react", artist = key, target_bucket = %name, "ignoring flip entry"),
                }
            }
        }
        Some(Self { score_bias, flip })
    }
}

#[derive(Debug, Clone)]
pub struct ReactionConfig {
    pub enabled: bool,
    pub mode: Mode,
    pub seed: Option<i64>,
    pub cooldown_s: i64,
    pub include_genres: bool,
    pub debug: bool,
    /// Template pools by bucket name (trimmed, empties dropped).
    pub sets: BTreeMap<String, Vec<String>>,
    pub fallback: BTreeMap<String, String>,
    pub weights: Weights,
    pub bias: BiasLists,
    pub unknown_policy: UnknownPolicy,
    pub explore: Explore,
    pub special: Vec<SpecialRule>,
    /// Normalized artist key → preference, in key order.
    pub artist_preferences: BTreeMap<String, ArtistPreference>,
    pub context: ContextSettings,
    pub thresholds: Option<TierThresholds>,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self::from_map(&Map::new())
    }
}

impl ReactionConfig {
    /// Load from disk. Missing or malformed files yield the defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "react", path = %path.display(), error = %e, "reaction config unavailable, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(map)) => {
                let cfg = Self::from_map(&map);
                info!(
                    target: "react",
                    path = %path.display(),
                    mode = ?cfg.mode,
                    special_rules = cfg.special.len(),
                    artist_preferences = cfg.artist_preferences.len(),
                    "reaction config loaded"
                );
                cfg
            }
            Ok(_) => {
                warn!(target: "react", path = %path.display(), "reaction config is not a JSON object, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(target: "react", path = %path.display(), error = %e, "reaction config malformed, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_json_str(s: &str) -> Self {
        match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Self::from_map(&map),
            _ => {
                warn!(target: "react", "reaction config is not a JSON object, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_map(raw: &Map<String, Value>) -> Self {
        let sets: BTreeMap<String, Vec<String>> = field(raw, "sets", BTreeMap::new());
        let sets = sets
            .into_iter()
            .map(|(k, pool)| {
                let pool: Vec<String> = pool.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                (k.trim().to_lowercase(), pool)
            })
            .collect();
        let fallback: BTreeMap<String, String> = field(raw, "fallback", BTreeMap::new());
        let fallback = fallback.into_iter().map(|(k, v)| (k.trim().to_lowercase(), v)).collect();

        let mut explore: Explore = field(raw, "explore", Explore::default());
        explore.chance = explore.chance.clamp(0.0, 1.0);

        let prefs: Map<String, Value> = field(raw, "artist_preferences", Map::new());
        let artist_preferences = prefs
            .iter()
            .filter_map(|(k, v)| {
                let key = normalize(k);
                if key.is_empty() {
                    return None;
                }
                ArtistPreference::from_value(k, v).map(|p| (key, p))
            })
            .collect();

        let special: Vec<SpecialRule> = field(raw, "special", Vec::new());

        Self {
            enabled: field(raw, "enabled", true),
            mode: field(raw, "mode", Mode::Score),
            seed: field(raw, "seed", None),
            cooldown_s: field(raw, "cooldown_s", 0i64).max(0),
            include_genres: field(raw, "include_genres", true),
            debug: field(raw, "debug", false),
            sets,
            fallback,
            weights: field(raw, "weights", Weights::default()),
            bias: field(raw, "bias", BiasLists::default()).normalized(),
            unknown_policy: field(raw, "unknown_policy", UnknownPolicy::default()),
            explore,
            special: special.into_iter().map(SpecialRule::normalized).collect(),
            artist_preferences,
            context: field(raw, "context", ContextSettings::default()),
            thresholds: field(raw, "thresholds", None),
        }
    }

    /// First preference whose key occurs in the normalized artist.
    pub fn preference_for(&self, artist_norm: &str) -> Option<&ArtistPreference> {
        if artist_norm.is_empty() {
            return None;
        }
        self.artist_preferences
            .iter()
            .find(|(k, _)| artist_norm.contains(k.as_str()))
            .map(|(_, p)| p)
    }

    /// Built-in text for a bucket with no configured pool or fallback.
    pub fn default_text(bucket: Bucket) -> &'static str {
        match bucket {
            Bucket::Love => "Absolute banger! 😍",
            Bucket::Like => "LOVE IT! 😍",
            Bucket::Neutral => "Okay.",
            Bucket::Dislike => "Nope.",
            Bucket::Hate => "Make it stop.",
        }
    }
}

/// Decode one top-level key; absent/null → `default`, malformed → `default` + warning.
fn field<T: DeserializeOwned>(raw: &Map<String, Value>, key: &str, default: T) -> T {
    match raw.get(key) {
        None | Some(Value::Null) => default,
        Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|e| {
            warn!(target: "react", key, error = %e, "invalid reaction config section, using default");
            default
        }),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let c = ReactionConfig::default();
        assert!(c.enabled);
        assert_eq!(c.mode, Mode::Score);
        assert_eq!(c.weights, Weights::default());
        assert!(c.unknown_policy.enabled);
        assert!((c.unknown_policy.weights().like - 0.34).abs() < 1e-12);
        assert!(!c.explore.enabled);
        assert!(c.thresholds.is_none());
        assert!(!c.context.enabled);
    }

    #[test]
    fn malformed_section_only_resets_that_section() {
        let c = ReactionConfig::from_json_str(
            r#"{"weights": "heavy", "bias": {"like_tags": ["Hip-Hop"], "like_artists": ["AC/DC"]},
                "sets": {"LIKE": [" yes ", ""]}, "mode": "sideways", "cooldown_s": -5, "unknown": 1}"#,
        );
        assert_eq!(c.weights, Weights::default());
        assert_eq!(c.bias.like_tags, vec!["hip hop"]);
        assert_eq!(c.bias.like_artists, vec!["ac dc"]);
        assert_eq!(c.sets["like"], vec!["yes"]);
        assert_eq!(c.mode, Mode::Score);
        assert_eq!(c.cooldown_s, 0);
    }

    #[test]
    fn artist_preferences_parse_and_lookup() {
        let c = ReactionConfig::from_json_str(
            r#"{"artist_preferences": {
                "Queen": {"like_weight": 1.5, "flip": {"dislike": 2.0, "meh": 0.1}},
                "queen bee": {"score_bias": "-1"},
                "broken": 3
            }}"#,
        );
        assert_eq!(c.artist_preferences.len(), 2);
        let p = c.preference_for("queen").unwrap();
        assert_eq!(p.score_bias, 1.5);
        assert_eq!(p.flip, vec![(Bucket::Dislike, 1.0)]);
        // BTreeMap order: "queen" is tried before "queen bee"
        assert_eq!(c.preference_for("queen bee").unwrap().score_bias, 1.5);
        assert!(c.preference_for("").is_none());
    }

    #[test]
    fn thresholds_partial_keys() {
        let c = ReactionConfig::from_json_str(r#"{"thresholds": {"love": 5}}"#);
        let t = c.thresholds.unwrap();
        assert_eq!(t.love, 5.0);
        assert_eq!(t.like, 3.0);
        assert_eq!(t.bucket_for(5.0), Bucket::Love);
        assert_eq!(t.bucket_for(3.0), Bucket::Like);
        assert_eq!(t.bucket_for(-3.0), Bucket::Dislike);
        assert_eq!(t.bucket_for(-2.9), Bucket::Neutral);
        assert_eq!(t.bucket_for(-9.0), Bucket::Hate);
    }

    #[test]
    fn explore_chance_is_clamped() {
        let c = ReactionConfig::from_json_str(r#"{"explore": {"enabled": true, "chance": 7}}"#);
        assert!(c.explore.enabled);
        assert_eq!(c.explore.chance, 1.0);
        assert_eq!(c.explore.weights, BucketWeights::new(0.4, 0.4, 0.2));

        let c = ReactionConfig::from_json_str(r#"{"explore": {"weights": {"like": 1}}}"#);
        assert_eq!(c.explore.weights, BucketWeights::new(1.0, 0.4, 0.2));
    }

    #[test]
    fn mode_is_case_insensitive() {
        let c = ReactionConfig::from_json_str(r#"{"mode": " ALWAYS_LIKE "}"#);
        assert_eq!(c.mode, Mode::AlwaysLike);
        assert_eq!(Mode::parse("Always_Neutral"), Some(Mode::AlwaysNeutral));
        assert_eq!(Mode::parse("sideways"), None);
    }
}
