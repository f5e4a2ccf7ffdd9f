//! Long-term reaction memory per song and context.
//!
//! Persisted as `{"songs": {key: MemoryRecord}}` where `key` is
//! `normalize(title)|normalize(artist)`. Per-context counts optionally decay
//! with a half-life before each increment; `total` counts never decay.

pub mod commentary;

pub use commentary::{Commentary, CommentarySettings, MemoryTuning};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::{decision::Bucket, fsutil};

pub const DEFAULT_MEMORY_PATH: &str = "Memory/memory.json";

fn default_true() -> bool {
    true
}
fn default_memory_path() -> PathBuf {
    PathBuf::from(DEFAULT_MEMORY_PATH)
}
fn default_half_life_days() -> f64 {
    90.0
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DecaySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    #[serde(default)]
    pub floor: f64,
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            half_life_days: default_half_life_days(),
            floor: 0.0,
        }
    }
}

impl DecaySettings {
    /// `0.5 ^ (elapsed / half_life)`, or 1.0 when decay is off.
    pub fn factor(&self, elapsed_days: f64) -> f64 {
        if !self.enabled || self.half_life_days <= 0.0 {
            return 1.0;
        }
        0.5_f64.powf(elapsed_days.max(0.0) / self.half_life_days)
    }

    fn apply(&self, value: f64, factor: f64) -> f64 {
        let v = value * factor;
        if self.floor > 0.0 {
            v.max(self.floor)
        } else {
            v
        }
    }
}

/// `memory` section of the app config (commentary knobs live alongside).
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub decay: DecaySettings,
    #[serde(flatten)]
    pub commentary: CommentarySettings,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_memory_path(),
            decay: DecaySettings::default(),
            commentary: CommentarySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketCounts {
    #[serde(default, deserialize_with = "lenient_count")]
    pub like: f64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub neutral: f64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub dislike: f64,
}

impl BucketCounts {
    pub fn get(&self, bucket: Bucket) -> f64 {
        match bucket.memory_slot() {
            Bucket::Like => self.like,
            Bucket::Dislike => self.dislike,
            _ => self.neutral,
        }
    }

    fn bump(&mut self, bucket: Bucket) {
        match bucket.memory_slot() {
            Bucket::Like => self.like += 1.0,
            Bucket::Dislike => self.dislike += 1.0,
            _ => self.neutral += 1.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.like + self.neutral + self.dislike
    }

    fn decayed(&self, decay: &DecaySettings, factor: f64) -> Self {
        Self {
            like: decay.apply(self.like, factor),
            neutral: decay.apply(self.neutral, factor),
            dislike: decay.apply(self.dislike, factor),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextCounts {
    #[serde(flatten)]
    pub counts: BucketCounts,
    #[serde(default, deserialize_with = "lenient_ts", skip_serializing_if = "Option::is_none")]
    pub last_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastSeen {
    #[serde(default, deserialize_with = "lenient_ts", skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Bucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub total: BucketCounts,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextCounts>,
    #[serde(default)]
    pub last: LastSeen,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    songs: BTreeMap<String, MemoryRecord>,
}

/// Strongest context for a song: `(name, bucket, like - dislike)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BestContext {
    pub context: String,
    pub bucket: Bucket,
    pub score: f64,
}

#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    enabled: bool,
    decay: DecaySettings,
    data: MemoryFile,
}

impl MemoryStore {
    /// Open (or start) the store at `path`. An unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>, enabled: bool, decay: DecaySettings) -> Self {
        let path = path.into();
        let data = if enabled { load_memory_file(&path) } else { MemoryFile::default() };
        Self {
            path,
            enabled,
            decay,
            data,
        }
    }

    pub fn from_settings(settings: &MemorySettings, base_dir: &Path) -> Self {
        Self::open(
            fsutil::resolve(base_dir, &settings.path),
            settings.enabled,
            settings.decay,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.data.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.songs.is_empty()
    }

    pub fn record(&self, key: &str) -> Option<&MemoryRecord> {
        self.data.songs.get(key)
    }

    pub fn update(&mut self, key: &str, title: &str, artist: &str, context: &str, bucket: Bucket, tags: &[String]) {
        self.update_at(key, title, artist, context, bucket, tags, Utc::now());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_at(
        &mut self,
        key: &str,
        title: &str,
        artist: &str,
        context: &str,
        bucket: Bucket,
        tags: &[String],
        now: DateTime<Utc>,
    ) {
        if !self.enabled {
            return;
        }
        let decay = self.decay;
        let rec = self.data.songs.entry(key.to_string()).or_insert_with(|| MemoryRecord {
            title: title.to_string(),
            artist: artist.to_string(),
            ..MemoryRecord::default()
        });

        rec.tags.extend(
            tags.iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );

        let ctx = rec.contexts.entry(context.to_string()).or_insert_with(|| ContextCounts {
            counts: BucketCounts::default(),
            last_ts: Some(now),
        });
        let factor = decay.factor(elapsed_days(ctx.last_ts, now));
        if factor < 1.0 {
            ctx.counts = ctx.counts.decayed(&decay, factor);
        }
        ctx.counts.bump(bucket);
        ctx.last_ts = Some(now);

        rec.total.bump(bucket);
        rec.last = LastSeen {
            ts: Some(now),
            bucket: Some(bucket.memory_slot()),
            context: Some(context.to_string()),
        };
        debug!(target: "memory", key, context, bucket = %bucket, "memory updated");
    }

    /// Total reactions recorded for the song, rounded.
    pub fn seen_count(&self, key: &str) -> u64 {
        self.record(key)
            .map_or(0, |r| r.total.sum().round().max(0.0) as u64)
    }

    pub fn best_context(&self, key: &str) -> Option<BestContext> {
        self.best_context_at(key, Utc::now())
    }

    /// Evaluated on decayed copies; stored counts are left untouched.
    pub fn best_context_at(&self, key: &str, now: DateTime<Utc>) -> Option<BestContext> {
        let rec = self.record(key)?;
        let mut best: Option<(&String, BucketCounts)> = None;
        for (name, ctx) in &rec.contexts {
            let factor = self.decay.factor(elapsed_days(ctx.last_ts, now));
            let c = if factor < 1.0 {
                ctx.counts.decayed(&self.decay, factor)
            } else {
                ctx.counts
            };
            let better = match &best {
                None => true,
                Some((_, b)) => {
                    let (s, bs) = (c.like - c.dislike, b.like - b.dislike);
                    s > bs || (s == bs && c.like > b.like)
                }
            };
            if better {
                best = Some((name, c));
            }
        }

        let (name, c) = best?;
        let bucket = if c.like > c.neutral && c.like > c.dislike {
            Bucket::Like
        } else if c.dislike > c.like && c.dislike > c.neutral {
            Bucket::Dislike
        } else {
            Bucket::Neutral
        };
        Some(BestContext {
            context: name.clone(),
            bucket,
            score: c.like - c.dislike,
        })
    }

    /// Write the whole store atomically. Failures are logged and reported as `false`.
    pub fn save(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match fsutil::atomic_write_json(&self.path, &self.data) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "memory", path = %self.path.display(), error = %e, "memory save failed");
                false
            }
        }
    }
}

fn elapsed_days(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last {
        Some(ts) => ((now - ts).num_milliseconds() as f64 / 86_400_000.0).max(0.0),
        None => 0.0,
    }
}

/// Records are decoded one by one; a malformed record is skipped with a
/// warning instead of discarding the rest of the file.
fn load_memory_file(path: &Path) -> MemoryFile {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MemoryFile::default(),
        Err(e) => {
            warn!(target: "memory", path = %path.display(), error = %e, "memory unreadable, starting empty");
            return MemoryFile::default();
        }
    };
    let root: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "memory", path = %path.display(), error = %e, "memory file malformed, starting empty");
            return MemoryFile::default();
        }
    };
    let songs = match root {
        Value::Object(mut obj) => match obj.remove("songs") {
            Some(Value::Object(songs)) => songs,
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                warn!(target: "memory", path = %path.display(), "memory \"songs\" is not an object, starting empty");
                Map::new()
            }
        },
        _ => {
            warn!(target: "memory", path = %path.display(), "memory file is not a JSON object, starting empty");
            Map::new()
        }
    };

    let mut out = MemoryFile::default();
    for (key, raw) in songs {
        match serde_json::from_value::<MemoryRecord>(raw) {
            Ok(rec) => {
                out.songs.insert(key, rec);
            }
            Err(e) => warn!(target: "memory", key = %key, error = %e, "skipping malformed memory record"),
        }
    }
    out
}

/// Counts accept numbers or numeric strings; anything else reads as 0.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Bad or missing timestamps read as `None` instead of failing the whole file.
fn lenient_ts<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Value::deserialize(d)?;
    Ok(raw
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn decay(floor: f64) -> DecaySettings {
        DecaySettings {
            enabled: true,
            half_life_days: 10.0,
            floor,
        }
    }

    #[test]
    fn decay_factor_properties() {
        let d = decay(0.0);
        assert_eq!(d.factor(0.0), 1.0);
        assert!((d.factor(10.0) - 0.5).abs() < 1e-12);
        let mut prev = 1.0;
        for day in 1..200 {
            let f = d.factor(day as f64);
            assert!(f <= prev);
            prev = f;
        }
        assert_eq!(DecaySettings::default().factor(1000.0), 1.0);
    }

    #[test]
    fn decay_respects_floor() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = MemoryStore::open(dir.path().join("m.json"), true, decay(0.25));
        m.update_at("k", "T", "A", "ctx", Bucket::Neutral, &[], t0());
        m.update_at("k", "T", "A", "ctx", Bucket::Like, &[], t0() + Duration::days(1000));
        let c = m.record("k").unwrap().contexts["ctx"].counts;
        assert!((c.neutral - 0.25).abs() < 1e-9, "floored, got {}", c.neutral);
        assert!((c.like - 1.25).abs() < 1e-9);
        assert!((c.dislike - 0.25).abs() < 1e-9);
    }

    #[test]
    fn update_folds_love_and_keeps_totals() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = MemoryStore::open(dir.path().join("m.json"), true, decay(0.0));
        let tags = vec!["Pop".to_string(), " ".to_string()];
        m.update_at("k", "T", "A", "a", Bucket::Love, &tags, t0());
        m.update_at("k", "T", "A", "a", Bucket::Hate, &[], t0() + Duration::days(10));

        let r = m.record("k").unwrap();
        assert_eq!(r.tags.iter().collect::<Vec<_>>(), vec!["pop"]);
        assert_eq!(r.total, BucketCounts { like: 1.0, neutral: 0.0, dislike: 1.0 });
        assert!((r.contexts["a"].counts.like - 0.5).abs() < 1e-9);
        assert_eq!(r.last.bucket, Some(Bucket::Dislike));
        assert_eq!(m.seen_count("k"), 2);
        assert_eq!(m.seen_count("missing"), 0);
    }

    #[test]
    fn best_context_scores_and_ties() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = MemoryStore::open(dir.path().join("m.json"), true, DecaySettings::default());
        for _ in 0..3 {
            m.update_at("k", "T", "A", "battle", Bucket::Like, &[], t0());
        }
        m.update_at("k", "T", "A", "menu", Bucket::Like, &[], t0());
        m.update_at("k", "T", "A", "menu", Bucket::Dislike, &[], t0());

        let best = m.best_context_at("k", t0()).unwrap();
        assert_eq!(best.context, "battle");
        assert_eq!(best.bucket, Bucket::Like);
        assert_eq!(best.score, 3.0);

        // menu: like == dislike → neutral label
        let mut solo = MemoryStore::open(dir.path().join("s.json"), true, DecaySettings::default());
        solo.update_at("k", "T", "A", "menu", Bucket::Like, &[], t0());
        solo.update_at("k", "T", "A", "menu", Bucket::Dislike, &[], t0());
        assert_eq!(solo.best_context_at("k", t0()).unwrap().bucket, Bucket::Neutral);
        assert!(solo.best_context_at("other", t0()).is_none());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Memory/memory.json");
        let mut m = MemoryStore::open(&path, true, DecaySettings::default());
        m.update_at("echo|a", "Echo", "A", "default", Bucket::Like, &["pop".into()], t0());
        assert!(m.save());

        let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let rec = &v["songs"]["echo|a"];
        assert_eq!(rec["total"]["like"], 1.0);
        assert_eq!(rec["contexts"]["default"]["like"], 1.0);
        assert_eq!(rec["contexts"]["default"]["last_ts"], "2025-01-01T00:00:00Z");
        assert_eq!(rec["last"]["bucket"], "like");

        let again = MemoryStore::open(&path, true, DecaySettings::default());
        assert_eq!(again.record("echo|a"), m.record("echo|a"));
    }

    #[test]
    fn bad_records_do_not_wipe_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let mut m = MemoryStore::open(&path, true, DecaySettings::default());
        m.update_at("good|a", "Good", "A", "default", Bucket::Like, &[], t0());
        m.update_at("odd|b", "Odd", "B", "default", Bucket::Like, &[], t0());
        assert!(m.save());

        let mut v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        v["songs"]["odd|b"]["total"]["like"] = serde_json::Value::Null;
        v["songs"]["broken|c"] = serde_json::json!({"tags": 42});
        fs::write(&path, serde_json::to_vec(&v).unwrap()).unwrap();

        let mut reopened = MemoryStore::open(&path, true, DecaySettings::default());
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.seen_count("good|a"), 1);
        assert_eq!(reopened.record("odd|b").unwrap().total.like, 0.0);
        assert!(reopened.record("broken|c").is_none());

        reopened.update_at("new|d", "New", "D", "default", Bucket::Neutral, &[], t0());
        assert!(reopened.save());
        let again = MemoryStore::open(&path, true, DecaySettings::default());
        assert_eq!(again.record("good|a"), m.record("good|a"));
        assert_eq!(again.len(), 3);
    }

    #[test]
    fn disabled_and_corrupt_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        fs::write(&path, b"{{{").unwrap();
        let mut m = MemoryStore::open(&path, true, DecaySettings::default());
        assert!(m.is_empty());

        let mut off = MemoryStore::open(dir.path().join("off.json"), false, DecaySettings::default());
        off.update("k", "T", "A", "c", Bucket::Like, &[]);
        assert!(off.is_empty());
        assert!(!off.save());

        m.update("k", "T", "A", "c", Bucket::Like, &[]);
        assert_eq!(m.len(), 1);
    }
}
