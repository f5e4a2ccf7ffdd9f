//! Review logs for songs a human should look at.
//!
//! Two JSONL channels:
//! - missing songs: a titled song with no KB match
//! - artist not sure: a KB match whose artist barely resembles the observed one
//!
//! Each channel dedupes by key with a TTL so a song looping on stream is
//! logged once per window. Dedupe state survives restarts.

use anyhow::Context;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::{
    fsutil,
    kb::SongEntry,
    normalize::{normalize, normalize_opt, song_key},
};

/// Below this observed-vs-KB artist similarity a match is flagged.
pub const ARTIST_NOT_SURE_THRESHOLD: f64 = 0.50;
pub const DEFAULT_DEDUPE_MAX_ITEMS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MissingLogSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub state_path: PathBuf,
    pub dedupe_hours: i64,
    /// Also log the very first update after startup.
    pub log_on_init: bool,
}

impl Default for MissingLogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("missing_songs_log.jsonl"),
            state_path: PathBuf::from(".missing_seen.json"),
            dedupe_hours: 12,
            log_on_init: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArtistNotSureSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub state_path: PathBuf,
    pub dedupe_hours: i64,
}

impl Default for ArtistNotSureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("missingsongs/artist_not_sure.jsonl"),
            state_path: PathBuf::from("missingsongs/.artist_not_sure_seen.json"),
            dedupe_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    pub missing_log: MissingLogSettings,
    pub artist_not_sure: ArtistNotSureSettings,
}

/// Longest accepted dedupe TTL (one year); larger configured values are clamped.
pub const MAX_DEDUPE_HOURS: i64 = 365 * 24;

/// `{key → last logged}` with a TTL and a size cap.
#[derive(Debug)]
pub struct TtlDedupe {
    path: Option<PathBuf>,
    ttl: Duration,
    max_items: usize,
    seen: BTreeMap<String, String>,
}

impl TtlDedupe {
    /// `ttl_hours` is clamped to `1..=MAX_DEDUPE_HOURS`; `max_items` below 1 is raised to 1.
    /// With a `path`, existing state is loaded and every `mark` persists.
    pub fn new(path: Option<PathBuf>, ttl_hours: i64, max_items: usize) -> Self {
        let seen = path.as_deref().map(load_state).unwrap_or_default();
        Self {
            path,
            ttl: Duration::hours(ttl_hours.clamp(1, MAX_DEDUPE_HOURS)),
            max_items: max_items.max(1),
            seen,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn should_log(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        self.prune(now);
        match self.seen.get(key).and_then(|ts| parse_ts(ts)) {
            Some(last) => now - last > self.ttl,
            None => true,
        }
    }

    pub fn mark(&mut self, key: &str, now: DateTime<Utc>) {
        self.seen.insert(key.to_string(), fmt_ts(now));
        self.prune(now);
        if let Some(path) = &self.path {
            if let Err(e) = fsutil::atomic_write_json(path, &self.seen) {
                warn!(target: "review", path = %path.display(), error = %e, "dedupe state not saved");
            }
        }
    }

    /// Drop expired and unreadable entries, then the oldest beyond the cap.
    fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, ts| parse_ts(ts).is_some_and(|t| now - t <= ttl));

        if self.seen.len() > self.max_items {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .seen
                .iter()
                .filter_map(|(k, ts)| parse_ts(ts).map(|t| (t, k.clone())))
                .collect();
            by_age.sort();
            let excess = self.seen.len() - self.max_items;
            for (_, k) in by_age.into_iter().take(excess) {
                self.seen.remove(&k);
            }
        }
    }
}

fn load_state(path: &Path) -> BTreeMap<String, String> {
    let raw = match fs::read(path) {
        Ok(b) => b,
        Err(_) => return BTreeMap::new(),
    };
    serde_json::from_slice(&raw).unwrap_or_else(|e| {
        warn!(target: "review", path = %path.display(), error = %e, "dedupe state unreadable, starting empty");
        BTreeMap::new()
    })
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

/// Append one JSON value as a line, creating parent directories.
pub fn append_jsonl(path: &Path, value: &Value) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))?;
    let mut line = serde_json::to_string(value).context("serializing JSONL record")?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}

#[derive(Debug)]
struct Channel {
    path: PathBuf,
    dedupe: TtlDedupe,
}

impl Channel {
    fn open(path: &Path, state_path: &Path, ttl_hours: i64, base_dir: &Path) -> Self {
        Self {
            path: fsutil::resolve(base_dir, path),
            dedupe: TtlDedupe::new(
                Some(fsutil::resolve(base_dir, state_path)),
                ttl_hours,
                DEFAULT_DEDUPE_MAX_ITEMS,
            ),
        }
    }

    /// Write `record` unless `key` was logged inside the TTL.
    fn log(&mut self, key: &str, record: Value, now: DateTime<Utc>) -> bool {
        if !self.dedupe.should_log(key, now) {
            return false;
        }
        if let Err(e) = append_jsonl(&self.path, &record) {
            warn!(target: "review", path = %self.path.display(), error = %e, "review log write failed");
            return false;
        }
        self.dedupe.mark(key, now);
        true
    }
}

#[derive(Debug, Default)]
pub struct ReviewLog {
    missing: Option<Channel>,
    not_sure: Option<Channel>,
    log_on_init: bool,
}

impl ReviewLog {
    /// Relative paths resolve against `base_dir`.
    pub fn new(settings: &ReviewSettings, base_dir: &Path) -> Self {
        let m = &settings.missing_log;
        let n = &settings.artist_not_sure;
        let missing = m
            .enabled
            .then(|| Channel::open(&m.path, &m.state_path, m.dedupe_hours, base_dir));
        let not_sure = n
            .enabled
            .then(|| Channel::open(&n.path, &n.state_path, n.dedupe_hours, base_dir));
        if let Some(c) = &missing {
            info!(target: "review", path = %c.path.display(), "missing-song log enabled");
        }
        Self {
            missing,
            not_sure,
            log_on_init: m.log_on_init,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// A titled song without a KB match. `first_update` marks the first song
    /// seen since startup, skipped unless `log_on_init`.
    pub fn log_missing(&mut self, title: &str, artist: Option<&str>, first_update: bool, now: DateTime<Utc>) -> bool {
        if title.trim().is_empty() || (first_update && !self.log_on_init) {
            return false;
        }
        let Some(channel) = self.missing.as_mut() else {
            return false;
        };
        let record = json!({
            "ts": fmt_ts(now),
            "title": title,
            "artist": artist.unwrap_or(""),
            "normalized_key": {"title": normalize(title), "artist": normalize_opt(artist)},
        });
        let logged = channel.log(&song_key(title, artist), record, now);
        if logged {
            info!(target: "review", title, artist = artist.unwrap_or(""), "missing song logged");
        }
        logged
    }

    /// A match whose best artist similarity is below
    /// [`ARTIST_NOT_SURE_THRESHOLD`]. Callers pass the similarity they computed.
    pub fn log_artist_not_sure(
        &mut self,
        title: &str,
        observed_artist: &str,
        entry: &SongEntry,
        artist_similarity: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if observed_artist.trim().is_empty() || artist_similarity >= ARTIST_NOT_SURE_THRESHOLD {
            return false;
        }
        let Some(channel) = self.not_sure.as_mut() else {
            return false;
        };
        let key = format!(
            "{}|{}|{}",
            song_key(title, Some(observed_artist)),
            normalize(&entry.artist),
            normalize(&entry.title)
        );
        let record = json!({
            "ts": fmt_ts(now),
            "observed": {"title": title, "artist": observed_artist},
            "kb_entry": {
                "title": entry.title,
                "artist": entry.artist,
                "aliases": entry.aliases,
                "notes": entry.notes,
                "tags": entry.tags,
            },
            "reason": "artist_mismatch",
        });
        let logged = channel.log(&key, record, now);
        if logged {
            info!(target: "review", title, observed = observed_artist, kb_artist = %entry.artist, "artist mismatch logged");
        }
        logged
    }
}
