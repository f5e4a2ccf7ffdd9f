//! Active context ("mood") profile with hot reload.
//!
//! Profiles come from a JSON file (default `Memory/contexts.json`):
//! ```json
//! {
//!   "default_profile": "neutral",
//!   "profiles": {
//!     "battle": {"bucket_bias": {"like": 1.0}, "tag_weights": {"metal": 2.0}, "artist_weights": {}}
//!   },
//!   "source": {"type": "file", "path": "Memory/game_state.txt", "map": {"fighting": "battle"}}
//! }
//! ```
//!
//! The profile file is reloaded when its mtime changes. The state file (whose
//! trimmed, lower-cased content selects the profile through `source.map`) is
//! re-read at most once per `refresh_s`. Nothing here ever fails: problems
//! degrade to the default profile and a warning.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::{Duration, Instant, SystemTime},
};
use tracing::{debug, info, warn};

use crate::{
    decision::Bucket,
    fsutil,
    normalize::{norm_tag_for_scoring, normalize},
};

pub const DEFAULT_CONTEXTS_PATH: &str = "Memory/contexts.json";
pub const DEFAULT_STATE_PATH: &str = "Memory/game_state.txt";
pub const NEUTRAL_PROFILE: &str = "neutral";

fn default_contexts_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONTEXTS_PATH)
}
fn default_refresh_s() -> u64 {
    5
}

/// `context` section of the reaction config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_contexts_path")]
    pub path: PathBuf,
    #[serde(default = "default_refresh_s")]
    pub refresh_s: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_contexts_path(),
            refresh_s: default_refresh_s(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
struct ProfileWeights {
    #[serde(deserialize_with = "lenient_weights")]
    bucket_bias: BTreeMap<String, f64>,
    #[serde(deserialize_with = "lenient_weights")]
    tag_weights: BTreeMap<String, f64>,
    #[serde(deserialize_with = "lenient_weights")]
    artist_weights: BTreeMap<String, f64>,
}

/// Numeric (or numeric-string) entries only; the rest are dropped with a warning.
fn lenient_weights<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, f64>, D::Error> {
    let Value::Object(obj) = Value::deserialize(d)? else {
        return Ok(BTreeMap::new());
    };
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        let weight = match &v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        match weight {
            Some(w) => {
                out.insert(k, w);
            }
            None => warn!(target: "context", key = %k, value = %v, "ignoring non-numeric context weight"),
        }
    }
    Ok(out)
}

/// Each profile decodes on its own; a non-object profile is skipped.
fn lenient_profiles<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, ProfileWeights>, D::Error> {
    let Value::Object(obj) = Value::deserialize(d)? else {
        return Ok(BTreeMap::new());
    };
    let mut out = BTreeMap::new();
    for (name, raw) in obj {
        match serde_json::from_value::<ProfileWeights>(raw) {
            Ok(w) => {
                out.insert(name, w);
            }
            Err(e) => warn!(target: "context", profile = %name, error = %e, "skipping malformed context profile"),
        }
    }
    Ok(out)
}

/// Resolved profile handed to the scoring engine. Keys are pre-normalized:
/// bucket names lower-case, tags in scoring form, artists normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextProfile {
    pub name: String,
    pub bucket_bias: BTreeMap<String, f64>,
    pub tag_weights: BTreeMap<String, f64>,
    pub artist_weights: BTreeMap<String, f64>,
}

impl ContextProfile {
    /// Built-in profile with no biases.
    pub fn neutral() -> Self {
        Self::named(NEUTRAL_PROFILE)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn bucket_bias(&self, bucket: Bucket) -> f64 {
        self.bucket_bias.get(bucket.as_str()).copied().unwrap_or(0.0)
    }

    fn from_weights(name: &str, w: &ProfileWeights) -> Self {
        Self {
            name: name.to_string(),
            bucket_bias: w.bucket_bias.iter().map(|(k, v)| (k.trim().to_lowercase(), *v)).collect(),
            tag_weights: w.tag_weights.iter().map(|(k, v)| (norm_tag_for_scoring(k), *v)).collect(),
            artist_weights: w
                .artist_weights
                .iter()
                .map(|(k, v)| (normalize(k), *v))
                .filter(|(k, _)| !k.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SourceSpec {
    #[serde(rename = "type")]
    kind: String,
    path: PathBuf,
    map: BTreeMap<String, String>,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            kind: "file".to_string(),
            path: PathBuf::from(DEFAULT_STATE_PATH),
            map: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ContextsFile {
    default_profile: String,
    #[serde(deserialize_with = "lenient_profiles")]
    profiles: BTreeMap<String, ProfileWeights>,
    source: SourceSpec,
}

impl Default for ContextsFile {
    fn default() -> Self {
        Self {
            default_profile: NEUTRAL_PROFILE.to_string(),
            profiles: BTreeMap::new(),
            source: SourceSpec::default(),
        }
    }
}

impl ContextsFile {
    /// State value → profile name, through `source.map`, `map["default"]`,
    /// then `default_profile`. Names without a profile fall back too.
    fn resolve(&self, raw_state: &str) -> String {
        let key = if raw_state.is_empty() { "default" } else { raw_state };
        let name = self
            .source
            .map
            .get(key)
            .or_else(|| self.source.map.get("default"))
            .unwrap_or(&self.default_profile);
        if self.profiles.contains_key(name) {
            name.clone()
        } else {
            self.default_profile.clone()
        }
    }

    fn profile(&self, name: &str) -> ContextProfile {
        match self.profiles.get(name) {
            Some(w) => ContextProfile::from_weights(name, w),
            None => ContextProfile::named(name),
        }
    }
}

#[derive(Debug)]
pub struct ContextManager {
    enabled: bool,
    path: PathBuf,
    base_dir: PathBuf,
    refresh: Duration,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    file: ContextsFile,
    last_modified: Option<SystemTime>,
    active: String,
    last_state_read: Option<Instant>,
}

impl ContextManager {
    /// Relative paths (profile file and state file) resolve against `base_dir`.
    pub fn new(settings: &ContextSettings, base_dir: &Path) -> Self {
        let mgr = Self {
            enabled: settings.enabled,
            path: fsutil::resolve(base_dir, &settings.path),
            base_dir: base_dir.to_path_buf(),
            refresh: Duration::from_secs(settings.refresh_s),
            inner: RwLock::new(State {
                file: ContextsFile::default(),
                last_modified: None,
                active: NEUTRAL_PROFILE.to_string(),
                last_state_read: None,
            }),
        };
        if mgr.enabled {
            mgr.refresh_profiles();
            if mgr.inner.read().unwrap_or_else(PoisonError::into_inner).last_modified.is_none() {
                warn!(target: "context", path = %mgr.path.display(), "context profiles not found, using defaults");
            }
        }
        mgr
    }

    /// A manager that always answers with the neutral profile.
    pub fn disabled() -> Self {
        Self::new(&ContextSettings::default(), Path::new("."))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current profile. Cheap when nothing changed.
    pub fn get_active_profile(&self) -> ContextProfile {
        self.get_active_profile_at(Instant::now())
    }

    /// Same as [`get_active_profile`](Self::get_active_profile) with an explicit clock for the state throttle.
    pub fn get_active_profile_at(&self, now: Instant) -> ContextProfile {
        if !self.enabled {
            return ContextProfile::neutral();
        }
        self.refresh_profiles();
        self.refresh_state(now);

        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.file.profile(&guard.active)
    }

    /// Name of the active profile (the neutral profile when disabled).
    pub fn active_name(&self) -> String {
        self.get_active_profile().name
    }

    fn refresh_profiles(&self) {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            // Missing file: keep whatever we have.
            Err(_) => return,
        };
        {
            let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if guard.last_modified == Some(mtime) {
                return;
            }
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.last_modified == Some(mtime) {
            return;
        }
        match load_contexts_file(&self.path) {
            Ok(file) => {
                info!(
                    target: "context",
                    path = %self.path.display(),
                    profiles = file.profiles.len(),
                    default = %file.default_profile,
                    "context profiles loaded"
                );
                guard.file = file;
                guard.last_state_read = None;
            }
            Err(e) => {
                warn!(target: "context", path = %self.path.display(), error = %e, "context profiles unreadable, keeping previous");
            }
        }
        guard.last_modified = Some(mtime);
    }

    fn refresh_state(&self, now: Instant) {
        {
            let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(last) = guard.last_state_read {
                if now.saturating_duration_since(last) < self.refresh {
                    return;
                }
            }
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let raw = if guard.file.source.kind.eq_ignore_ascii_case("file") {
            let state_path = fsutil::resolve(&self.base_dir, &guard.file.source.path);
            fs::read_to_string(&state_path)
                .map(|s| s.trim().to_lowercase())
                .unwrap_or_default()
        } else {
            warn!(target: "context", kind = %guard.file.source.kind, "unsupported context source type");
            String::new()
        };

        let active = guard.file.resolve(&raw);
        if active != guard.active {
            debug!(target: "context", from = %guard.active, to = %active, state = %raw, "active context changed");
            guard.active = active;
        }
        guard.last_state_read = Some(now);
    }
}

fn load_contexts_file(path: &Path) -> anyhow::Result<ContextsFile> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    const PROFILES: &str = r#"{
        "default_profile": "calm",
        "profiles": {
            "calm": {"bucket_bias": {"Neutral": 0.5}},
            "battle": {"bucket_bias": {"like": 1.0}, "tag_weights": {"Hip-Hop": 2.0}, "artist_weights": {"AC/DC": 1.5}}
        },
        "source": {"type": "file", "path": "state.txt", "map": {"fighting": "battle", "menu": "ghost"}}
    }"#;

    fn setup(refresh_s: u64) -> (tempfile::TempDir, ContextManager) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("contexts.json"), PROFILES).unwrap();
        let settings = ContextSettings {
            enabled: true,
            path: PathBuf::from("contexts.json"),
            refresh_s,
        };
        let mgr = ContextManager::new(&settings, dir.path());
        (dir, mgr)
    }

    #[test]
    fn disabled_is_neutral() {
        let mgr = ContextManager::disabled();
        let p = mgr.get_active_profile();
        assert_eq!(p.name, NEUTRAL_PROFILE);
        assert!(p.bucket_bias.is_empty() && p.tag_weights.is_empty() && p.artist_weights.is_empty());
    }

    #[test]
    fn state_maps_to_profile_with_normalized_keys() {
        let (dir, mgr) = setup(0);
        fs::write(dir.path().join("state.txt"), "  FIGHTING \n").unwrap();
        let p = mgr.get_active_profile();
        assert_eq!(p.name, "battle");
        assert_eq!(p.bucket_bias(Bucket::Like), 1.0);
        assert_eq!(p.tag_weights.get("hip hop"), Some(&2.0));
        assert_eq!(p.artist_weights.get("ac dc"), Some(&1.5));
    }

    #[test]
    fn unmapped_missing_or_unknown_profile_fall_back_to_default() {
        let (dir, mgr) = setup(0);
        assert_eq!(mgr.active_name(), "calm"); // no state file
        fs::write(dir.path().join("state.txt"), "something else").unwrap();
        assert_eq!(mgr.active_name(), "calm");
        fs::write(dir.path().join("state.txt"), "menu").unwrap(); // maps to a missing profile
        let p = mgr.get_active_profile();
        assert_eq!(p.name, "calm");
        assert_eq!(p.bucket_bias(Bucket::Neutral), 0.5);
    }

    #[test]
    fn state_reads_are_throttled() {
        let (dir, mgr) = setup(60);
        let state = dir.path().join("state.txt");
        let t0 = Instant::now();
        fs::write(&state, "fighting").unwrap();
        assert_eq!(mgr.get_active_profile_at(t0).name, "battle");

        fs::write(&state, "").unwrap();
        assert_eq!(mgr.get_active_profile_at(t0 + Duration::from_secs(10)).name, "battle");
        assert_eq!(mgr.get_active_profile_at(t0 + Duration::from_secs(61)).name, "calm");
    }

    #[test]
    fn bad_weights_and_profiles_are_dropped_individually() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("contexts.json"),
            r#"{
                "default_profile": "battle",
                "profiles": {
                    "battle": {"tag_weights": {"pop": "lots", "rock": "1.5", "metal": 2}, "bucket_bias": []},
                    "broken": 7
                }
            }"#,
        )
        .unwrap();
        let settings = ContextSettings {
            enabled: true,
            path: PathBuf::from("contexts.json"),
            refresh_s: 0,
        };
        let p = ContextManager::new(&settings, dir.path()).get_active_profile();
        assert_eq!(p.name, "battle");
        assert_eq!(p.tag_weights.get("rock"), Some(&1.5));
        assert_eq!(p.tag_weights.get("metal"), Some(&2.0));
        assert!(!p.tag_weights.contains_key("pop"));
        assert!(p.bucket_bias.is_empty());
    }

    #[test]
    fn profiles_reload_on_mtime_change() {
        let (dir, mgr) = setup(0);
        let path = dir.path().join("contexts.json");
        assert_eq!(mgr.active_name(), "calm");

        fs::write(&path, r#"{"default_profile": "chill", "profiles": {"chill": {}}}"#).unwrap();
        // Force a distinct mtime regardless of filesystem granularity.
        let later = UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        fs::File::options().write(true).open(&path).unwrap().set_modified(later).unwrap();

        assert_eq!(mgr.active_name(), "chill");
    }
}
