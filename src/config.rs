//! Application config (`config/reactor.json`).
//!
//! Lookup order for the file:
//! 1) `$REACTOR_CONFIG_PATH`
//! 2) `config/reactor.json`
//! 3) built-in defaults
//!
//! Every section has defaults, so a partial file is fine. Relative paths
//! inside the file resolve against the file's own directory.

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

use crate::{
    kb::{FuzzyParams, DEFAULT_SONGS_KB_PATH},
    memory::MemorySettings,
    react::config::DEFAULT_REACTIONS_PATH,
    review::ReviewSettings,
    special_version::Phrases,
};

pub const ENV_REACTOR_CONFIG_PATH: &str = "REACTOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/reactor.json";
pub const DEFAULT_RESULT_CACHE_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} not readable: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {} is not valid: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("REACTOR_CONFIG_PATH points to a missing file: {}", .0.display())]
    MissingEnvPath(PathBuf),
}

fn default_songs_kb_path() -> PathBuf {
    PathBuf::from(DEFAULT_SONGS_KB_PATH)
}
fn default_reactions_path() -> PathBuf {
    PathBuf::from(DEFAULT_REACTIONS_PATH)
}
fn default_result_cache_size() -> usize {
    DEFAULT_RESULT_CACHE_SIZE
}

/// How the genres line is built from display tags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenresSettings {
    /// Shown when there is no title at all.
    pub template: String,
    /// Shown for a titled song without display tags.
    pub fallback: String,
    pub joiner: String,
    pub show_special_version: bool,
    pub special_version_prefix: String,
}

impl Default for GenresSettings {
    fn default() -> Self {
        Self {
            template: "Pop • Nightcore • Speed Up".into(),
            fallback: "New song :) let's listen".into(),
            joiner: " • ".into(),
            show_special_version: true,
            special_version_prefix: String::new(),
        }
    }
}

impl GenresSettings {
    pub fn text_for(&self, display_tags: &[String], titled: bool) -> String {
        if !display_tags.is_empty() {
            display_tags.join(&self.joiner)
        } else if titled {
            self.fallback.clone()
        } else {
            self.template.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_songs_kb_path")]
    pub songs_kb_path: PathBuf,
    /// Index snapshot location; `None` disables the snapshot.
    #[serde(default)]
    pub kb_index_cache_path: Option<PathBuf>,
    /// Fail startup when the KB cannot be loaded (otherwise run without one).
    #[serde(default)]
    pub kb_required: bool,
    #[serde(default = "default_reactions_path")]
    pub reactions_path: PathBuf,
    #[serde(default)]
    pub special_version_tags: BTreeMap<String, Phrases>,
    #[serde(default)]
    pub genres: GenresSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub review: ReviewSettings,
    #[serde(default = "default_result_cache_size")]
    pub result_cache_size: usize,
    #[serde(default)]
    pub fuzzy: FuzzyParams,
    /// Directory relative paths resolve against; set by the loaders.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            songs_kb_path: default_songs_kb_path(),
            kb_index_cache_path: None,
            kb_required: false,
            reactions_path: default_reactions_path(),
            special_version_tags: BTreeMap::new(),
            genres: GenresSettings::default(),
            memory: MemorySettings::default(),
            review: ReviewSettings::default(),
            result_cache_size: DEFAULT_RESULT_CACHE_SIZE,
            fuzzy: FuzzyParams::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_json_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        info!(target: "config", path = %path.display(), "app config loaded");
        Ok(cfg)
    }

    /// Parsed config with `base_dir` = `.`.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        let mut cfg: AppConfig = serde_json::from_str(s)?;
        cfg.result_cache_size = cfg.result_cache_size.max(1);
        cfg.base_dir = PathBuf::from(".");
        Ok(cfg)
    }

    /// Env path (must exist), then the default path, then built-in defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(p) = env::var(ENV_REACTOR_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::MissingEnvPath(pb));
            }
            return Self::load(&pb);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load(default);
        }
        info!(target: "config", "no app config file, using defaults");
        Ok(Self::default())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve(&self, p: &Path) -> PathBuf {
        crate::fsutil::resolve(&self.base_dir, p)
    }
}
