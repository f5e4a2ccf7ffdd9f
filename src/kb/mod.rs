//! Song knowledge base: entry model, loading and the matching index.
//!
//! File shape: a JSON array of entries or `{"songs": [...]}`. Entries missing
//! a string `title`/`artist` are skipped with a warning; everything else is
//! lenient (`tags` may be a list or a `;`/`,`/`/` separated string).

pub mod index;
pub mod notes;
pub mod similarity;
pub mod snapshot;

pub use index::{FuzzyParams, KnowledgeBaseIndex, Match, MatchKind};
pub use notes::NotesMetadata;
pub use similarity::SimilarityMetric;
pub use snapshot::{load_or_build_index, KbSource};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SONGS_KB_PATH: &str = "songs_kb.json";

/// One curated song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongEntry {
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, deserialize_with = "de_plain_list")]
    pub aliases: Vec<String>,
    #[serde(default, deserialize_with = "de_tag_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub notes: String,
}

impl SongEntry {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: None,
            aliases: Vec::new(),
            tags: Vec::new(),
            notes: String::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum KbError {
    #[error("knowledge base unavailable at {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("knowledge base at {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("knowledge base at {} must be a JSON array or an object with a \"songs\" array", path.display())]
    UnexpectedShape { path: PathBuf },
}

/// Load and validate the KB file.
pub fn load_songs_kb(path: &Path) -> Result<Vec<SongEntry>, KbError> {
    let bytes = fs::read(path).map_err(|source| KbError::Unavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let root: Value = serde_json::from_slice(&bytes).map_err(|source| KbError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    parse_songs(root).ok_or_else(|| KbError::UnexpectedShape {
        path: path.to_path_buf(),
    })
}

/// Entries from an already parsed KB document; `None` for a bad top level.
pub fn parse_songs(root: Value) -> Option<Vec<SongEntry>> {
    let items = match root {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("songs") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<SongEntry>(item) {
            Ok(entry) => out.push(entry),
            Err(e) => warn!(target: "kb", index = i, error = %e, "skipping malformed KB entry"),
        }
    }
    Some(out)
}

// --- lenient field decoding ---

fn de_tag_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(string_list(Value::deserialize(d)?, &[';', ',', '/']))
}

fn de_plain_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(string_list(Value::deserialize(d)?, &[]))
}

fn de_lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn string_list(v: Value, delimiters: &[char]) -> Vec<String> {
    let raw: Vec<String> = match v {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) if !delimiters.is_empty() => s.split(delimiters).map(str::to_string).collect(),
        Value::String(s) => vec![s],
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
