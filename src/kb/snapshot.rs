//! Persisted index snapshot keyed by the KB file's SHA-256.
//!
//! Building the index is cheap for small KBs but the snapshot lets large ones
//! skip normalization on startup. A snapshot is only trusted when its format
//! version and `kb_sha256` both match; anything else (missing, unreadable,
//! stale) triggers a rebuild from source and a fresh atomic write. Snapshot
//! problems are never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::{index::FuzzyParams, parse_songs, KbError, KnowledgeBaseIndex, SongEntry};
use crate::{fsutil, telemetry};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    kb_sha256: String,
    entries: Vec<SongEntry>,
    titles: Vec<TitleIds>,
    keys: Vec<KeyId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TitleIds {
    title: String,
    ids: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyId {
    title: String,
    artist: String,
    id: usize,
}

enum SnapshotMiss {
    Missing,
    Unreadable(String),
    Stale,
}

impl fmt::Display for SnapshotMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotMiss::Missing => f.write_str("no snapshot"),
            SnapshotMiss::Unreadable(e) => write!(f, "unreadable snapshot: {e}"),
            SnapshotMiss::Stale => f.write_str("snapshot hash or version mismatch"),
        }
    }
}

/// Load the index for `kb_path`, preferring a valid snapshot at `cache_path`.
/// Returns the index and the KB content hash.
pub fn load_or_build_index(
    kb_path: &Path,
    cache_path: Option<&Path>,
) -> Result<(KnowledgeBaseIndex, String), KbError> {
    let bytes = fs::read(kb_path).map_err(|source| KbError::Unavailable {
        path: kb_path.to_path_buf(),
        source,
    })?;
    let hash = fsutil::sha256_hex(&bytes);

    if let Some(cache) = cache_path {
        match read_snapshot(cache, &hash) {
            Ok(idx) => {
                info!(target: "kb", path = %cache.display(), entries = idx.len(), "loaded KB index snapshot");
                return Ok((idx, hash));
            }
            Err(SnapshotMiss::Missing) => debug!(target: "kb", path = %cache.display(), "no KB index snapshot yet"),
            Err(miss) => warn!(target: "kb", path = %cache.display(), reason = %miss, "discarding KB index snapshot"),
        }
    }

    let root: Value = serde_json::from_slice(&bytes).map_err(|source| KbError::Parse {
        path: kb_path.to_path_buf(),
        source,
    })?;
    let songs = parse_songs(root).ok_or_else(|| KbError::UnexpectedShape {
        path: kb_path.to_path_buf(),
    })?;
    let idx = KnowledgeBaseIndex::build(songs);
    telemetry::index_rebuild();
    info!(target: "kb", path = %kb_path.display(), entries = idx.len(), "built KB index from source");

    if let Some(cache) = cache_path {
        if let Err(e) = write_snapshot(cache, &hash, &idx) {
            warn!(target: "kb", path = %cache.display(), error = %e, "failed to write KB index snapshot");
        }
    }
    Ok((idx, hash))
}

fn read_snapshot(path: &Path, expected_hash: &str) -> Result<KnowledgeBaseIndex, SnapshotMiss> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SnapshotMiss::Missing),
        Err(e) => return Err(SnapshotMiss::Unreadable(e.to_string())),
    };
    let snap: IndexSnapshot =
        serde_json::from_slice(&bytes).map_err(|e| SnapshotMiss::Unreadable(e.to_string()))?;
    if snap.version != SNAPSHOT_VERSION || snap.kb_sha256 != expected_hash {
        return Err(SnapshotMiss::Stale);
    }

    let n = snap.entries.len();
    let dangling = snap.titles.iter().flat_map(|t| t.ids.iter()).chain(snap.keys.iter().map(|k| &k.id));
    if let Some(bad) = dangling.copied().find(|&id| id >= n) {
        return Err(SnapshotMiss::Unreadable(format!("entry id {bad} out of range ({n} entries)")));
    }

    let titles: Vec<String> = snap.titles.iter().map(|t| t.title.clone()).collect();
    let by_title: HashMap<String, Vec<usize>> = snap.titles.into_iter().map(|t| (t.title, t.ids)).collect();
    let by_title_artist: HashMap<(String, String), usize> =
        snap.keys.into_iter().map(|k| ((k.title, k.artist), k.id)).collect();

    Ok(KnowledgeBaseIndex::from_raw(snap.entries, titles, by_title, by_title_artist))
}

fn write_snapshot(path: &Path, hash: &str, idx: &KnowledgeBaseIndex) -> anyhow::Result<()> {
    let titles = idx
        .titles
        .iter()
        .map(|t| TitleIds {
            title: t.clone(),
            ids: idx.by_title.get(t).cloned().unwrap_or_default(),
        })
        .collect();
    let mut keys: Vec<KeyId> = idx
        .by_title_artist
        .iter()
        .map(|((title, artist), &id)| KeyId {
            title: title.clone(),
            artist: artist.clone(),
            id,
        })
        .collect();
    keys.sort_by(|a, b| (&a.title, &a.artist).cmp(&(&b.title, &b.artist)));

    let snap = IndexSnapshot {
        version: SNAPSHOT_VERSION,
        kb_sha256: hash.to_string(),
        entries: idx.entries.iter().map(|e| (**e).clone()).collect(),
        titles,
        keys,
    };
    fsutil::atomic_write_json(path, &snap)
}

/// A KB file plus its current index, rebuilt only when the content hash moves.
#[derive(Debug)]
pub struct KbSource {
    kb_path: PathBuf,
    cache_path: Option<PathBuf>,
    params: FuzzyParams,
    hash: String,
    index: KnowledgeBaseIndex,
}

impl KbSource {
    pub fn open(
        kb_path: impl Into<PathBuf>,
        cache_path: Option<PathBuf>,
        params: FuzzyParams,
    ) -> Result<Self, KbError> {
        let kb_path = kb_path.into();
        let (index, hash) = load_or_build_index(&kb_path, cache_path.as_deref())?;
        Ok(Self {
            kb_path,
            cache_path,
            index: index.with_params(params.clone()),
            params,
            hash,
        })
    }

    pub fn index(&self) -> &KnowledgeBaseIndex {
        &self.index
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn path(&self) -> &Path {
        &self.kb_path
    }

    /// Rebuild when the file's SHA-256 changed. `Ok(true)` means the index was
    /// replaced; on error the previous index stays in place.
    pub fn reload_if_changed(&mut self) -> Result<bool, KbError> {
        let current = fsutil::sha256_file(&self.kb_path).map_err(|source| KbError::Unavailable {
            path: self.kb_path.clone(),
            source,
        })?;
        if current == self.hash {
            return Ok(false);
        }
        let (index, hash) = load_or_build_index(&self.kb_path, self.cache_path.as_deref())?;
        info!(target: "kb", entries = index.len(), "KB changed, index reloaded");
        self.index = index.with_params(self.params.clone());
        self.hash = hash;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_kb(path: &Path, songs: Value) {
        fs::write(path, serde_json::to_vec(&songs).unwrap()).unwrap();
    }

    #[test]
    fn snapshot_round_trip_is_used_when_hash_matches() {
        let dir = tempfile::tempdir().unwrap();
        let kb = dir.path().join("songs_kb.json");
        let cache = dir.path().join("cache/kb_index.json");
        write_kb(&kb, json!([{"title": "Echo", "artist": "A", "aliases": ["Echoes"]}]));

        let (built, hash) = load_or_build_index(&kb, Some(&cache)).unwrap();
        assert!(cache.exists());

        // Tamper with the snapshot but keep the hash: the loader must trust it.
        let mut snap: Value = serde_json::from_slice(&fs::read(&cache).unwrap()).unwrap();
        snap["entries"][0]["artist"] = json!("From Snapshot");
        fs::write(&cache, serde_json::to_vec(&snap).unwrap()).unwrap();

        let (loaded, hash2) = load_or_build_index(&kb, Some(&cache)).unwrap();
        assert_eq!(hash, hash2);
        assert_eq!(loaded.len(), built.len());
        assert_eq!(loaded.exact("Echoes", Some("A")).unwrap().artist, "From Snapshot");
    }

    #[test]
    fn stale_or_corrupt_snapshot_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let kb = dir.path().join("songs_kb.json");
        let cache = dir.path().join("kb_index.json");
        write_kb(&kb, json!([{"title": "Echo", "artist": "A"}]));
        load_or_build_index(&kb, Some(&cache)).unwrap();

        write_kb(&kb, json!({"songs": [{"title": "Other", "artist": "B"}]}));
        let (idx, hash) = load_or_build_index(&kb, Some(&cache)).unwrap();
        assert!(idx.exact("Echo", Some("A")).is_none());
        assert!(idx.exact("Other", Some("B")).is_some());
        let snap: Value = serde_json::from_slice(&fs::read(&cache).unwrap()).unwrap();
        assert_eq!(snap["kb_sha256"], json!(hash));

        fs::write(&cache, b"{ definitely not json").unwrap();
        let (idx, _) = load_or_build_index(&kb, Some(&cache)).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn kb_source_reloads_only_on_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let kb = dir.path().join("songs_kb.json");
        write_kb(&kb, json!([{"title": "Echo", "artist": "A"}]));

        let mut src = KbSource::open(&kb, None, FuzzyParams::default()).unwrap();
        assert!(!src.reload_if_changed().unwrap());

        write_kb(&kb, json!([{"title": "Echo", "artist": "A"}, {"title": "New", "artist": "B"}]));
        assert!(src.reload_if_changed().unwrap());
        assert_eq!(src.index().len(), 2);

        fs::remove_file(&kb).unwrap();
        assert!(matches!(src.reload_if_changed(), Err(KbError::Unavailable { .. })));
        assert_eq!(src.index().len(), 2);
    }
}
