//! Exact and fuzzy lookup over the song KB.
//!
//! Entries live once in `entries` (`Arc`-shared); the maps hold ids into it,
//! so an alias key and the canonical key resolve to the very same entry.
//!
//! Indexed keys per entry:
//! - `(title, artist)`
//! - `(alias, artist)` for each alias
//! - `(title, variant)` for each alias-artist / confirmed artist from notes

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use super::{
    notes::{self, NotesMetadata},
    similarity::SimilarityMetric,
    SongEntry,
};
use crate::normalize::{normalize, normalize_opt};

/// Tuning knobs for fuzzy matching. Defaults are the calibrated values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyParams {
    pub metric: SimilarityMetric,
    pub title_weight: f64,
    pub artist_weight: f64,
    pub long_gap: usize,
    pub long_gap_penalty: f64,
    pub short_gap: usize,
    pub short_gap_penalty: f64,
    pub alias_boost: f64,
    pub min_title_sim: f64,
    pub min_artist_sim: f64,
    pub title_only_min_sim: f64,
    pub max_candidates: usize,
    pub prefix_len: usize,
    pub short_prefix_len: usize,
}

impl Default for FuzzyParams {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::RatcliffObershelp,
            title_weight: 0.88,
            artist_weight: 0.12,
            long_gap: 6,
            long_gap_penalty: 0.03,
            short_gap: 3,
            short_gap_penalty: 0.02,
            alias_boost: 0.01,
            min_title_sim: 0.935,
            min_artist_sim: 0.66,
            title_only_min_sim: 0.97,
            max_candidates: 220,
            prefix_len: 8,
            short_prefix_len: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy => "fuzzy",
        }
    }
}

/// A resolved KB entry plus its parsed notes.
#[derive(Debug, Clone)]
pub struct Match {
    pub id: usize,
    pub entry: Arc<SongEntry>,
    pub kind: MatchKind,
    pub notes: NotesMetadata,
}

/// Best fuzzy candidate with its component scores (before acceptance).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyCandidate {
    pub id: usize,
    pub score: f64,
    pub title_sim: f64,
    pub artist_sim: f64,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBaseIndex {
    pub(crate) entries: Vec<Arc<SongEntry>>,
    pub(crate) notes: Vec<NotesMetadata>,
    /// Normalized titles in first-insertion order (drives the fuzzy scan).
    pub(crate) titles: Vec<String>,
    pub(crate) by_title: HashMap<String, Vec<usize>>,
    pub(crate) by_title_artist: HashMap<(String, String), usize>,
    pub(crate) params: FuzzyParams,
}

impl KnowledgeBaseIndex {
    pub fn build<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = SongEntry>,
    {
        let mut idx = Self::default();
        for entry in entries {
            idx.insert(entry);
        }
        debug!(
            target: "kb",
            entries = idx.entries.len(),
            titles = idx.titles.len(),
            keys = idx.by_title_artist.len(),
            "built KB index"
        );
        idx
    }

    /// Reassemble from persisted maps; notes are re-derived from the entries.
    pub(crate) fn from_raw(
        entries: Vec<SongEntry>,
        titles: Vec<String>,
        by_title: HashMap<String, Vec<usize>>,
        by_title_artist: HashMap<(String, String), usize>,
    ) -> Self {
        let notes = entries.iter().map(|e| notes::parse(&e.notes)).collect();
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
            notes,
            titles,
            by_title,
            by_title_artist,
            params: FuzzyParams::default(),
        }
    }

    pub fn with_params(mut self, params: FuzzyParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &FuzzyParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<SongEntry>] {
        &self.entries
    }

    pub fn notes(&self, id: usize) -> Option<&NotesMetadata> {
        self.notes.get(id)
    }

    /// Number of entries indexed under a normalized title.
    pub fn candidates_for_title(&self, title: &str) -> usize {
        self.by_title.get(&normalize(title)).map_or(0, Vec::len)
    }

    fn insert(&mut self, entry: SongEntry) {
        if normalize(&entry.title).is_empty() {
            return;
        }
        let id = self.entries.len();
        let meta = notes::parse(&entry.notes);

        self.add_key(id, &entry.title, &entry.artist);
        for alias in &entry.aliases {
            self.add_key(id, alias, &entry.artist);
        }
        for variant in meta.artist_variants() {
            self.add_key(id, &entry.title, variant);
        }

        self.entries.push(Arc::new(entry));
        self.notes.push(meta);
    }

    fn add_key(&mut self, id: usize, title: &str, artist: &str) {
        let t = normalize(title);
        if t.is_empty() {
            return;
        }
        let a = normalize(artist);

        if !self.by_title.contains_key(&t) {
            self.titles.push(t.clone());
        }
        let ids = self.by_title.entry(t.clone()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        if !a.is_empty() {
            self.by_title_artist.insert((t, a), id);
        }
    }

    fn resolve(&self, id: usize, kind: MatchKind) -> Option<Match> {
        Some(Match {
            id,
            entry: Arc::clone(self.entries.get(id)?),
            kind,
            notes: self.notes.get(id).cloned().unwrap_or_default(),
        })
    }

    /// Exact lookup on normalized keys, then unambiguous title-only resolution.
    pub fn exact(&self, title: &str, artist: Option<&str>) -> Option<Arc<SongEntry>> {
        self.exact_id(title, artist).map(|id| Arc::clone(&self.entries[id]))
    }

    fn exact_id(&self, title: &str, artist: Option<&str>) -> Option<usize> {
        let t = normalize(title);
        if t.is_empty() {
            return None;
        }
        let a = normalize_opt(artist);
        if !a.is_empty() {
            if let Some(&id) = self.by_title_artist.get(&(t.clone(), a)) {
                return Some(id);
            }
        }

        let ids = self.by_title.get(&t)?;
        if let [only] = ids.as_slice() {
            return Some(*only);
        }

        let allowed: Vec<usize> = ids
            .iter()
            .copied()
            .filter(|&id| self.notes[id].allow_title_only)
            .collect();
        let cap = allowed
            .iter()
            .map(|&id| self.notes[id].max_ambiguous_candidates)
            .min()?
            .max(1);
        if ids.len() <= cap {
            allowed.first().copied()
        } else {
            None
        }
    }

    /// Fuzzy lookup; `None` unless the best candidate clears the thresholds.
    pub fn fuzzy(&self, title: &str, artist: Option<&str>) -> Option<Arc<SongEntry>> {
        self.fuzzy_id(title, artist).map(|id| Arc::clone(&self.entries[id]))
    }

    /// Acceptance compares `title_sim`, the best ratio over the title and its aliases.
    fn fuzzy_id(&self, title: &str, artist: Option<&str>) -> Option<usize> {
        let best = self.fuzzy_best(title, artist)?;
        let p = &self.params;
        if best.title_sim >= p.min_title_sim && best.artist_sim >= p.min_artist_sim {
            return Some(best.id);
        }

        let meta = &self.notes[best.id];
        if meta.allow_title_only && best.title_sim >= p.title_only_min_sim {
            let same_title = self.candidates_for_title(&self.entries[best.id].title);
            if same_title <= meta.max_ambiguous_candidates.max(1) {
                return Some(best.id);
            }
        }
        None
    }

    /// Highest-scoring candidate regardless of the acceptance thresholds.
    pub fn fuzzy_best(&self, title: &str, artist: Option<&str>) -> Option<FuzzyCandidate> {
        let t = normalize(title);
        if t.is_empty() {
            return None;
        }
        let a = normalize_opt(artist);

        let mut best: Option<FuzzyCandidate> = None;
        for id in self.candidate_ids(&t) {
            let c = self.score_candidate(id, &t, &a);
            let current = best.map_or(0.0, |b| b.score);
            if c.score > current {
                best = Some(c);
            }
        }
        best
    }

    fn candidate_ids(&self, t: &str) -> Vec<usize> {
        let p = &self.params;
        let prefix: String = t.chars().take(p.prefix_len).collect();
        let mut out = Vec::new();
        for tt in &self.titles {
            let short: String = tt.chars().take(p.short_prefix_len).collect();
            if tt.starts_with(&prefix) || prefix.starts_with(&short) {
                if let Some(ids) = self.by_title.get(tt) {
                    out.extend_from_slice(ids);
                }
            }
            if out.len() > p.max_candidates {
                break;
            }
        }
        out
    }

    fn score_candidate(&self, id: usize, t: &str, a: &str) -> FuzzyCandidate {
        let p = &self.params;
        let e = &self.entries[id];

        let et = normalize(&e.title);
        let alias_sims: Vec<f64> = e
            .aliases
            .iter()
            .map(|x| normalize(x))
            .filter(|x| !x.is_empty())
            .map(|x| p.metric.ratio(t, &x))
            .collect();
        let title_sim = alias_sims
            .iter()
            .copied()
            .fold(p.metric.ratio(t, &et), f64::max);

        let gap = t.chars().count().abs_diff(et.chars().count());
        let length_penalty = if gap >= p.long_gap {
            p.long_gap_penalty
        } else if gap >= p.short_gap {
            p.short_gap_penalty
        } else {
            0.0
        };

        let alias_won = title_sim < 0.999 && alias_sims.iter().any(|&s| s == title_sim);
        let alias_boost = if alias_won { p.alias_boost } else { 0.0 };

        let artist_sim = self.artist_sim_for(id, a);
        let score = title_sim * p.title_weight + artist_sim * p.artist_weight - length_penalty + alias_boost;

        FuzzyCandidate {
            id,
            score,
            title_sim,
            artist_sim,
        }
    }

    /// 1.0 for an empty query artist; else the best ratio over the entry
    /// artist and its note variants.
    fn artist_sim_for(&self, id: usize, a: &str) -> f64 {
        if a.is_empty() {
            return 1.0;
        }
        let metric = self.params.metric;
        let primary = metric.ratio(a, &normalize(&self.entries[id].artist));
        self.notes[id]
            .artist_variants()
            .map(|v| metric.ratio(a, &normalize(v)))
            .fold(primary, f64::max)
    }

    /// `exact` then `fuzzy`.
    pub fn lookup(&self, title: &str, artist: Option<&str>) -> Option<Match> {
        if let Some(id) = self.exact_id(title, artist) {
            return self.resolve(id, MatchKind::Exact);
        }
        self.fuzzy_id(title, artist)
            .and_then(|id| self.resolve(id, MatchKind::Fuzzy))
    }

    /// How well an observed artist fits a match (1.0 when nothing was observed).
    pub fn artist_similarity(&self, observed: Option<&str>, m: &Match) -> f64 {
        self.artist_sim_for(m.id, &normalize_opt(observed))
    }
}
