//! End-to-end pipeline: now-playing text in, reaction out.
//!
//! parse → cached KB lookup → display/scoring tags → engine decision →
//! memory update + commentary tails → review logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, GenresSettings},
    decision::ReactionDecision,
    kb::{KbSource, KnowledgeBaseIndex, MatchKind, SongEntry},
    memory::{commentary::Commentary, MemoryStore},
    normalize::{norm_tag_for_scoring, normalize, normalize_opt},
    nowplaying::parse_title_artist,
    react::{DecisionInput, RandomSource, ReactionEngine},
    result_cache::ResultCache,
    review::ReviewLog,
    special_version::SpecialVersionDetector,
    telemetry,
};

/// Cached outcome of one KB lookup.
#[derive(Debug, Clone)]
struct KbHit {
    entry: Arc<SongEntry>,
    kind: MatchKind,
    add_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedSong {
    pub title: String,
    pub artist: String,
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionOutcome {
    pub title: String,
    pub artist: Option<String>,
    pub matched: Option<MatchedSong>,
    pub genres_text: String,
    /// Tags the engine scored on.
    pub tags: Vec<String>,
    pub context: String,
    pub decision: ReactionDecision,
    pub tails: Vec<String>,
    /// Decision text with tails appended.
    pub text: String,
    /// Times this song has been recorded in memory, including this one.
    pub seen: u64,
}

pub struct Reactor {
    kb: Option<KbSource>,
    engine: ReactionEngine,
    memory: MemoryStore,
    commentary: Commentary,
    review: ReviewLog,
    special_versions: SpecialVersionDetector,
    genres: GenresSettings,
    cache: ResultCache<(String, String), Option<KbHit>>,
    rng: RandomSource,
    updates: u64,
}

impl Reactor {
    /// Wire everything from an app config. A missing KB is only fatal with
    /// `kb_required`; every other component degrades to defaults.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let kb_path = cfg.resolve(&cfg.songs_kb_path);
        let snapshot = cfg.kb_index_cache_path.as_ref().map(|p| cfg.resolve(p));
        let kb = match KbSource::open(kb_path.clone(), snapshot, cfg.fuzzy.clone()) {
            Ok(kb) => {
                info!(target: "reactor", path = %kb_path.display(), entries = kb.index().len(), "songs KB loaded");
                Some(kb)
            }
            Err(e) if cfg.kb_required => {
                return Err(anyhow::Error::new(e).context("loading songs KB"));
            }
            Err(e) => {
                warn!(target: "reactor", error = %e, "songs KB unavailable, every song is unknown");
                None
            }
        };

        let engine = ReactionEngine::load(&cfg.resolve(&cfg.reactions_path), cfg.base_dir());
        let memory = MemoryStore::from_settings(&cfg.memory, cfg.base_dir());

        Ok(Self {
            kb,
            engine,
            memory,
            commentary: Commentary::new(&cfg.memory.commentary),
            review: ReviewLog::new(&cfg.review, cfg.base_dir()),
            special_versions: SpecialVersionDetector::new(&cfg.special_version_tags),
            genres: cfg.genres.clone(),
            cache: ResultCache::new(cfg.result_cache_size),
            rng: RandomSource::from_entropy(),
            updates: 0,
        })
    }

    /// Replace the random source (seeded runs, tests).
    pub fn with_rng(mut self, rng: RandomSource) -> Self {
        self.rng = rng;
        self
    }

    pub fn engine(&self) -> &ReactionEngine {
        &self.engine
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn kb_index(&self) -> Option<&KnowledgeBaseIndex> {
        self.kb.as_ref().map(KbSource::index)
    }

    pub fn cached_lookups(&self) -> usize {
        self.cache.len()
    }

    /// `None` when the text carries no title.
    pub fn react(&mut self, raw: &str) -> Option<ReactionOutcome> {
        self.react_at(raw, Utc::now())
    }

    pub fn react_at(&mut self, raw: &str, now: DateTime<Utc>) -> Option<ReactionOutcome> {
        let (title, artist) = parse_title_artist(raw);
        let title = title?;
        Some(self.react_to_at(&title, artist.as_deref(), now))
    }

    pub fn react_to(&mut self, title: &str, artist: Option<&str>) -> ReactionOutcome {
        self.react_to_at(title, artist, Utc::now())
    }

    pub fn react_to_at(&mut self, title: &str, artist: Option<&str>, now: DateTime<Utc>) -> ReactionOutcome {
        let first_update = self.updates == 0;
        self.updates += 1;

        let t_norm = normalize(title);
        let a_norm = normalize_opt(artist);
        let hit = self.lookup(title, artist, &t_norm, &a_norm, now);
        let specials = self.special_versions.detect(title);

        let kb_tags: Vec<String> = hit
            .iter()
            .flat_map(|h| h.entry.tags.iter().chain(&h.add_tags))
            .cloned()
            .collect();

        let mut display = Vec::new();
        push_unique(&mut display, kb_tags.iter().cloned());
        if self.genres.show_special_version {
            let prefix = &self.genres.special_version_prefix;
            push_unique(&mut display, specials.iter().map(|s| format!("{prefix}{s}")));
        }
        let genres_text = self.genres.text_for(&display, true);

        let scoring: Vec<String> = kb_tags
            .iter()
            .chain(&specials)
            .map(|t| norm_tag_for_scoring(t))
            .filter(|t| !t.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let unique_key = format!("{t_norm}|{a_norm}");
        let artist_text = artist.unwrap_or("");
        let input = DecisionInput {
            title,
            artist: artist_text,
            genres_text: &genres_text,
            tags: &scoring,
            unique_key: &unique_key,
        };
        let decision = self.engine.decide_at(&input, &mut self.rng, now);
        let context = self.engine.context().active_name();

        let mut tails = Vec::new();
        if !decision.is_silent() && self.memory.is_enabled() {
            self.memory
                .update_at(&unique_key, title, artist_text, &context, decision.bucket, &scoring, now);
            self.memory.save();
            tails = self
                .commentary
                .tails(&self.memory, &unique_key, &context, decision.bucket, &mut self.rng);
        }

        if hit.is_none() {
            self.review.log_missing(title, artist, first_update, now);
        }

        let text = std::iter::once(decision.text.as_str())
            .chain(tails.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        debug!(target: "reactor", title, artist = artist_text, bucket = %decision.bucket, ctx = %context, "reaction");

        ReactionOutcome {
            title: title.to_string(),
            artist: artist.map(str::to_string),
            matched: hit.as_ref().map(|h| MatchedSong {
                title: h.entry.title.clone(),
                artist: h.entry.artist.clone(),
                kind: h.kind.as_str(),
            }),
            genres_text,
            tags: scoring,
            context,
            seen: self.memory.seen_count(&unique_key),
            decision,
            tails,
            text,
        }
    }

    /// Rebuild the index when the KB file changed; clears cached lookups.
    pub fn reload_kb_if_changed(&mut self) -> bool {
        let Some(kb) = self.kb.as_mut() else {
            return false;
        };
        match kb.reload_if_changed() {
            Ok(true) => {
                self.cache.clear();
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(target: "reactor", error = %e, "KB reload failed, keeping previous index");
                false
            }
        }
    }

    /// Exact then fuzzy, behind the result cache. Misses are cached too.
    fn lookup(&mut self, title: &str, artist: Option<&str>, t_norm: &str, a_norm: &str, now: DateTime<Utc>) -> Option<KbHit> {
        let key = (t_norm.to_string(), a_norm.to_string());
        if let Some(cached) = self.cache.get(&key) {
            telemetry::result_cache(true);
            return cached;
        }
        telemetry::result_cache(false);

        let mut artist_sim = 1.0;
        let hit = match &self.kb {
            None => {
                telemetry::kb_lookup("no_kb");
                None
            }
            Some(kb) => {
                let idx = kb.index();
                match idx.lookup(title, artist) {
                    Some(m) => {
                        telemetry::kb_lookup(m.kind.as_str());
                        artist_sim = idx.artist_similarity(artist, &m);
                        Some(KbHit {
                            add_tags: m.notes.add_tags.iter().cloned().collect(),
                            entry: m.entry,
                            kind: m.kind,
                        })
                    }
                    None => {
                        telemetry::kb_lookup("miss");
                        None
                    }
                }
            }
        };

        if let (Some(h), Some(observed)) = (&hit, artist) {
            self.review
                .log_artist_not_sure(title, observed, &h.entry, artist_sim, now);
        }

        self.cache.insert(key, hit.clone());
        hit
    }
}

/// Append items not already present (case-insensitive), keeping first spelling.
fn push_unique(out: &mut Vec<String>, items: impl Iterator<Item = String>) {
    for item in items {
        let item = item.trim().to_string();
        if item.is_empty() || out.iter().any(|o| o.eq_ignore_ascii_case(&item)) {
            continue;
        }
        out.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_unique_keeps_order_and_first_spelling() {
        let mut out = vec!["Pop".to_string()];
        push_unique(
            &mut out,
            ["pop", " Nightcore ", "", "NIGHTCORE", "sped up"].into_iter().map(String::from),
        );
        assert_eq!(out, vec!["Pop", "Nightcore", "sped up"]);
    }
}
