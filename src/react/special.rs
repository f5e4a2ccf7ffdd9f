//! Special rules: fixed reactions for specific songs.
//!
//! Conditions (all case-insensitive substrings of the normalized title/artist):
//! - `title_contains`:  every phrase must occur in the title
//! - `artist_contains`: every phrase must occur in the artist
//!
//! An empty list is no condition. Actions:
//! - `react`:        template rendered immediately, bypassing scoring
//! - `force_bucket`: bucket for the rendered `react`, or for scoring when
//!                   `react` is empty
//!
//! Rules are checked in file order; the first match wins.

use serde::Deserialize;

use crate::decision::Bucket;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecialRule {
    pub title_contains: Vec<String>,
    pub artist_contains: Vec<String>,
    pub react: String,
    pub force_bucket: Option<String>,
}

impl SpecialRule {
    /// Lower-case and trim the phrases, dropping empty ones.
    pub fn normalized(mut self) -> Self {
        let clean = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        self.title_contains = clean(self.title_contains);
        self.artist_contains = clean(self.artist_contains);
        self.react = self.react.trim().to_string();
        self
    }

    pub fn matches(&self, title_norm: &str, artist_norm: &str) -> bool {
        all_contained(title_norm, &self.title_contains) && all_contained(artist_norm, &self.artist_contains)
    }

    /// Parsed `force_bucket`; unknown names are ignored.
    pub fn forced_bucket(&self) -> Option<Bucket> {
        self.force_bucket.as_deref().and_then(Bucket::parse)
    }
}

pub fn find_special<'a>(rules: &'a [SpecialRule], title_norm: &str, artist_norm: &str) -> Option<&'a SpecialRule> {
    rules.iter().find(|r| r.matches(title_norm, artist_norm))
}

fn all_contained(text: &str, phrases: &[String]) -> bool {
    phrases.iter().all(|p| text.contains(p.as_str()))
}
