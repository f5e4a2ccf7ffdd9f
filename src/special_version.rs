//! Version-qualifier tags found in titles ("Nightcore", "sped up", "8D audio").
//!
//! Config maps a tag name to one phrase or a list of phrases. Each phrase is
//! split on whitespace and compiled to `\btok1[\s\-]*tok2…\b`
//! (case-insensitive), so `"sped up"` also matches `"Sped-Up"` and `"spedup"`.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// One phrase or a list of phrases.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Phrases {
    One(String),
    Many(Vec<String>),
}

impl Phrases {
    fn iter(&self) -> Box<dyn Iterator<Item = &String> + '_> {
        match self {
            Phrases::One(s) => Box::new(std::iter::once(s)),
            Phrases::Many(v) => Box::new(v.iter()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpecialVersionDetector {
    rules: Vec<(String, Vec<Regex>)>,
}

impl SpecialVersionDetector {
    pub fn new(tags: &BTreeMap<String, Phrases>) -> Self {
        let mut rules = Vec::with_capacity(tags.len());
        for (name, phrases) in tags {
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            let patterns: Vec<Regex> = phrases.iter().filter_map(|p| compile_phrase(&name, p)).collect();
            if !patterns.is_empty() {
                rules.push((name, patterns));
            }
        }
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Tag names whose phrases occur in `title`, each at most once, in tag-name order.
    pub fn detect(&self, title: &str) -> Vec<String> {
        if title.trim().is_empty() {
            return Vec::new();
        }
        self.rules
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|re| re.is_match(title)))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn compile_phrase(tag: &str, phrase: &str) -> Option<Regex> {
    let tokens: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    if tokens.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)\b{}\b", tokens.join(r"[\s\-]*"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(target: "special_version", tag, phrase, error = %e, "skipping special version phrase");
            None
        }
    }
}
