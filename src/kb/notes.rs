//! Per-entry `notes` metadata.
//!
//! The field is dual-format. A JSON object (the whole trimmed text wrapped in
//! `{}`) may carry `artist_aliases`, `add_tags`, `allow_title_only` and
//! `max_ambiguous_candidates`. Independently of that, free text is scanned for
//! `Confirmed: a, b` / `Not confirmed: c` labels (German `Bestätigt:` /
//! `Nicht bestätigt:` too). Both paths merge into one [`NotesMetadata`].
//! Parsing never fails; garbage yields the defaults.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub const DEFAULT_MAX_AMBIGUOUS_CANDIDATES: usize = 3;

/// Longer labels come first so `Not confirmed:` is never read as `confirmed:`.
static RE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(not\s*confirmed|nicht\s*bestätigt|confirmed|bestätigt)\s*:")
        .expect("notes label regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesMetadata {
    pub artist_aliases: BTreeSet<String>,
    pub confirm_artists: BTreeSet<String>,
    pub deny_artists: BTreeSet<String>,
    pub allow_title_only: bool,
    pub max_ambiguous_candidates: usize,
    pub add_tags: BTreeSet<String>,
}

impl Default for NotesMetadata {
    fn default() -> Self {
        Self {
            artist_aliases: BTreeSet::new(),
            confirm_artists: BTreeSet::new(),
            deny_artists: BTreeSet::new(),
            allow_title_only: false,
            max_ambiguous_candidates: DEFAULT_MAX_AMBIGUOUS_CANDIDATES,
            add_tags: BTreeSet::new(),
        }
    }
}

impl NotesMetadata {
    /// Alias artists plus confirmed artists, the extra artist spellings an
    /// entry is indexed and scored under.
    pub fn artist_variants(&self) -> impl Iterator<Item = &String> {
        self.artist_aliases.iter().chain(self.confirm_artists.iter())
    }
}

/// Parse a notes string. Empty or unparseable input yields the defaults.
pub fn parse(notes: &str) -> NotesMetadata {
    let mut meta = NotesMetadata::default();
    let trimmed = notes.trim();
    if trimmed.is_empty() {
        return meta;
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
            apply_json(&mut meta, &obj);
        }
    }

    scan_labels(&mut meta, notes);
    meta
}

fn apply_json(meta: &mut NotesMetadata, obj: &Map<String, Value>) {
    if let Some(v) = obj.get("artist_aliases") {
        meta.artist_aliases.extend(string_list(v));
    }
    if let Some(v) = obj.get("add_tags") {
        meta.add_tags.extend(string_list(v));
    }
    if let Some(v) = obj.get("allow_title_only") {
        meta.allow_title_only = truthy(v);
    }
    if let Some(n) = obj.get("max_ambiguous_candidates").and_then(as_count) {
        meta.max_ambiguous_candidates = n;
    }
}

/// Every label occurrence owns the text up to the next label or end of line.
fn scan_labels(meta: &mut NotesMetadata, text: &str) {
    for line in text.lines() {
        let labels: Vec<_> = RE_LABEL.captures_iter(line).collect();
        for (i, caps) in labels.iter().enumerate() {
            let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = labels
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(line.len());
            let value = &line[whole.end()..end];

            let label = label.as_str().to_lowercase();
            let target = if label.starts_with("not") || label.starts_with("nicht") {
                &mut meta.deny_artists
            } else {
                &mut meta.confirm_artists
            };
            target.extend(split_names(value));
        }
    }
}

fn split_names(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split([',', ';'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

fn string_list(v: &Value) -> Vec<String> {
    let items: Vec<&Value> = match v {
        Value::Array(a) => a.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|x| match x {
            Value::String(s) => Some(s.trim().to_lowercase()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

fn as_count(v: &Value) -> Option<usize> {
    let n = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(n.max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_and_garbage_yield_defaults() {
        assert_eq!(parse(""), NotesMetadata::default());
        assert_eq!(parse("{not json}"), NotesMetadata::default());
        assert_eq!(parse("just a remark"), NotesMetadata::default());
    }

    #[test]
    fn json_fields() {
        let m = parse(r#"{"artist_aliases":["Ed","  E. Sheeran "],"add_tags":"Acoustic","allow_title_only":true,"max_ambiguous_candidates":"2"}"#);
        assert_eq!(m.artist_aliases, set(&["e. sheeran", "ed"]));
        assert_eq!(m.add_tags, set(&["acoustic"]));
        assert!(m.allow_title_only);
        assert_eq!(m.max_ambiguous_candidates, 2);
    }

    #[test]
    fn free_text_labels_are_truncated_at_next_label() {
        let m = parse("Confirmed: Alice, Bob Not confirmed: Carol; Dave");
        assert_eq!(m.confirm_artists, set(&["alice", "bob"]));
        assert_eq!(m.deny_artists, set(&["carol", "dave"]));
    }

    #[test]
    fn negated_label_alone_does_not_confirm() {
        let m = parse("Nicht bestätigt: Eve");
        assert!(m.confirm_artists.is_empty());
        assert_eq!(m.deny_artists, set(&["eve"]));
    }

    #[test]
    fn german_labels_and_multiline() {
        let m = parse("Bestätigt: Frank\nsome remark\nNicht  bestätigt : Grace");
        assert_eq!(m.confirm_artists, set(&["frank"]));
        assert_eq!(m.deny_artists, set(&["grace"]));
    }

    #[test]
    fn free_text_applies_when_json_fails() {
        let m = parse("{\"artist_aliases\":[\"x\"],\n\"hint\":\"\"\nConfirmed: Y\n}");
        // braces wrap the whole text but the body is not valid JSON
        assert!(m.artist_aliases.is_empty());
        assert_eq!(m.confirm_artists, set(&["y"]));

        let m = parse(r#"{"artist_aliases":["x"]}"#);
        let variants: Vec<_> = m.artist_variants().cloned().collect();
        assert_eq!(variants, vec!["x".to_string()]);
    }
}
