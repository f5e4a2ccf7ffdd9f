//! Split a raw "now playing" blob into `(title, artist)`.
//!
//! Accepted shapes, tried in order:
//! 1. JSON object: `{"title", "artist"}` or `{"track": {"title", "artist"}}`
//! 2. two or more non-empty lines: first = title, second = artist
//! 3. one line with a dash-like separator: `Title — Artist`
//! 4. `Title by Artist` (case-insensitive)
//! 5. anything else: the whole line is the title
//!
//! HTML entities are decoded first (widgets and web scrapers love `&amp;`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// First separator found wins; left side is the title.
pub const SEPARATORS: [&str; 6] = [" — ", " – ", " - ", " ~ ", " | ", " • "];

static RE_BY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+by\s+(.+)$").expect("by regex"));

/// Parse a now-playing string. Returns `(None, None)` for blank input.
pub fn parse_title_artist(raw: &str) -> (Option<String>, Option<String>) {
    let decoded = html_escape::decode_html_entities(raw);
    let s = decoded.trim();
    if s.is_empty() {
        return (None, None);
    }

    if s.starts_with('{') {
        if let Some(parsed) = parse_json(s) {
            return parsed;
        }
    }

    let lines: Vec<&str> = s.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() >= 2 {
        return (non_empty(lines[0]), non_empty(lines[1]));
    }
    let line = lines.first().copied().unwrap_or(s);

    for sep in SEPARATORS {
        if let Some((left, right)) = line.split_once(sep) {
            let title = non_empty(left);
            if title.is_some() {
                return (title, non_empty(right));
            }
        }
    }

    if let Some(caps) = RE_BY.captures(line) {
        return (non_empty(&caps[1]), non_empty(&caps[2]));
    }

    (non_empty(line), None)
}

fn parse_json(s: &str) -> Option<(Option<String>, Option<String>)> {
    let v: Value = serde_json::from_str(s).ok()?;
    let obj = v.as_object()?;
    let track = obj.get("track").and_then(Value::as_object);
    let pick = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .and_then(non_empty)
            .or_else(|| track.and_then(|t| t.get(key)).and_then(Value::as_str).and_then(non_empty))
    };
    let title = pick("title")?;
    Some((Some(title), pick("artist")))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}
