//! # Normalizer
//! Canonical keys for titles and artists.
//!
//! Every lookup structure in the crate is keyed by the output of [`normalize`],
//! so the function has to be total (any input, no panics) and idempotent.
//!
//! Steps: lower-case, trim, drop `(...)`/`[...]` groups, `&` → `and`,
//! remove `feat.`/`featuring` tokens, non-word characters → space, collapse
//! runs of whitespace.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\(\[].*?[\)\]]").expect("parens regex"));
static RE_FEAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfeat\.?\b|\bfeaturing\b").expect("feat regex"));
static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("non-word regex"));
static RE_MULTI_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("whitespace regex"));

/// Normalize a raw title or artist into its canonical key form.
///
/// ```
/// use nowplaying_reactor::normalize::normalize;
/// assert_eq!(normalize("Hello (feat. X)  "), "hello");
/// assert_eq!(normalize("Simon & Garfunkel"), "simon and garfunkel");
/// ```
pub fn normalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut out = RE_PARENS.replace_all(lower.trim(), "").into_owned();
    out = out.replace('&', "and");
    out = RE_FEAT.replace_all(&out, "").into_owned();
    out = RE_NON_WORD.replace_all(&out, " ").into_owned();
    // Collapse everything (tabs/newlines included) to single spaces so the
    // result is stable under a second pass.
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `None` normalizes to the empty string.
pub fn normalize_opt(s: Option<&str>) -> String {
    s.map(normalize).unwrap_or_default()
}

/// Tag form used for scoring: lower-case, dashes as spaces, single-spaced.
/// `"Hip-Hop"` and `"hip hop"` score the same.
pub fn norm_tag_for_scoring(s: &str) -> String {
    let out = s.to_lowercase().replace('-', " ");
    RE_MULTI_WS.replace_all(&out, " ").trim().to_string()
}

/// Memory / seeding key for a song: `normalize(title)|normalize(artist)`.
pub fn song_key(title: &str, artist: Option<&str>) -> String {
    format!("{}|{}", normalize(title), normalize_opt(artist))
}
