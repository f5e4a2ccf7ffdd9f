//! Buckets and the reaction decision shape.
//!
//! The three-tier core only produces `Dislike/Neutral/Like`; `Love/Hate` appear
//! when five-tier thresholds are configured. Memory counts fold them back to
//! the three core buckets (see [`Bucket::memory_slot`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete outcome of one reaction decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Hate,
    Dislike,
    Neutral,
    Like,
    Love,
}

impl Bucket {
    /// The three buckets the unknown/explore draws and flips operate on.
    pub const CORE: [Bucket; 3] = [Bucket::Like, Bucket::Neutral, Bucket::Dislike];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Hate => "hate",
            Bucket::Dislike => "dislike",
            Bucket::Neutral => "neutral",
            Bucket::Like => "like",
            Bucket::Love => "love",
        }
    }

    /// Case-insensitive parse; unknown names → `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hate" => Some(Bucket::Hate),
            "dislike" => Some(Bucket::Dislike),
            "neutral" => Some(Bucket::Neutral),
            "like" => Some(Bucket::Like),
            "love" => Some(Bucket::Love),
            _ => None,
        }
    }

    /// Positive, negative or zero.
    pub fn polarity(self) -> i8 {
        match self {
            Bucket::Love | Bucket::Like => 1,
            Bucket::Neutral => 0,
            Bucket::Dislike | Bucket::Hate => -1,
        }
    }

    /// Core bucket this one is counted under in memory.
    pub fn memory_slot(self) -> Bucket {
        match self.polarity() {
            1 => Bucket::Like,
            -1 => Bucket::Dislike,
            _ => Bucket::Neutral,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered reaction text plus the bucket it was drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionDecision {
    pub text: String,
    pub bucket: Bucket,
}

impl ReactionDecision {
    pub fn new(text: impl Into<String>, bucket: Bucket) -> Self {
        Self {
            text: text.into(),
            bucket,
        }
    }

    /// Disabled engine output: empty text, neutral bucket.
    pub fn silent() -> Self {
        Self::new("", Bucket::Neutral)
    }

    pub fn like(text: impl Into<String>) -> Self {
        Self::new(text, Bucket::Like)
    }
    pub fn neutral(text: impl Into<String>) -> Self {
        Self::new(text, Bucket::Neutral)
    }
    pub fn dislike(text: impl Into<String>) -> Self {
        Self::new(text, Bucket::Dislike)
    }

    pub fn is_silent(&self) -> bool {
        self.text.is_empty()
    }
}
