// src/lib.rs
// Public library surface for the probe binary and integration tests.

pub mod config;
pub mod context;
pub mod decision;
pub mod fsutil;
pub mod kb;
pub mod memory;
pub mod normalize;
pub mod nowplaying;
pub mod react;
pub mod reactor;
pub mod result_cache;
pub mod review;
pub mod special_version;

mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ConfigError};
pub use crate::decision::{Bucket, ReactionDecision};
pub use crate::kb::{KbError, KnowledgeBaseIndex, SongEntry};
pub use crate::react::{DecisionInput, RandomSource, ReactionConfig, ReactionEngine};
pub use crate::reactor::{ReactionOutcome, Reactor};
