//! Counters published through the `metrics` facade.
//!
//! No exporter is installed by the library; without a recorder the macros are
//! no-ops. Descriptions are registered once, on first use.

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

use crate::decision::Bucket;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "reactor_kb_lookups_total",
            "KB lookups by outcome (exact, fuzzy, miss, no_kb)."
        );
        describe_counter!(
            "reactor_result_cache_total",
            "Result cache probes by outcome (hit, miss)."
        );
        describe_counter!(
            "reactor_decisions_total",
            "Reaction decisions by bucket and decision path."
        );
        describe_counter!(
            "reactor_index_rebuilds_total",
            "KB index rebuilds from source (snapshot missing, stale or corrupt)."
        );
    });
}

pub(crate) fn kb_lookup(outcome: &'static str) {
    ensure_metrics_described();
    counter!("reactor_kb_lookups_total", "outcome" => outcome).increment(1);
}

pub(crate) fn result_cache(hit: bool) {
    ensure_metrics_described();
    let outcome = if hit { "hit" } else { "miss" };
    counter!("reactor_result_cache_total", "outcome" => outcome).increment(1);
}

pub(crate) fn decision(bucket: Bucket, path: &'static str) {
    ensure_metrics_described();
    counter!("reactor_decisions_total", "bucket" => bucket.as_str(), "path" => path).increment(1);
}

pub(crate) fn index_rebuild() {
    ensure_metrics_described();
    counter!("reactor_index_rebuilds_total").increment(1);
}
