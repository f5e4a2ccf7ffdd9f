//! Probe: feeds now-playing lines through the reactor and prints each outcome
//! as one JSON line.
//!
//! Input is `$PROBE_LINE` when set, otherwise stdin (one now-playing text per
//! line). The KB is re-checked before every line, so edits to the songs file
//! are picked up without a restart. With `REACTOR_METRICS=1` the counters are
//! dumped to stderr in Prometheus text format at the end.

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use nowplaying_reactor::{AppConfig, Reactor};
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENV_PROBE_LINE: &str = "PROBE_LINE";
const ENV_LOG_JSON: &str = "REACTOR_LOG_JSON";
const ENV_METRICS: &str = "REACTOR_METRICS";
const DEFAULT_LOG_FILTER: &str = "config=info,context=info,kb=info,memory=info,react=info,reactor=info,review=info,warn";

/// Logs go to stderr so stdout stays pure JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(io::stderr)).init();
    } else {
        registry.with(fmt::layer().compact().with_writer(io::stderr)).init();
    }
}

fn init_metrics() -> anyhow::Result<Option<PrometheusHandle>> {
    if !std::env::var(ENV_METRICS).is_ok_and(|v| v == "1") {
        return Ok(None);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus: install recorder")?;
    Ok(Some(handle))
}

fn main() -> anyhow::Result<()> {
    // Load .env if present; no-op otherwise.
    let _ = dotenvy::dotenv();
    init_tracing();
    let metrics = init_metrics()?;

    let cfg = AppConfig::from_env().context("loading app config")?;
    let mut reactor = Reactor::from_config(&cfg)?;

    let lines: Vec<String> = match std::env::var(ENV_PROBE_LINE) {
        Ok(line) => vec![line],
        Err(_) => io::stdin()
            .lock()
            .lines()
            .collect::<Result<_, _>>()
            .context("reading stdin")?,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut reacted = 0usize;
    for line in lines {
        if reactor.reload_kb_if_changed() {
            info!(target: "reactor", "songs KB reloaded");
        }
        let Some(outcome) = reactor.react(&line) else {
            continue;
        };
        serde_json::to_writer(&mut out, &outcome).context("writing outcome")?;
        writeln!(out).context("writing outcome")?;
        reacted += 1;
    }

    info!(target: "reactor", reacted, "probe finished");
    if let Some(handle) = metrics {
        eprint!("{}", handle.render());
    }
    Ok(())
}
