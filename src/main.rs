//! `run-watch`: follow agent runs live from the command line.
//!
//! Keeps a run feed open against the configured API and logs every change in
//! list contents or connection status until interrupted.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};

use run_stream_sync::config::AppConfig;
use run_stream_sync::sync::{HttpSnapshotFetcher, RunFeed, RunFeedState, SseStreamConnector};
use run_stream_sync::telemetry;

/// Runs shown per state change.
const HEAD_RUNS: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = AppConfig::load().context("failed to load configuration")?;
    telemetry::init(config.log.json);

    let base_url = config.base_url()?;
    let params = config.stream_params()?;
    let options = config.feed_options()?;

    let fetcher = HttpSnapshotFetcher::new(&base_url, &config.server.runs_path)?;
    let connector = SseStreamConnector::new(&base_url, &config.server.stream_path)?;

    info!(
        name: "run_watch.started",
        snapshot = %fetcher.endpoint(),
        stream = %connector.endpoint(),
        agent_id = ?params.agent_id,
        status = ?params.status,
        max_runs = options.max_runs,
        "watching runs"
    );

    let feed = RunFeed::spawn(Arc::new(fetcher), Arc::new(connector), params, options);
    let mut updates = feed.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("run feed stopped unexpectedly");
                    break;
                }
                let state = updates.borrow_and_update().clone();
                report(&state);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    feed.dispose().await;
    Ok(())
}

fn report(state: &RunFeedState) {
    info!(
        name: "run_watch.state",
        status = %state.status,
        runs = state.runs.len(),
        reconnects = state.reconnect_attempts,
        error = state.error.as_deref().unwrap_or("-"),
        "feed updated"
    );

    for run in state.runs.iter().take(HEAD_RUNS) {
        info!(
            name: "run_watch.run",
            run_id = %run.id,
            agent_id = run.agent_id.as_deref().unwrap_or("-"),
            status = run.status.map_or("-", |s| s.as_str()),
            updated_at = ?run.updated_at,
            "run"
        );
    }
}
