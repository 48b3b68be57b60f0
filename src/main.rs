//! telemetry: standalone runner for the server telemetry collectors.
//!
//! Drives a stand-in tick loop at the configured rate and logs a summary
//! periodically. Run with:  `RUST_LOG=info telemetry [path/to/telemetry.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_config::TelemetryConfig;
use telemetry_core::state::{Horizon, TelemetrySnapshot};
use telemetry_system::{format_bytes, format_optional_bytes, Telemetry};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Structured logging; RUST_LOG controls verbosity (default: info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("telemetry v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let telemetry = Arc::new(Telemetry::from_config(&config));
    telemetry.start().context("starting collectors")?;

    let ticker = tokio::spawn(run_ticks(Arc::clone(&telemetry), config.ticks.expected_tps));
    let reporter = tokio::spawn(report(
        Arc::clone(&telemetry),
        Duration::from_secs(config.report.interval_secs.max(1)),
    ));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");

    ticker.abort();
    reporter.abort();

    // close() joins poller threads; keep that off the async workers.
    let closing = Arc::clone(&telemetry);
    tokio::task::spawn_blocking(move || closing.close()).await?;

    log_summary(&telemetry.snapshot());
    Ok(())
}

fn load_config() -> Result<TelemetryConfig> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => telemetry_config::default_path(),
    };
    info!("Using config '{}'", path.display());
    telemetry_config::load(&path).with_context(|| format!("loading '{}'", path.display()))
}

/// Stand-in host loop: fires at `tps` and reports the wall-clock time since
/// the previous tick, the way a game server's main loop would.
async fn run_ticks(telemetry: Arc<Telemetry>, tps: u32) {
    let listener = telemetry.tick_listener();
    let mut interval = time::interval(Duration::from_secs(1) / tps.max(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    interval.tick().await;
    let mut last = Instant::now();
    loop {
        interval.tick().await;
        let now = Instant::now();
        let nanos = u64::try_from(now.duration_since(last).as_nanos()).unwrap_or(u64::MAX);
        listener.on_tick_completed(nanos);
        last = now;
    }
}

async fn report(telemetry: Arc<Telemetry>, every: Duration) {
    let mut interval = time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        log_summary(&telemetry.snapshot());
    }
}

fn log_summary(snapshot: &TelemetrySnapshot) {
    let tps: Vec<String> = snapshot
        .ticks
        .horizons
        .iter()
        .map(|s| format!("{} {:.2}", s.horizon.label(), s.tps))
        .collect();
    let mspt = snapshot
        .ticks
        .get(Horizon::ONE_MINUTE)
        .or_else(|| snapshot.ticks.horizons.first())
        .map_or_else(|| "UNAVAILABLE".to_string(), |s| format!("{:.2}", s.mspt));

    info!("TPS [{}]  MSPT {mspt}", tps.join(", "));
    info!(
        "CPU {}  max thread {}  temp {}  {} threads @ {:.2} GHz",
        percent(snapshot.cpu.overall_load),
        percent(snapshot.cpu.max_thread_load()),
        snapshot
            .cpu
            .temperature_celsius
            .map_or_else(|| "UNAVAILABLE".to_string(), |t| format!("{t:.1}°C")),
        snapshot.cpu.thread_count(),
        snapshot.cpu.max_frequency_ghz(),
    );
    info!(
        "Memory {} / {} (non-heap {})",
        format_bytes(snapshot.memory.heap.used),
        format_bytes(snapshot.memory.max_bytes()),
        format_bytes(snapshot.memory.non_heap.used),
    );
    info!(
        "World {} ({:?})",
        format_optional_bytes(snapshot.disk.size_bytes),
        snapshot.disk.status,
    );
}

fn percent(load: Option<f64>) -> String {
    load.map_or_else(|| "UNAVAILABLE".to_string(), |l| format!("{:.1}%", l * 100.0))
}
