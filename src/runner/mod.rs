//! Benchmark roles and run orchestration
//!
//! - Echo listener role
//! - Ramped dialer role
//! - Shared cancellation, telemetry wiring and the report command

pub mod dialer;
pub mod listener;

pub use dialer::Dialer;
pub use listener::EchoListener;

use crate::config::{Command, Config, ReportConfig, ReportFormat};
use crate::errors::Result;
use crate::metrics::reporting::{aggregate_series, load_series, render_json, render_table};
use crate::metrics::{MetricTracker, Telemetry};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A long-running side of the benchmark
#[async_trait]
pub trait BenchmarkRole {
    fn name(&self) -> &'static str;

    /// Run until the work is done or `cancel` fires
    async fn run(&mut self, tracker: Arc<dyn MetricTracker>, cancel: CancellationToken)
    -> Result<()>;
}

/// Execute the configured command
pub async fn run(config: Config) -> Result<()> {
    match config.command {
        Command::Report => run_report(&config.report),
        Command::Listen => run_role(EchoListener::from_config(&config), &config).await,
        Command::Dial => run_role(Dialer::from_config(&config)?, &config).await,
    }
}

async fn run_role<R>(mut role: R, config: &Config) -> Result<()>
where
    R: BenchmarkRole + Send,
{
    let cancel = CancellationToken::new();
    let telemetry = Telemetry::start(
        &config.metrics.output,
        config.metrics.interval,
        cancel.clone(),
    )?;

    setup_signal_handler(cancel.clone());
    if let Some(duration) = config.run.duration {
        setup_duration_limit(duration, cancel.clone());
    }

    info!("Starting {}", role.name());
    let result = role.run(telemetry.tracker(), cancel.clone()).await;

    cancel.cancel();
    telemetry.finish().await;

    match &result {
        Ok(()) => info!("{} finished", role.name()),
        Err(e) => error!("{} failed: {}", role.name(), e),
    }
    result
}

/// Set up signal handler for graceful shutdown
fn setup_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for ctrl+c: {}", e);
                    return;
                }
                warn!("Received Ctrl+C, initiating graceful shutdown...");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}

/// Cancel the run once `duration` has elapsed
fn setup_duration_limit(duration: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                info!("Run duration of {:?} reached, shutting down", duration);
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}

/// Aggregate recorded series and print the comparison
fn run_report(settings: &ReportConfig) -> Result<()> {
    let series = load_series(&settings.sources)?;
    let stats = aggregate_series(&series, settings.target_streams);

    match settings.format {
        ReportFormat::Table => print!("{}", render_table(&stats)),
        ReportFormat::Json => println!("{}", render_json(&stats)?),
    }
    Ok(())
}

/// Sleep for `delay` unless cancelled first; returns false on cancellation
pub(crate) async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
