mod common;
mod config;
mod constants;
mod errors;
mod host;
mod metrics;
mod runner;

use config::{Command, Config};
use errors::Result;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    // Logging is configured from the parsed flags, so configuration errors go straight to stderr
    let config = match Config::from_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        error!("Application failed: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run(config: Config) -> Result<()> {
    info!("p2p-bench - peer-to-peer transport benchmark");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Report output is machine-consumed; keep stdout to the report itself
    if config.command != Command::Report {
        config.print_summary();
    }

    runner::run(config).await
}

/// Initialize logging based on configuration
fn init_logging(config: &Config) {
    let level = if config.output.verbose {
        "debug"
    } else {
        "info"
    };

    let mut filter = EnvFilter::from_default_env();
    for directive in [
        format!("p2p_bench={}", level),
        "tokio_tungstenite=warn".to_string(),
        "tungstenite=warn".to_string(),
    ] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid filter directive '{}': {}", directive, e),
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {}", e);
    }

    if config.output.verbose {
        info!("Verbose logging enabled");
    }
}
