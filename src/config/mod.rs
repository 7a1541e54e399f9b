//! Configuration management for the p2p-bench harness
//!
//! - Core structures and enums
//! - CLI argument parsing
//! - Configuration validation
//! - Default value management

pub mod defaults;
pub mod parser;
pub mod validation;

use crate::errors::Result;
use crate::host::{SecurityMode, Transport};
use std::path::PathBuf;
use std::time::Duration;

/// What this process does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Accept inbound echo streams
    Listen,
    /// Ramp connections and streams against a listener
    Dial,
    /// Compare recorded metric series
    Report,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Listen => "listen",
            Command::Dial => "dial",
            Command::Report => "report",
        }
    }
}

/// Where sampled metric records go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsOutput {
    /// Telemetry disabled, counters are discarded
    Disabled,
    /// One human-readable log line per tick
    Stdout,
    /// One durable record per tick, appended to the file
    Csv(PathBuf),
}

/// Report rendering format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Table,
    Json,
}

/// Host construction settings
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub transport: Transport,
    pub listen_port: u16,
    pub security: SecurityMode,
    /// Identity seed, 0 means random
    pub seed: u64,
}

/// Telemetry settings
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub interval: Duration,
    pub output: MetricsOutput,
}

/// Dialer ramp settings
#[derive(Debug, Clone)]
pub struct DialConfig {
    pub target: Option<String>,
    pub connections: u32,
    pub streams: u32,
    /// Write cycles per stream, 0 means until failure or cancellation
    pub writes_per_stream: u64,
}

/// Report settings
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub sources: Vec<PathBuf>,
    /// Only records with exactly this many active streams are aggregated when > 1
    pub target_streams: u32,
    pub format: ReportFormat,
}

/// Run lifetime settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub duration: Option<Duration>,
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub verbose: bool,
}

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Command,
    pub network: NetworkConfig,
    pub metrics: MetricsConfig,
    pub dial: DialConfig,
    pub report: ReportConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Parse and validate configuration from command line arguments
    pub fn from_args() -> Result<Self> {
        let raw_config = parser::RawConfig::parse_from_args()?;
        let config = raw_config.try_into()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Default CSV file name for this run, used when `--metrics csv` is given
    pub fn default_metrics_file(&self) -> PathBuf {
        let name = match self.command {
            Command::Dial => format!(
                "metrics_dial_{}_c{}_s{}.csv",
                self.network.transport, self.dial.connections, self.dial.streams
            ),
            _ => format!(
                "metrics_{}_{}_e{}.csv",
                self.command.as_str(),
                self.network.transport,
                u8::from(self.network.security == SecurityMode::Secured)
            ),
        };
        PathBuf::from(name)
    }

    /// Print configuration summary for the network roles
    pub fn print_summary(&self) {
        println!("p2p-bench Configuration:");
        println!("   Command:          {}", self.command.as_str());
        println!("   Transport:        {}", self.network.transport);
        println!("   Security:         {}", self.network.security);

        if self.command == Command::Listen {
            println!("   Listen Port:      {}", self.network.listen_port);
        } else {
            println!(
                "   Target:           {}",
                self.dial.target.as_deref().unwrap_or("-")
            );
            println!("   Connections:      {}", self.dial.connections);
            println!("   Streams:          {} per connection", self.dial.streams);
            if self.dial.writes_per_stream > 0 {
                println!("   Writes:           {} per stream", self.dial.writes_per_stream);
            }
        }

        match &self.metrics.output {
            MetricsOutput::Disabled => println!("   Metrics:          disabled"),
            MetricsOutput::Stdout => println!(
                "   Metrics:          stdout every {:?}",
                self.metrics.interval
            ),
            MetricsOutput::Csv(path) => println!(
                "   Metrics:          {} every {:?}",
                path.display(),
                self.metrics.interval
            ),
        }

        if let Some(duration) = self.run.duration {
            println!("   Duration:         {:?}", duration);
        }

        println!();
    }
}
