//! Command-line argument parsing for p2p-bench configuration

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::Defaults;
use super::{Command, Config, MetricsOutput, NetworkConfig, ReportFormat};
use crate::constants::{DEFAULT_LISTEN_PORT, DEFAULT_SAMPLE_INTERVAL};
use crate::errors::{BenchError, ErrorContext, Result};
use crate::host::{SecurityMode, Transport};

/// Command for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommandArg {
    /// Accept echo streams and record telemetry
    Listen,
    /// Open connections and streams against a listener address
    Dial,
    /// Aggregate and compare recorded CSV metric files
    Report,
}

/// Transport name for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Tcp,
    #[value(alias = "ws")]
    Websocket,
    Quic,
    Webrtc,
    Webtransport,
}

/// Report format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormatArg {
    Table,
    Json,
}

/// Raw configuration from command line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "p2p-bench",
    version,
    about = "Drive a peer-to-peer stream transport under ramped load and record telemetry",
    long_about = None
)]
pub struct RawConfig {
    /// What to run
    #[arg(value_enum, value_name = "COMMAND")]
    pub command: CommandArg,

    /// Target peer address for dial, CSV files for report
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    /// Transport requested from the host
    #[arg(
        short = 't',
        long = "transport",
        value_enum,
        default_value = "tcp",
        help = "Transport to benchmark"
    )]
    pub transport: TransportArg,

    /// Port to listen on
    #[arg(
        short = 'l',
        long = "listen-port",
        value_name = "PORT",
        default_value_t = DEFAULT_LISTEN_PORT,
        help = "Port to listen on (listen only)"
    )]
    pub listen_port: u16,

    /// Disable peer identity checks
    #[arg(long = "insecure", help = "Skip peer identity verification (listen only)")]
    pub insecure: bool,

    /// Identity seed
    #[arg(
        long = "seed",
        value_name = "SEED",
        default_value_t = Defaults::SEED,
        help = "Seed for the peer identity, 0 for a random identity (listen only)"
    )]
    pub seed: u64,

    /// Sampling interval
    #[arg(
        long = "interval",
        value_name = "DURATION",
        default_value_t = format!("{}ms", DEFAULT_SAMPLE_INTERVAL.as_millis()),
        help = "Interval between metric samples (e.g. '500ms', '1s')"
    )]
    pub interval: String,

    /// Metrics destination
    #[arg(
        long = "metrics",
        value_name = "OUTPUT",
        default_value = "",
        help = "Write metrics to 'stdout', to an auto-named 'csv' file, or to the given CSV path"
    )]
    pub metrics: String,

    /// Connections to open
    #[arg(
        short = 'c',
        long = "connections",
        value_name = "COUNT",
        default_value_t = Defaults::CONNECTIONS,
        help = "Total connections to open (dial only)"
    )]
    pub connections: u32,

    /// Streams per connection
    #[arg(
        short = 's',
        long = "streams",
        value_name = "COUNT",
        default_value_t = Defaults::STREAMS,
        help = "Streams per connection for dial, active stream filter for report"
    )]
    pub streams: u32,

    /// Write cycles per stream
    #[arg(
        short = 'w',
        long = "writes",
        value_name = "COUNT",
        default_value = "0",
        help = "Write cycles per stream, 0 = until failure or shutdown (dial only)"
    )]
    pub writes: u64,

    /// Run duration
    #[arg(
        short = 'd',
        long = "duration",
        value_name = "DURATION",
        help = "Stop the run after this long (e.g. '30s', '5m', '2h')"
    )]
    pub duration: Option<String>,

    /// Report format
    #[arg(
        long = "format",
        value_enum,
        default_value = "table",
        help = "Report output format (report only)"
    )]
    pub format: ReportFormatArg,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,
}

impl RawConfig {
    /// Parse from command line arguments
    pub fn parse_from_args() -> Result<Self> {
        Ok(Self::parse())
    }

    /// Parse duration string with time suffixes (ms/s/m/h)
    pub(crate) fn parse_duration(duration_str: &str) -> Result<Duration> {
        let duration_str = duration_str.trim();

        if duration_str.is_empty() {
            return Err(BenchError::config("Duration cannot be empty"));
        }

        let (number_part, unit_ms, suffix) = if let Some(number) = duration_str
            .strip_suffix("ms")
            .or_else(|| duration_str.strip_suffix("MS"))
        {
            (number, 1, "ms")
        } else if let Some(number) = duration_str.strip_suffix(['s', 'S']) {
            (number, 1_000, "s")
        } else if let Some(number) = duration_str.strip_suffix(['m', 'M']) {
            (number, 60_000, "m")
        } else if let Some(number) = duration_str.strip_suffix(['h', 'H']) {
            (number, 3_600_000, "h")
        } else {
            // No suffix, assume seconds
            (duration_str, 1_000, "")
        };

        let value = number_part.trim().parse::<u64>().map_err(|_| {
            if suffix.is_empty() {
                BenchError::config(format!(
                    "Invalid duration format: '{}' - expected a number",
                    duration_str
                ))
            } else {
                BenchError::config(format!(
                    "Invalid duration format: '{}' - expected number before '{}'",
                    duration_str, suffix
                ))
            }
        })?;

        let millis = value
            .checked_mul(unit_ms)
            .with_config_context(&format!("Duration '{}' is too large", duration_str))?;
        Ok(Duration::from_millis(millis))
    }
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Tcp => Transport::Tcp,
            TransportArg::Websocket => Transport::WebSocket,
            TransportArg::Quic => Transport::Quic,
            TransportArg::Webrtc => Transport::WebRtc,
            TransportArg::Webtransport => Transport::WebTransport,
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = BenchError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let duration = raw
            .duration
            .as_deref()
            .map(RawConfig::parse_duration)
            .transpose()?;
        let interval = RawConfig::parse_duration(&raw.interval)?;

        let command = match raw.command {
            CommandArg::Listen => Command::Listen,
            CommandArg::Dial => Command::Dial,
            CommandArg::Report => Command::Report,
        };

        let mut config = match command {
            Command::Listen => {
                if !raw.args.is_empty() {
                    return Err(BenchError::config(format!(
                        "listen takes no positional arguments, got {:?}",
                        raw.args
                    )));
                }
                Config::default_listen()
            }
            Command::Dial => {
                if raw.args.len() > 1 {
                    return Err(BenchError::config(
                        "dial takes exactly one target peer address",
                    ));
                }
                Config::default_dial(raw.args.into_iter().next())
            }
            Command::Report => {
                Config::default_report(raw.args.into_iter().map(PathBuf::from).collect())
            }
        };

        let security = if raw.insecure {
            SecurityMode::Insecure
        } else {
            SecurityMode::Secured
        };

        config.network = NetworkConfig {
            transport: raw.transport.into(),
            listen_port: raw.listen_port,
            security,
            seed: raw.seed,
        };
        config.metrics.interval = interval;
        config.dial.connections = raw.connections;
        config.dial.streams = raw.streams;
        config.dial.writes_per_stream = raw.writes;
        config.report.target_streams = raw.streams;
        config.report.format = match raw.format {
            ReportFormatArg::Table => ReportFormat::Table,
            ReportFormatArg::Json => ReportFormat::Json,
        };
        config.run.duration = duration;
        config.output.verbose = raw.verbose;

        // Telemetry only applies to the network roles
        let metrics = raw.metrics.trim();
        if command != Command::Report && !metrics.is_empty() {
            config.metrics.output = if metrics.eq_ignore_ascii_case("stdout") {
                MetricsOutput::Stdout
            } else if metrics.eq_ignore_ascii_case("csv") {
                MetricsOutput::Csv(config.default_metrics_file())
            } else {
                MetricsOutput::Csv(PathBuf::from(metrics))
            };
        }

        Ok(config)
    }
}
