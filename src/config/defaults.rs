//! Default values and configuration presets

use super::{
    Command, Config, DialConfig, MetricsConfig, MetricsOutput, NetworkConfig, OutputConfig,
    ReportConfig, ReportFormat, RunConfig,
};
use crate::constants::{DEFAULT_LISTEN_PORT, DEFAULT_SAMPLE_INTERVAL};
use crate::host::{SecurityMode, Transport};
use std::path::PathBuf;

/// Default configuration values
pub struct Defaults;

impl Defaults {
    pub const TRANSPORT: Transport = Transport::Tcp;
    pub const CONNECTIONS: u32 = 1;
    pub const STREAMS: u32 = 1;
    pub const SEED: u64 = 0;
}

impl Config {
    fn base(command: Command) -> Self {
        Self {
            command,
            network: NetworkConfig {
                transport: Defaults::TRANSPORT,
                listen_port: DEFAULT_LISTEN_PORT,
                security: SecurityMode::Secured,
                seed: Defaults::SEED,
            },
            metrics: MetricsConfig {
                interval: DEFAULT_SAMPLE_INTERVAL,
                output: MetricsOutput::Disabled,
            },
            dial: DialConfig {
                target: None,
                connections: Defaults::CONNECTIONS,
                streams: Defaults::STREAMS,
                writes_per_stream: 0,
            },
            report: ReportConfig {
                sources: Vec::new(),
                target_streams: Defaults::STREAMS,
                format: ReportFormat::Table,
            },
            run: RunConfig { duration: None },
            output: OutputConfig { verbose: false },
        }
    }

    /// Create a default listener configuration
    pub fn default_listen() -> Self {
        Self::base(Command::Listen)
    }

    /// Create a default dialer configuration
    pub fn default_dial(target: impl Into<Option<String>>) -> Self {
        let mut config = Self::base(Command::Dial);
        config.dial.target = target.into();
        config
    }

    /// Create a default report configuration
    pub fn default_report(sources: Vec<PathBuf>) -> Self {
        let mut config = Self::base(Command::Report);
        config.report.sources = sources;
        config
    }
}
