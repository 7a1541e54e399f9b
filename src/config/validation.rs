//! Configuration validation logic

use super::{Command, Config};
use crate::constants::{MAX_CONNECTIONS_LIMIT, MAX_STREAMS_PER_CONNECTION};
use crate::errors::{BenchError, Result};

/// Validate the configuration
pub fn validate(config: &Config) -> Result<()> {
    validate_metrics_config(config)?;
    validate_run_config(config)?;
    match config.command {
        Command::Listen => Ok(()),
        Command::Dial => validate_dial_config(config),
        Command::Report => validate_report_config(config),
    }
}

/// Validate telemetry configuration
fn validate_metrics_config(config: &Config) -> Result<()> {
    if config.metrics.interval.is_zero() {
        return Err(BenchError::config(
            "Metrics interval must be greater than 0",
        ));
    }
    Ok(())
}

/// Validate run lifetime
fn validate_run_config(config: &Config) -> Result<()> {
    if let Some(duration) = config.run.duration
        && duration.is_zero()
    {
        return Err(BenchError::config("Duration must be greater than 0"));
    }
    Ok(())
}

/// Validate dialer configuration
fn validate_dial_config(config: &Config) -> Result<()> {
    match config.dial.target.as_deref() {
        None => {
            return Err(BenchError::config(
                "dial requires a target peer address, e.g. /ip4/127.0.0.1/tcp/9999/p2p/<peer-id>",
            ));
        }
        Some(target) if target.trim().is_empty() => {
            return Err(BenchError::config("Target peer address cannot be empty"));
        }
        Some(_) => {}
    }

    if config.dial.connections == 0 {
        return Err(BenchError::config(
            "Number of connections must be greater than 0",
        ));
    }

    if config.dial.connections > MAX_CONNECTIONS_LIMIT {
        return Err(BenchError::config(format!(
            "Number of connections cannot exceed {}",
            MAX_CONNECTIONS_LIMIT
        )));
    }

    if config.dial.streams == 0 {
        return Err(BenchError::config(
            "Number of streams per connection must be greater than 0",
        ));
    }

    if config.dial.streams > MAX_STREAMS_PER_CONNECTION {
        return Err(BenchError::config(format!(
            "Number of streams per connection cannot exceed {}",
            MAX_STREAMS_PER_CONNECTION
        )));
    }

    Ok(())
}

/// Validate report configuration
fn validate_report_config(config: &Config) -> Result<()> {
    if config.report.sources.is_empty() {
        return Err(BenchError::config(
            "report requires at least one CSV metrics file",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn create_dial_config() -> Config {
        let mut config =
            Config::default_dial("/ip4/127.0.0.1/tcp/9999/p2p/00000000000000000000000000000000".to_string());
        config.dial.connections = 10;
        config.dial.streams = 100;
        config
    }

    #[test]
    fn test_validate_valid_configs() {
        assert!(validate(&create_dial_config()).is_ok());
        assert!(validate(&Config::default_listen()).is_ok());
        assert!(validate(&Config::default_report(vec![PathBuf::from("a.csv")])).is_ok());
    }

    #[test]
    fn test_validate_missing_target() {
        let mut config = create_dial_config();
        config.dial.target = None;
        assert!(validate(&config).is_err());

        config.dial.target = Some("  ".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_connections() {
        let mut config = create_dial_config();
        config.dial.connections = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_connection_limit() {
        let mut config = create_dial_config();
        config.dial.connections = MAX_CONNECTIONS_LIMIT + 1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_streams() {
        let mut config = create_dial_config();
        config.dial.streams = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default_listen();
        config.metrics.interval = Duration::ZERO;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_duration() {
        let mut config = Config::default_listen();
        config.run.duration = Some(Duration::ZERO);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_report_without_sources() {
        let config = Config::default_report(Vec::new());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_listen_ignores_dial_settings() {
        let mut config = Config::default_listen();
        config.dial.connections = 0;
        assert!(validate(&config).is_ok());
    }
}
