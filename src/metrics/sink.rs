//! Destinations for sampled records and the telemetry wiring used by the roles

use crate::config::MetricsOutput;
use crate::errors::{ErrorContext, Result};
use crate::metrics::collector::{MetricCollector, MetricTracker, NoopTracker, ProcessProbe};
use crate::metrics::record::MetricRecord;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where each tick's record is written
pub enum MetricSink {
    /// One human-readable log line per record
    Console,
    /// One encoded record per line, flushed after every write
    Csv(csv::Writer<File>),
}

impl MetricSink {
    /// Create (or truncate) a durable CSV sink
    pub fn csv(path: &Path) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_startup_context(&format!(
                "Failed to create metrics file '{}'",
                path.display()
            ))?;
        Ok(MetricSink::Csv(writer))
    }

    /// Write one record; durable write failures are logged, not fatal
    pub fn write(&mut self, record: &MetricRecord) {
        match self {
            MetricSink::Console => info!("{}", console_line(record)),
            MetricSink::Csv(writer) => {
                let result = writer
                    .write_record(record.fields())
                    .and_then(|_| writer.flush().map_err(csv::Error::from));
                if let Err(e) = result {
                    warn!("Failed to write metric record: {}", e);
                }
            }
        }
    }
}

/// Console rendering of one record
pub fn console_line(record: &MetricRecord) -> String {
    let timestamp = chrono::DateTime::from_timestamp_millis(record.timestamp)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| record.timestamp.to_string());

    format!(
        "[metric] {} | {} stream(s) | {}% (CPU) | {} byte(s) (HEAP)",
        timestamp, record.active_streams, record.cpu_percentage, record.memory_heap_bytes
    )
}

/// Tracker handed to the roles, plus the sampler feeding the sink
pub struct Telemetry {
    tracker: Arc<dyn MetricTracker>,
    sampler: Option<JoinHandle<()>>,
}

impl Telemetry {
    /// Build the sink for `output` and start sampling
    ///
    /// With [`MetricsOutput::Disabled`] no sampler runs and counters are discarded.
    pub fn start(
        output: &MetricsOutput,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut sink = match output {
            MetricsOutput::Disabled => return Ok(Self::disabled()),
            MetricsOutput::Stdout => MetricSink::Console,
            MetricsOutput::Csv(path) => {
                let sink = MetricSink::csv(path)?;
                info!("Writing metrics to {}", path.display());
                sink
            }
        };

        let collector = Arc::new(MetricCollector::new());
        let sampler = collector.start(
            interval,
            cancel,
            Box::new(ProcessProbe::new()),
            move |record| sink.write(&record),
        );

        Ok(Self {
            tracker: collector,
            sampler: Some(sampler),
        })
    }

    pub fn disabled() -> Self {
        Self {
            tracker: Arc::new(NoopTracker),
            sampler: None,
        }
    }

    pub fn tracker(&self) -> Arc<dyn MetricTracker> {
        Arc::clone(&self.tracker)
    }

    /// Wait for the sampler to stop; the cancellation token must already be fired
    pub async fn finish(self) {
        if let Some(sampler) = self.sampler
            && let Err(e) = sampler.await
        {
            warn!("Metric sampler ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BenchError;
    use crate::metrics::record::read_records;

    fn record(timestamp: i64) -> MetricRecord {
        MetricRecord {
            timestamp,
            active_streams: 3,
            cpu_percentage: 41,
            memory_heap_bytes: 2048,
            bytes_read: 10,
            bytes_written: 20,
        }
    }

    #[test]
    fn test_console_line_format() {
        let line = console_line(&record(0));
        assert_eq!(
            line,
            "[metric] 1970-01-01T00:00:00+00:00 | 3 stream(s) | 41% (CPU) | 2048 byte(s) (HEAP)"
        );
    }

    #[test]
    fn test_csv_sink_appends_readable_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let mut sink = MetricSink::csv(&path).unwrap();
        sink.write(&record(1));
        sink.write(&record(2));

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![record(1), record(2)]);
    }

    #[test]
    fn test_csv_sink_creation_failure_is_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.csv");
        assert!(matches!(MetricSink::csv(&path), Err(BenchError::Startup(_))));
    }

    #[tokio::test]
    async fn test_disabled_telemetry_discards() {
        let cancel = CancellationToken::new();
        let telemetry =
            Telemetry::start(&MetricsOutput::Disabled, Duration::from_secs(1), cancel).unwrap();
        assert_eq!(telemetry.tracker().add_bytes_read(10), 0);
        telemetry.finish().await;
    }

    #[tokio::test]
    async fn test_csv_telemetry_writes_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.csv");
        let cancel = CancellationToken::new();

        let telemetry = Telemetry::start(
            &MetricsOutput::Csv(path.clone()),
            Duration::from_millis(20),
            cancel.clone(),
        )
        .unwrap();
        telemetry.tracker().add_bytes_written(64);

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        telemetry.finish().await;

        let records = read_records(&path).unwrap();
        assert!(!records.is_empty());
        assert_eq!(records.iter().map(|r| r.bytes_written).sum::<u64>(), 64);
    }
}
