//! Cross-run comparison of recorded metric series

use crate::errors::Result;
use crate::metrics::aggregate::{Aggregator, Stats};
use crate::metrics::record::{MetricRecord, read_records};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Named, ordered record sequences; one entry per source
pub type Series = BTreeMap<String, Vec<MetricRecord>>;

const LABEL_WIDTH: usize = 24;

/// Aggregates of one series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SeriesStats {
    /// Records that passed the active-stream filter
    pub samples: u64,
    pub cpu: Stats<u32>,
    pub memory: Stats<u64>,
    pub bytes_read: Stats<u64>,
    pub bytes_written: Stats<u64>,
}

/// Name a source by its file name, falling back to the full path on collision
fn series_name(path: &Path, series: &Series) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    if series.contains_key(&name) {
        path.display().to_string()
    } else {
        name
    }
}

/// Read every source; the first unreadable or malformed one aborts the report
pub fn load_series(paths: &[PathBuf]) -> Result<Series> {
    let mut series = Series::new();
    for path in paths {
        let records = read_records(path)?;
        let name = series_name(path, &series);
        debug!("Loaded {} record(s) from {}", records.len(), path.display());
        series.insert(name, records);
    }
    Ok(series)
}

/// Fold each series into its aggregates
///
/// With `target_streams > 1` only records sampled at exactly that many active
/// streams are included; otherwise every record counts.
pub fn aggregate_series(series: &Series, target_streams: u32) -> BTreeMap<String, SeriesStats> {
    series
        .iter()
        .map(|(name, records)| {
            let mut cpu = Aggregator::<u32>::new();
            let mut memory = Aggregator::<u64>::new();
            let mut bytes_read = Aggregator::<u64>::new();
            let mut bytes_written = Aggregator::<u64>::new();

            for record in records
                .iter()
                .filter(|r| target_streams <= 1 || r.active_streams == target_streams)
            {
                cpu.add(record.cpu_percentage);
                memory.add(record.memory_heap_bytes);
                bytes_read.add(record.bytes_read);
                bytes_written.add(record.bytes_written);
            }

            let stats = SeriesStats {
                samples: cpu.count(),
                cpu: cpu.snapshot(),
                memory: memory.snapshot(),
                bytes_read: bytes_read.snapshot(),
                bytes_written: bytes_written.snapshot(),
            };
            (name.clone(), stats)
        })
        .collect()
}

fn kib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Render the markdown comparison table, one column per series
pub fn render_table(stats: &BTreeMap<String, SeriesStats>) -> String {
    let mut out = String::new();

    let _ = write!(out, "| {:>LABEL_WIDTH$} |", "");
    for name in stats.keys() {
        let _ = write!(out, " {} |", name);
    }
    let _ = write!(out, "\n|{}|", "-".repeat(LABEL_WIDTH + 2));
    for name in stats.keys() {
        let _ = write!(out, "{}|", "-".repeat(name.len() + 2));
    }

    let group = |out: &mut String, title: &str, cell: &dyn Fn(&SeriesStats, usize, usize) -> String| {
        let _ = write!(out, "\n| {:>LABEL_WIDTH$} |", format!("**{}**", title));
        for name in stats.keys() {
            let _ = write!(out, "{}|", " ".repeat(name.len() + 2));
        }
        for (row, label) in ["min", "max", "avg"].into_iter().enumerate() {
            let _ = write!(out, "\n| {:>LABEL_WIDTH$} |", label);
            for (name, series) in stats {
                let _ = write!(out, "{}|", cell(series, row, name.len() + 2));
            }
        }
    };

    fn pick<T: Copy>(stats: &Stats<T>, row: usize) -> T {
        match row {
            0 => stats.min,
            1 => stats.max,
            _ => stats.avg,
        }
    }

    group(&mut out, "CPU (%)", &|s, row, width| {
        format!("{:>width$}", pick(&s.cpu, row))
    });
    group(&mut out, "Memory Heap (MiB)", &|s, row, width| {
        format!("{:>width$.3}", mib(pick(&s.memory, row)))
    });
    group(&mut out, "Bytes Read (KiB)", &|s, row, width| {
        format!("{:>width$.3}", kib(pick(&s.bytes_read, row)))
    });
    group(&mut out, "Bytes Written (KiB)", &|s, row, width| {
        format!("{:>width$.3}", kib(pick(&s.bytes_written, row)))
    });

    out.push('\n');
    out
}

/// Render the same aggregates as pretty-printed JSON
pub fn render_json(stats: &BTreeMap<String, SeriesStats>) -> Result<String> {
    Ok(serde_json::to_string_pretty(stats)?)
}
