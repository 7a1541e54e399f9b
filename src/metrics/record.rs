//! Metric records and their durable line format
//!
//! One record per line, six positional base-10 integers, no header row:
//! `timestamp,active_streams,cpu_percentage,memory_heap_bytes,bytes_read,bytes_written`

use crate::errors::{BenchError, RecordError, Result};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A single telemetry snapshot produced by one sampler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricRecord {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub active_streams: u32,
    pub cpu_percentage: u32,
    pub memory_heap_bytes: u64,
    /// Bytes read since the previous tick
    pub bytes_read: u64,
    /// Bytes written since the previous tick
    pub bytes_written: u64,
}

/// Positional fields of the durable format, in encoding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Timestamp,
    ActiveStreams,
    CpuPercentage,
    MemoryHeapBytes,
    BytesRead,
    BytesWritten,
}

impl RecordField {
    pub fn name(&self) -> &'static str {
        match self {
            RecordField::Timestamp => "timestamp",
            RecordField::ActiveStreams => "active_streams",
            RecordField::CpuPercentage => "cpu_percentage",
            RecordField::MemoryHeapBytes => "memory_heap_bytes",
            RecordField::BytesRead => "bytes_read",
            RecordField::BytesWritten => "bytes_written",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl MetricRecord {
    /// Encoded fields in durable order
    pub fn fields(&self) -> [String; 6] {
        [
            self.timestamp.to_string(),
            self.active_streams.to_string(),
            self.cpu_percentage.to_string(),
            self.memory_heap_bytes.to_string(),
            self.bytes_read.to_string(),
            self.bytes_written.to_string(),
        ]
    }

    /// Decode a record from its positional fields
    ///
    /// Fails on the first missing or unparseable field, or when extra fields follow.
    pub fn from_fields<'a, I>(fields: I) -> std::result::Result<Self, RecordError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = fields.into_iter();
        let mut next = |field: RecordField| {
            fields.next().ok_or(RecordError::MissingField(field))
        };

        let record = MetricRecord {
            timestamp: parse_field(next(RecordField::Timestamp)?, RecordField::Timestamp)?,
            active_streams: parse_field(
                next(RecordField::ActiveStreams)?,
                RecordField::ActiveStreams,
            )?,
            cpu_percentage: parse_field(
                next(RecordField::CpuPercentage)?,
                RecordField::CpuPercentage,
            )?,
            memory_heap_bytes: parse_field(
                next(RecordField::MemoryHeapBytes)?,
                RecordField::MemoryHeapBytes,
            )?,
            bytes_read: parse_field(next(RecordField::BytesRead)?, RecordField::BytesRead)?,
            bytes_written: parse_field(
                next(RecordField::BytesWritten)?,
                RecordField::BytesWritten,
            )?,
        };

        let trailing = fields.count();
        if trailing > 0 {
            return Err(RecordError::TrailingFields { count: trailing });
        }

        Ok(record)
    }
}

/// Base-10 only: no surrounding whitespace, and a sign is accepted on the
/// timestamp alone
fn parse_field<T: FromStr>(raw: &str, field: RecordField) -> std::result::Result<T, RecordError> {
    if raw.is_empty() {
        return Err(RecordError::MissingField(field));
    }
    let invalid = || RecordError::InvalidField {
        field,
        value: raw.to_string(),
    };
    if field != RecordField::Timestamp && raw.starts_with('+') {
        return Err(invalid());
    }
    raw.parse::<T>().map_err(|_| invalid())
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.timestamp,
            self.active_streams,
            self.cpu_percentage,
            self.memory_heap_bytes,
            self.bytes_read,
            self.bytes_written
        )
    }
}

impl FromStr for MetricRecord {
    type Err = RecordError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(RecordError::MissingField(RecordField::Timestamp));
        }
        Self::from_fields(line.split(','))
    }
}

/// Read every record of a durable source, aborting on the first bad line
pub fn read_records(path: &Path) -> Result<Vec<MetricRecord>> {
    let source_name = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|source| BenchError::Source {
            path: source_name.clone(),
            source,
        })?;

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let decoded = row
            .map_err(|e| RecordError::Unreadable(e.to_string()))
            .and_then(|row| MetricRecord::from_fields(row.iter()));

        match decoded {
            Ok(record) => records.push(record),
            Err(reason) => {
                return Err(BenchError::MalformedRecord {
                    source_name,
                    index,
                    reason,
                });
            }
        }
    }

    Ok(records)
}
