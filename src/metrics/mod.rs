//! Telemetry for p2p-bench
//!
//! This module provides the whole metrics pipeline:
//! - Lock-free stream and throughput counters fed by the workers
//! - A periodic sampler producing one record per tick
//! - Console and durable CSV sinks
//! - Cross-run aggregation and the comparison report

pub mod aggregate;
pub mod collector;
pub mod record;
pub mod reporting;
pub mod sink;

// Re-export public types for easier access
pub use collector::{MetricTracker, StreamGuard};
pub use sink::Telemetry;
