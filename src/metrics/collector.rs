//! Lock-free stream/byte counters and the periodic sampler that drains them
//!
//! Workers only ever touch the counters through [`MetricTracker`]; the sampler
//! is the single reader and swaps the byte counters to zero on every tick so
//! consecutive records cover disjoint windows.

use crate::metrics::record::MetricRecord;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Counter operations shared by every stream worker
pub trait MetricTracker: Send + Sync {
    /// Returns the active stream count after the increment
    fn add_incoming_stream(&self) -> u32;
    /// Returns the active stream count after the decrement
    fn sub_incoming_stream(&self) -> u32;
    /// Returns the since-last-tick total after the add
    fn add_bytes_read(&self, n: u64) -> u64;
    /// Returns the since-last-tick total after the add
    fn add_bytes_written(&self, n: u64) -> u64;
}

/// Collects stream and throughput counters and samples them on a fixed clock
#[derive(Debug, Default)]
pub struct MetricCollector {
    started: AtomicBool,
    active_streams: AtomicU32,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    last_timestamp: AtomicI64,
}

impl MetricCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live read of the active stream counter
    #[cfg(test)]
    pub fn active_streams(&self) -> u32 {
        self.active_streams.load(Ordering::Acquire)
    }

    /// Build one record, draining the byte counters
    pub fn collect(&self, probe: &mut dyn ResourceProbe) -> MetricRecord {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::AcqRel);
        let usage = probe.sample();

        MetricRecord {
            timestamp: now.max(previous),
            active_streams: self.active_streams.load(Ordering::Acquire),
            cpu_percentage: usage.cpu_percentage,
            memory_heap_bytes: usage.memory_heap_bytes,
            bytes_read: self.bytes_read.swap(0, Ordering::AcqRel),
            bytes_written: self.bytes_written.swap(0, Ordering::AcqRel),
        }
    }

    /// Spawn the sampler task
    ///
    /// The first tick fires one `interval` after the call. Late ticks are
    /// skipped rather than fired back to back. The task exits once `cancel`
    /// fires; a callback already running is allowed to finish.
    ///
    /// # Panics
    ///
    /// A collector can only be started once.
    pub fn start<F>(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
        mut probe: Box<dyn ResourceProbe>,
        mut callback: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(MetricRecord) + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            panic!("MetricCollector already started");
        }

        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Metric sampler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        callback(collector.collect(probe.as_mut()));
                    }
                }
            }
        })
    }
}

impl MetricTracker for MetricCollector {
    fn add_incoming_stream(&self) -> u32 {
        self.active_streams
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    fn sub_incoming_stream(&self) -> u32 {
        self.active_streams
            .fetch_sub(1, Ordering::AcqRel)
            .wrapping_sub(1)
    }

    fn add_bytes_read(&self, n: u64) -> u64 {
        self.bytes_read.fetch_add(n, Ordering::AcqRel).wrapping_add(n)
    }

    fn add_bytes_written(&self, n: u64) -> u64 {
        self.bytes_written.fetch_add(n, Ordering::AcqRel).wrapping_add(n)
    }
}

/// Tracker used when telemetry is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl MetricTracker for NoopTracker {
    fn add_incoming_stream(&self) -> u32 {
        0
    }

    fn sub_incoming_stream(&self) -> u32 {
        0
    }

    fn add_bytes_read(&self, _n: u64) -> u64 {
        0
    }

    fn add_bytes_written(&self, _n: u64) -> u64 {
        0
    }
}

/// Marks one stream as active for as long as the guard lives
pub struct StreamGuard {
    tracker: Arc<dyn MetricTracker>,
    number: u32,
}

impl StreamGuard {
    pub fn open(tracker: Arc<dyn MetricTracker>) -> Self {
        let number = tracker.add_incoming_stream();
        Self { tracker, number }
    }

    /// Active stream count observed when this stream was opened
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.tracker.sub_incoming_stream();
    }
}

/// Process resource usage at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceUsage {
    pub cpu_percentage: u32,
    pub memory_heap_bytes: u64,
}

/// Source of CPU and memory readings for the sampler
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceUsage;
}

/// Reads CPU and memory usage of the current process
///
/// CPU usage is divided by the number of logical cores. Whether the raw
/// reading can exceed 100% per core depends on the platform, so the
/// normalised value is an approximation. Memory is the resident set size.
pub struct ProcessProbe {
    system: System,
    pid: Option<Pid>,
    cores: u32,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            cores,
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcessProbe {
    fn sample(&mut self) -> ResourceUsage {
        let Some(pid) = self.pid else {
            return ResourceUsage::default();
        };

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match self.system.process(pid) {
            Some(process) => ResourceUsage {
                cpu_percentage: process.cpu_usage() as u32 / self.cores,
                memory_heap_bytes: process.memory(),
            },
            None => ResourceUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedProbe(ResourceUsage);

    impl ResourceProbe for FixedProbe {
        fn sample(&mut self) -> ResourceUsage {
            self.0
        }
    }

    fn fixed_probe() -> FixedProbe {
        FixedProbe(ResourceUsage {
            cpu_percentage: 12,
            memory_heap_bytes: 4096,
        })
    }

    #[test]
    fn test_counters_return_post_values() {
        let collector = MetricCollector::new();
        assert_eq!(collector.add_incoming_stream(), 1);
        assert_eq!(collector.add_incoming_stream(), 2);
        assert_eq!(collector.sub_incoming_stream(), 1);
        assert_eq!(collector.add_bytes_read(10), 10);
        assert_eq!(collector.add_bytes_read(5), 15);
        assert_eq!(collector.add_bytes_written(7), 7);
    }

    #[test]
    fn test_concurrent_open_close_returns_to_baseline() {
        let collector = Arc::new(MetricCollector::new());
        collector.add_incoming_stream();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let collector = Arc::clone(&collector);
                scope.spawn(move || {
                    for _ in 0..1_000 {
                        collector.add_incoming_stream();
                    }
                    for _ in 0..1_000 {
                        collector.sub_incoming_stream();
                    }
                });
            }
        });

        assert_eq!(collector.active_streams(), 1);
    }

    #[test]
    fn test_ticks_drain_bytes_without_double_counting() {
        let collector = MetricCollector::new();
        let mut probe = fixed_probe();

        collector.add_bytes_read(100);
        collector.add_bytes_written(30);
        let first = collector.collect(&mut probe);

        collector.add_bytes_read(50);
        let second = collector.collect(&mut probe);

        assert_eq!(first.bytes_read, 100);
        assert_eq!(first.bytes_written, 30);
        assert_eq!(second.bytes_read, 50);
        assert_eq!(second.bytes_written, 0);
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn test_collect_reads_streams_live() {
        let collector = MetricCollector::new();
        let mut probe = fixed_probe();
        collector.add_incoming_stream();
        collector.add_incoming_stream();

        let first = collector.collect(&mut probe);
        let second = collector.collect(&mut probe);

        // Active streams are not drained by a tick
        assert_eq!(first.active_streams, 2);
        assert_eq!(second.active_streams, 2);
        assert_eq!(first.cpu_percentage, 12);
        assert_eq!(first.memory_heap_bytes, 4096);
    }

    #[test]
    fn test_stream_guard_closes_on_every_path() {
        let collector = Arc::new(MetricCollector::new());
        let tracker: Arc<dyn MetricTracker> = collector.clone();

        let result: Result<(), &str> = (|| {
            let guard = StreamGuard::open(Arc::clone(&tracker));
            assert_eq!(guard.number(), 1);
            Err("stream failed")
        })();

        assert!(result.is_err());
        assert_eq!(collector.active_streams(), 0);
    }

    #[test]
    fn test_noop_tracker_discards() {
        let tracker = NoopTracker;
        assert_eq!(tracker.add_incoming_stream(), 0);
        assert_eq!(tracker.sub_incoming_stream(), 0);
        assert_eq!(tracker.add_bytes_read(100), 0);
        assert_eq!(tracker.add_bytes_written(100), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_emits_one_record_per_tick_until_cancelled() {
        let collector = Arc::new(MetricCollector::new());
        let records = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        collector.add_bytes_read(100);
        let sink = Arc::clone(&records);
        let handle = collector.start(
            Duration::from_secs(1),
            cancel.clone(),
            Box::new(fixed_probe()),
            move |record| sink.lock().unwrap().push(record),
        );

        // Nothing before the first full interval
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(records.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(records.lock().unwrap().len(), 1);
        collector.add_bytes_read(50);

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(records.lock().unwrap().len(), 3);

        // No tick fires after cancellation
        tokio::time::sleep(Duration::from_secs(5)).await;
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 3);
        let read: Vec<u64> = records.iter().map(|r| r.bytes_read).collect();
        assert_eq!(read, vec![100, 50, 0]);
        assert!(
            records
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
        );
    }

    #[tokio::test]
    #[should_panic(expected = "already started")]
    async fn test_double_start_panics() {
        let collector = Arc::new(MetricCollector::new());
        let cancel = CancellationToken::new();
        let _first = collector.start(
            Duration::from_secs(1),
            cancel.clone(),
            Box::new(fixed_probe()),
            |_| {},
        );
        let _second = collector.start(
            Duration::from_secs(1),
            cancel,
            Box::new(fixed_probe()),
            |_| {},
        );
    }

    #[test]
    fn test_process_probe_reports_memory() {
        let mut probe = ProcessProbe::new();
        let usage = probe.sample();
        assert!(usage.memory_heap_bytes > 0);
    }
}
