//! # Metrics and Monitoring
//!
//! Counters describing what a log instance has done since it was opened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Write metrics
    writes: AtomicU64,
    bytes_written: AtomicU64,
    rejected_writes: AtomicU64,

    // Read metrics
    reads: AtomicU64,
    read_misses: AtomicU64,

    // Segment lifecycle
    rotations: AtomicU64,
    preallocations_started: AtomicU64,
    preallocations_completed: AtomicU64,

    // Recovery
    segments_recovered: AtomicU64,
    segments_healed: AtomicU64,
    segments_skipped: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a durable write
    pub fn record_write(&self, bytes: u64) {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a write refused before reaching the writer
    pub fn record_rejected_write(&self) {
        self.inner.rejected_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, hit: bool) {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        if !hit {
            self.inner.read_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rotation(&self) {
        self.inner.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preallocation_started(&self) {
        self.inner.preallocations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preallocation_completed(&self) {
        self.inner.preallocations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_recovered(&self, healed: bool) {
        self.inner.segments_recovered.fetch_add(1, Ordering::Relaxed);
        if healed {
            self.inner.segments_healed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_segment_skipped(&self) {
        self.inner.segments_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes: self.inner.writes.load(Ordering::Relaxed),
            bytes_written: self.inner.bytes_written.load(Ordering::Relaxed),
            rejected_writes: self.inner.rejected_writes.load(Ordering::Relaxed),
            reads: self.inner.reads.load(Ordering::Relaxed),
            read_misses: self.inner.read_misses.load(Ordering::Relaxed),
            rotations: self.inner.rotations.load(Ordering::Relaxed),
            preallocations_started: self.inner.preallocations_started.load(Ordering::Relaxed),
            preallocations_completed: self.inner.preallocations_completed.load(Ordering::Relaxed),
            segments_recovered: self.inner.segments_recovered.load(Ordering::Relaxed),
            segments_healed: self.inner.segments_healed.load(Ordering::Relaxed),
            segments_skipped: self.inner.segments_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub writes: u64,
    pub bytes_written: u64,
    pub rejected_writes: u64,
    pub reads: u64,
    pub read_misses: u64,
    pub rotations: u64,
    pub preallocations_started: u64,
    pub preallocations_completed: u64,
    pub segments_recovered: u64,
    pub segments_healed: u64,
    pub segments_skipped: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start new timer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) {
        let duration = self.elapsed();
        tracing::debug!(
            name = %self.name,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = Metrics::new();
        metrics.record_write(10);
        metrics.record_write(5);
        metrics.record_read(true);
        metrics.record_read(false);
        metrics.record_segment_recovered(true);
        metrics.record_segment_recovered(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.writes, 2);
        assert_eq!(snap.bytes_written, 15);
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.read_misses, 1);
        assert_eq!(snap.segments_recovered, 2);
        assert_eq!(snap.segments_healed, 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let other = metrics.clone();
        other.record_rotation();
        assert_eq!(metrics.snapshot().rotations, 1);
    }
}
