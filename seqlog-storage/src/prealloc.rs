//! Background pre-allocation of the next segment.
//!
//! The active segment carries five fill marks. The first time the index table
//! or the data region reaches one of them, the next segment is zero-filled in
//! the background as `<id+1>.emp`, so rotation usually only has to rename it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use seqlog_core::metrics::Metrics;

use crate::codec::SegmentLayout;
use crate::file::create_empty_segment;

/// Fill percentages that trigger pre-allocation.
pub const FILL_MARKS: [u64; 5] = [75, 80, 85, 90, 95];

#[derive(Debug, Clone, Copy)]
struct Mark {
    percent: u64,
    index_bytes: u64,
    data_bytes: u64,
    fired: bool,
}

/// At-most-once fill marks for the lifetime of one segment.
#[derive(Debug, Clone)]
pub struct FillThresholds {
    marks: [Mark; FILL_MARKS.len()],
}

impl FillThresholds {
    pub fn new(layout: &SegmentLayout) -> Self {
        let index_size = layout.index_size();
        let data_size = layout.data_size();
        Self {
            marks: FILL_MARKS.map(|percent| Mark {
                percent,
                index_bytes: index_size * percent / 100,
                data_bytes: data_size * percent / 100,
                fired: false,
            }),
        }
    }

    /// Re-arm every mark for a new segment.
    pub fn reset(&mut self) {
        for mark in &mut self.marks {
            mark.fired = false;
        }
    }

    /// Fire the lowest unfired mark reached by either cursor, returning its
    /// percentage. At most one mark fires per call.
    pub fn crossed(&mut self, index_used: u64, data_used: u64) -> Option<u64> {
        let mark = self
            .marks
            .iter_mut()
            .find(|m| !m.fired && (index_used >= m.index_bytes || data_used >= m.data_bytes))?;
        mark.fired = true;
        Some(mark.percent)
    }

    pub fn fired(&self) -> usize {
        self.marks.iter().filter(|m| m.fired).count()
    }
}

/// Spawns pre-allocation tasks, at most one per target path.
#[derive(Clone)]
pub struct Preallocator {
    layout: SegmentLayout,
    in_progress: Arc<Mutex<HashSet<PathBuf>>>,
    metrics: Metrics,
}

/// Clears the in-progress marker when the task ends, however it ends.
struct InProgress {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.set.lock().remove(&self.path);
    }
}

impl Preallocator {
    pub fn new(layout: SegmentLayout, metrics: Metrics) -> Self {
        Self {
            layout,
            in_progress: Arc::new(Mutex::new(HashSet::new())),
            metrics,
        }
    }

    pub fn is_in_progress(&self, path: &Path) -> bool {
        self.in_progress.lock().contains(path)
    }

    /// No allocation task is running.
    pub fn is_idle(&self) -> bool {
        self.in_progress.lock().is_empty()
    }

    /// Start allocating `path` in the background unless it already exists or
    /// another task is on it. Returns whether a task was started. Must be
    /// called from within a tokio runtime.
    pub fn schedule(&self, path: PathBuf) -> bool {
        {
            let mut set = self.in_progress.lock();
            if set.contains(&path) || path.exists() {
                return false;
            }
            set.insert(path.clone());
        }

        let guard = InProgress {
            set: Arc::clone(&self.in_progress),
            path,
        };
        let layout = self.layout;
        let metrics = self.metrics.clone();
        metrics.record_preallocation_started();

        tokio::task::spawn_blocking(move || {
            let guard = guard;
            match create_empty_segment(&guard.path, &layout) {
                Ok(()) => {
                    metrics.record_preallocation_completed();
                    debug!("Pre-allocated segment {:?}", guard.path);
                }
                Err(e) => warn!("Pre-allocating {:?} failed: {}", guard.path, e),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn layout() -> SegmentLayout {
        SegmentLayout {
            segment_size: 26 + 100 * 32 + 1000,
            index_slots: 100,
        }
    }

    #[test]
    fn test_marks_fire_once_in_order() {
        let mut thresholds = FillThresholds::new(&layout());

        assert_eq!(thresholds.crossed(0, 0), None);
        assert_eq!(thresholds.crossed(0, 749), None);
        assert_eq!(thresholds.crossed(0, 750), Some(75));
        assert_eq!(thresholds.crossed(0, 750), None);
        // a jump past several marks fires them one call at a time
        assert_eq!(thresholds.crossed(0, 990), Some(80));
        assert_eq!(thresholds.crossed(0, 990), Some(85));
        assert_eq!(thresholds.fired(), 3);
    }

    #[test]
    fn test_index_fill_counts_too() {
        let mut thresholds = FillThresholds::new(&layout());
        // 76 slots of 32 bytes against a 3200 byte table
        assert_eq!(thresholds.crossed(76 * 32, 0), Some(75));

        thresholds.reset();
        assert_eq!(thresholds.fired(), 0);
        assert_eq!(thresholds.crossed(76 * 32, 0), Some(75));
    }

    #[tokio::test]
    async fn test_schedule_is_deduplicated() {
        let dir = TempDir::new().unwrap();
        let metrics = Metrics::new();
        let prealloc = Preallocator::new(layout(), metrics.clone());
        let path = dir.path().join("2.emp");

        let started = (0..8).filter(|_| prealloc.schedule(path.clone())).count();
        assert_eq!(started, 1);

        while prealloc.is_in_progress(&path) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(crate::file::is_complete_segment(&path, &layout()));
        assert!(!prealloc.schedule(path.clone()), "existing file is not rebuilt");

        let snap = metrics.snapshot();
        assert_eq!(snap.preallocations_started, 1);
        assert_eq!(snap.preallocations_completed, 1);
    }
}
