//! The single writer.
//!
//! Owns the active segment and every cursor into it. Exactly one task drives
//! a `SegmentWriter`, so header, index and data updates never interleave.
//!
//! Per payload:
//! 1. rotate if the slot or the bytes do not fit
//! 2. assign `last_offset + 1`
//! 3. write capacity, tsN, index slot, payload (in that order)
//! 4. fsync, then publish the entry to the block index

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use seqlog_core::config::SLOT_SIZE;
use seqlog_core::error::{Error, Result, ResultExt};
use seqlog_core::metrics::Metrics;

use crate::block::{Block, BlockIndex, Entry};
use crate::codec::{encode_capacity, today, IndexSlot, SegmentLayout, CAPACITY_OFFSET, TSN_OFFSET};
use crate::file::{
    create_empty_segment, empty_segment_path, is_complete_segment, open_read, open_rw, rename,
    segment_path, write_all_at,
};
use crate::prealloc::{FillThresholds, Preallocator};
use crate::recovery::Recovered;

/// The segment currently open for writing.
struct ActiveSegment {
    id: u64,
    path: PathBuf,
    file: File,
    min_offset: u64,
    max_offset: u64,
    /// Slots used in the index table.
    index_cursor: u32,
    /// Bytes used in the data region.
    data_cursor: u64,
}

impl ActiveSegment {
    fn fresh(id: u64, path: PathBuf, file: File) -> Self {
        Self {
            id,
            path,
            file,
            min_offset: 0,
            max_offset: 0,
            index_cursor: 0,
            data_cursor: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.index_cursor == 0
    }
}

pub(crate) struct SegmentWriter {
    dir: PathBuf,
    layout: SegmentLayout,
    active: ActiveSegment,
    last_offset: u64,
    published: Arc<AtomicU64>,
    blocks: Arc<BlockIndex>,
    thresholds: FillThresholds,
    prealloc: Preallocator,
    poll_interval: Duration,
    metrics: Metrics,
}

impl SegmentWriter {
    /// Continue writing into the recovered tail block, or start a new
    /// segment when the directory is empty or its newest file was skipped.
    pub(crate) fn resume(
        dir: &Path,
        layout: SegmentLayout,
        recovered: Recovered,
        blocks: Arc<BlockIndex>,
        published: Arc<AtomicU64>,
        poll_interval: Duration,
        metrics: Metrics,
    ) -> Result<Self> {
        // a skipped newest file is never written over
        let tail = blocks.last().filter(|tail| tail.id + 1 == recovered.next_id);
        let active = match tail {
            Some(tail) => ActiveSegment {
                id: tail.id,
                file: open_rw(&tail.path)?,
                path: tail.path,
                min_offset: tail.min_offset,
                max_offset: tail.max_offset,
                index_cursor: tail.entries as u32,
                data_cursor: tail.last_entry.map_or(0, |e| e.end()),
            },
            None => {
                let path = install_segment(dir, recovered.next_id, &layout)?;
                let active = ActiveSegment::fresh(recovered.next_id, path.clone(), open_rw(&path)?);
                let first = blocks.is_empty();
                blocks.append(Block::empty(recovered.next_id, path.clone(), open_read(&path)?));
                if first {
                    info!("Created segment {:?}", path);
                } else {
                    warn!("Newest segment was skipped, continuing in {:?}", path);
                }
                active
            }
        };

        published.store(recovered.last_offset, Ordering::Release);

        Ok(Self {
            dir: dir.to_path_buf(),
            thresholds: FillThresholds::new(&layout),
            prealloc: Preallocator::new(layout, metrics.clone()),
            layout,
            active,
            last_offset: recovered.last_offset,
            published,
            blocks,
            poll_interval,
            metrics,
        })
    }

    fn fits(&self, len: u64) -> bool {
        self.active.index_cursor < self.layout.index_slots
            && self.active.data_cursor + len <= self.layout.data_size()
    }

    /// Append one payload and return its offset once it is durable.
    pub(crate) async fn append(&mut self, payload: &[u8]) -> Result<u64> {
        if !self.fits(payload.len() as u64) {
            self.rotate().await?;
        }

        let offset = self.last_offset + 1;
        if self.active.is_empty() {
            self.active.min_offset = offset;
        }
        self.active.max_offset = offset;

        self.write_entry(offset, payload)?;
        Ok(offset)
    }

    fn write_entry(&mut self, offset: u64, payload: &[u8]) -> Result<()> {
        let active = &mut self.active;
        let slot = IndexSlot::for_payload(offset, payload);
        let path = &active.path;

        write_all_at(
            &active.file,
            &encode_capacity(active.min_offset, active.max_offset),
            CAPACITY_OFFSET,
        )
        .with_context(|| format!("write capacity into file {}", path.display()))?;
        write_all_at(&active.file, &today(), TSN_OFFSET)
            .with_context(|| format!("write tsN into file {}", path.display()))?;
        write_all_at(
            &active.file,
            &slot.encode(),
            self.layout.slot_position(active.index_cursor),
        )
        .with_context(|| format!("write index into file {}", path.display()))?;
        write_all_at(
            &active.file,
            payload,
            self.layout.data_position(active.data_cursor),
        )
        .with_context(|| format!("write data into file {}", path.display()))?;
        active
            .file
            .sync_all()
            .with_context(|| format!("sync file {}", path.display()))?;

        self.blocks.update_last(
            Entry::new(offset, active.data_cursor, payload.len() as u32),
            active.min_offset,
            active.max_offset,
        );
        active.index_cursor += 1;
        active.data_cursor += payload.len() as u64;

        self.last_offset = offset;
        self.published.store(offset, Ordering::Release);
        self.metrics.record_write(payload.len() as u64);

        self.check_thresholds();
        Ok(())
    }

    fn check_thresholds(&mut self) {
        let index_used = self.active.index_cursor as u64 * SLOT_SIZE;
        if let Some(percent) = self.thresholds.crossed(index_used, self.active.data_cursor) {
            let next = empty_segment_path(&self.dir, self.active.id + 1);
            if self.prealloc.schedule(next) {
                info!(
                    "Segment {} is {}% full, pre-allocating segment {}",
                    self.active.id,
                    percent,
                    self.active.id + 1
                );
            }
        }
    }

    /// Retire the active segment and start the next one.
    async fn rotate(&mut self) -> Result<()> {
        self.active
            .file
            .sync_all()
            .with_context(|| format!("sync file {}", self.active.path.display()))?;

        let id = self.active.id + 1;
        let empty = empty_segment_path(&self.dir, id);
        while self.prealloc.is_in_progress(&empty) {
            tokio::time::sleep(self.poll_interval).await;
        }

        let path = install_segment(&self.dir, id, &self.layout)?;
        // replacing the segment closes the old write handle
        self.active = ActiveSegment::fresh(id, path.clone(), open_rw(&path)?);
        self.blocks.append(Block::empty(id, path.clone(), open_read(&path)?));
        self.thresholds.reset();
        self.metrics.record_rotation();

        info!("Rotated to segment {:?}, next offset {}", path, self.last_offset + 1);
        Ok(())
    }

    /// Let background allocation settle and flush the active segment before
    /// the writer goes away.
    pub(crate) async fn finish(&self) -> Result<()> {
        while !self.prealloc.is_idle() {
            tokio::time::sleep(self.poll_interval).await;
        }
        self.active
            .file
            .sync_all()
            .with_context(|| format!("sync file {}", self.active.path.display()))
    }
}

/// Bring segment `id` into service as `<id>.dat`: rename a complete
/// pre-allocated file, or build one now.
fn install_segment(dir: &Path, id: u64, layout: &SegmentLayout) -> Result<PathBuf> {
    let empty = empty_segment_path(dir, id);
    let path = segment_path(dir, id);
    if path.exists() {
        return Err(Error::corruption(&path, "segment file already exists"));
    }

    if empty.exists() && !is_complete_segment(&empty, layout) {
        warn!("Removing incomplete pre-allocated segment {:?}", empty);
        std::fs::remove_file(&empty)
            .with_context(|| format!("remove file {}", empty.display()))?;
    }
    if !empty.exists() {
        create_empty_segment(&empty, layout)?;
    }

    rename(&empty, &path)?;
    Ok(path)
}
