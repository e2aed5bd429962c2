//! Startup recovery.
//!
//! Every `<id>.dat` file is validated by walking its index slots from the
//! last occupied one backward until a slot's payload matches its SHA-1. Slots
//! after the first match are a torn tail: the index is rewritten without them
//! and the file is validated again from scratch.
//!
//! ```text
//!   slots:  [1 ✓][2 ✓][3 ✓][4 ✗][5 ✗]      data region: 1 2 3 4?
//!                          └── first match walking back from 5
//!   heal:   capacity := 3, tsN := today, zero slots 4..
//!   redo:   [1 ✓][2 ✓][3 ✓]                 -> block [1, 3]
//! ```

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use seqlog_core::config::{HEADER_SIZE, SLOT_SIZE};
use seqlog_core::crypto::Digest;
use seqlog_core::error::{Error, Result, ResultExt};
use seqlog_core::metrics::{Metrics, Timer};

use crate::block::{Block, BlockIndex, Entry};
use crate::codec::{
    decode_index_table, encode_capacity, today, Header, IndexSlot,
    SegmentLayout, CAPACITY_OFFSET, INDEX_OFFSET, TSN_OFFSET,
};
use crate::file::{list_segments, open_read, open_rw, read_exact_at, write_all_at};

/// What recovery learned about the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Recovered {
    /// Id for the next segment to create.
    pub next_id: u64,
    /// Highest verified offset across all segments, 0 if none.
    pub last_offset: u64,
}

/// Index slots of one segment, split into the consecutive prefix that could
/// be valid and the count of occupied slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlotScan {
    pub prefix: Vec<(Entry, Digest)>,
    pub occupied: usize,
}

/// Walk the decoded table. The prefix stops at the first slot that is vacant,
/// breaks the offset sequence, or runs past the data region.
pub(crate) fn scan_slots(slots: &[IndexSlot], layout: &SegmentLayout) -> SlotScan {
    let occupied = slots
        .iter()
        .rposition(|s| !s.is_vacant())
        .map_or(0, |last| last + 1);

    let mut prefix = Vec::with_capacity(occupied);
    let mut data_offset = 0u64;
    for (i, slot) in slots.iter().enumerate().take(occupied) {
        if slot.is_vacant() {
            break;
        }
        if i > 0 && slot.offset != slots[0].offset.wrapping_add(i as u64) {
            break;
        }
        let end = data_offset + slot.length as u64;
        if end > layout.data_size() {
            break;
        }
        prefix.push((Entry::new(slot.offset, data_offset, slot.length), slot.digest));
        data_offset = end;
    }

    SlotScan { prefix, occupied }
}

#[derive(Debug)]
enum Validation {
    Verified { entries: Vec<Entry>, healed: bool },
    Unverifiable { details: String },
}

struct SegmentImage {
    header: Header,
    scan: SlotScan,
    file_len: u64,
}

fn read_image(file: &File, path: &Path, layout: &SegmentLayout) -> Result<Option<SegmentImage>> {
    let file_len = file
        .metadata()
        .with_context(|| format!("stat file {}", path.display()))?
        .len();
    if file_len < layout.data_offset() {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE as usize];
    read_exact_at(file, &mut header, CAPACITY_OFFSET)
        .with_context(|| format!("read meta of file {}", path.display()))?;

    let mut index = vec![0u8; layout.index_size() as usize];
    read_exact_at(file, &mut index, INDEX_OFFSET)
        .with_context(|| format!("read index of file {}", path.display()))?;

    Ok(Some(SegmentImage {
        header: Header::decode(&header),
        scan: scan_slots(&decode_index_table(&index), layout),
        file_len,
    }))
}

/// Number of prefix entries, counted from the front, up to and including the
/// last one whose payload still matches its digest.
fn verified_len(
    file: &File,
    path: &Path,
    layout: &SegmentLayout,
    prefix: &[(Entry, Digest)],
) -> Result<usize> {
    for (k, (entry, digest)) in prefix.iter().enumerate().rev() {
        let mut raw = vec![0u8; entry.length as usize];
        match read_exact_at(file, &mut raw, layout.data_position(entry.data_offset)) {
            Ok(()) => {}
            // payload never made it to disk
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => continue,
            Err(e) => {
                return Err(Error::io(
                    format!("read offset {} in file {}: {}", entry.offset, path.display(), e),
                    e,
                ))
            }
        }
        if digest.matches(&raw) {
            return Ok(k + 1);
        }
    }
    Ok(0)
}

/// Validate one segment, healing a torn tail in place. Only the newest
/// segment may be reset to empty, and only when its single occupied slot is
/// the one that failed: every earlier slot was acknowledged after an fsync.
fn validate_segment(path: &Path, layout: &SegmentLayout, is_tail: bool) -> Result<Validation> {
    let mut healed = false;

    // a heal leaves the file consistent, so the pass after it verifies
    for _ in 0..layout.index_slots as usize + 2 {
        let file = open_read(path)?;
        let image = match read_image(&file, path, layout)? {
            Some(image) => image,
            None => {
                return Ok(Validation::Unverifiable {
                    details: format!(
                        "file is shorter than its {} byte header and index",
                        layout.data_offset()
                    ),
                })
            }
        };
        if image.file_len > layout.segment_size {
            return Ok(Validation::Unverifiable {
                details: format!(
                    "file is {} bytes, larger than the {} byte segment size",
                    image.file_len, layout.segment_size
                ),
            });
        }

        let keep = verified_len(&file, path, layout, &image.scan.prefix)?;
        drop(file);

        let torn_first_write = is_tail && image.scan.occupied <= 1;
        if keep == 0 && image.scan.occupied > 0 && !torn_first_write {
            return Ok(Validation::Unverifiable {
                details: format!("none of {} occupied index slots verifies", image.scan.occupied),
            });
        }

        let entries: Vec<Entry> = image.scan.prefix[..keep].iter().map(|(e, _)| *e).collect();
        let torn = keep < image.scan.occupied;
        let stale_capacity = image.header.capacity as usize != keep;
        let short = image.file_len < layout.segment_size;

        if torn || stale_capacity || short {
            if torn {
                warn!(
                    "Discarding {} torn index slot(s) in {:?}",
                    image.scan.occupied - keep,
                    path
                );
            }
            erase_invalid_index(path, layout, &entries)?;
            healed = true;
            continue;
        }

        return Ok(Validation::Verified { entries, healed });
    }

    Err(Error::corruption(path, "self-heal did not converge"))
}

/// Rewrite the header and index so that only `entries` remain, restoring the
/// file to its full size.
fn erase_invalid_index(path: &Path, layout: &SegmentLayout, entries: &[Entry]) -> Result<()> {
    let file = open_rw(path)?;
    let file_len = file
        .metadata()
        .with_context(|| format!("stat file {}", path.display()))?
        .len();

    if file_len < layout.segment_size {
        file.set_len(layout.segment_size)
            .with_context(|| format!("extend file {}", path.display()))?;
    }

    let (min_offset, max_offset) = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => (first.offset, last.offset),
        _ => (0, 0),
    };
    write_all_at(&file, &encode_capacity(min_offset, max_offset), CAPACITY_OFFSET)
        .with_context(|| format!("write capacity into file {}", path.display()))?;
    write_all_at(&file, &today(), TSN_OFFSET)
        .with_context(|| format!("write tsN into file {}", path.display()))?;

    let kept = entries.len() as u64;
    let empty = vec![0u8; ((layout.index_slots as u64 - kept) * SLOT_SIZE) as usize];
    write_all_at(&file, &empty, layout.slot_position(kept as u32))
        .with_context(|| format!("write empty index into file {}", path.display()))?;

    file.sync_all()
        .with_context(|| format!("sync file {}", path.display()))?;
    Ok(())
}

/// Validate every segment in `dir` and load the survivors into `blocks`.
pub(crate) fn recover(
    dir: &Path,
    layout: &SegmentLayout,
    skip_corrupt: bool,
    blocks: &BlockIndex,
    metrics: &Metrics,
) -> Result<Recovered> {
    let timer = Timer::new("recovery");
    let segments: Vec<(u64, PathBuf)> = list_segments(dir)?;
    let tail_id = segments.last().map(|(id, _)| *id);

    for (id, path) in &segments {
        let is_tail = Some(*id) == tail_id;
        match validate_segment(path, layout, is_tail)? {
            Validation::Verified { entries, healed } => {
                if healed {
                    warn!("Segment {:?} self-healed to {} entries", path, entries.len());
                }
                metrics.record_segment_recovered(healed);
                blocks.append_and_sort(Block::new(*id, path.clone(), open_read(path)?, entries));
            }
            Validation::Unverifiable { details } if skip_corrupt => {
                warn!("Skipping segment {:?}: {}", path, details);
                metrics.record_segment_skipped();
            }
            Validation::Unverifiable { details } => {
                return Err(Error::corruption(path, details));
            }
        }
    }

    blocks.check_ranges()?;

    let last_offset = blocks.max_offset().unwrap_or(0);
    let next_id = tail_id.map_or(1, |id| id + 1);

    info!(
        "Recovered {} segment(s) from {:?}: last_offset={}",
        blocks.len(),
        dir,
        last_offset
    );
    timer.stop();

    Ok(Recovered {
        next_id,
        last_offset,
    })
}
