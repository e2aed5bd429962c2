//! Read-only segment diagnostics.
//!
//! Nothing here verifies digests or heals files; it reports what the headers
//! and index tables currently say, so it is safe to run next to a live log.

use std::fmt;
use std::path::{Path, PathBuf};

use seqlog_core::config::HEADER_SIZE;
use seqlog_core::error::{Error, Result, ResultExt};

use crate::codec::{decode_index_table, Header, SegmentLayout, CAPACITY_OFFSET, INDEX_OFFSET};
use crate::file::{list_segments, open_read, read_exact_at};
use crate::recovery::scan_slots;

/// What one segment file holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub id: u64,
    pub path: PathBuf,
    /// Entry count recorded in the header.
    pub capacity: u32,
    pub created: String,
    pub updated: String,
    /// 0 when the segment is empty.
    pub min_offset: u64,
    pub max_offset: u64,
    pub entries: usize,
    /// Occupied slots past the consecutive run, left by a torn write.
    pub torn_slots: usize,
    pub remaining_slots: u32,
    pub remaining_data: u64,
}

impl fmt::Display for SegmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kb = self.remaining_data as f64 / 1024.0;
        write!(
            f,
            "{} Capacity: {} MinOffset: {} MaxOffset: {} LeftIndex: {} LeftData: {:.2}KB {:.2}MB Created: {} Updated: {}",
            self.path.display(),
            self.capacity,
            self.min_offset,
            self.max_offset,
            self.remaining_slots,
            kb,
            kb / 1024.0,
            self.created,
            self.updated,
        )?;
        if self.torn_slots > 0 {
            write!(f, " Torn: {}", self.torn_slots)?;
        }
        Ok(())
    }
}

/// Summarize every segment in `dir`, ascending by id.
pub fn inspect(dir: &Path, layout: &SegmentLayout) -> Result<Vec<SegmentSummary>> {
    list_segments(dir)?
        .into_iter()
        .map(|(id, path)| summarize(id, path, layout))
        .collect()
}

fn summarize(id: u64, path: PathBuf, layout: &SegmentLayout) -> Result<SegmentSummary> {
    let file = open_read(&path)?;
    let file_len = file
        .metadata()
        .with_context(|| format!("stat file {}", path.display()))?
        .len();
    if file_len < layout.data_offset() {
        return Err(Error::corruption(
            &path,
            format!("{} bytes is shorter than header and index", file_len),
        ));
    }

    let mut raw = [0u8; HEADER_SIZE as usize];
    read_exact_at(&file, &mut raw, CAPACITY_OFFSET)
        .with_context(|| format!("read meta of file {}", path.display()))?;
    let header = Header::decode(&raw);

    let mut index = vec![0u8; layout.index_size() as usize];
    read_exact_at(&file, &mut index, INDEX_OFFSET)
        .with_context(|| format!("read index of file {}", path.display()))?;
    let scan = scan_slots(&decode_index_table(&index), layout);

    let first = scan.prefix.first().map(|(e, _)| *e);
    let last = scan.prefix.last().map(|(e, _)| *e);

    Ok(SegmentSummary {
        id,
        path,
        capacity: header.capacity,
        created: header.created,
        updated: header.updated,
        min_offset: first.map_or(0, |e| e.offset),
        max_offset: last.map_or(0, |e| e.offset),
        entries: scan.prefix.len(),
        torn_slots: scan.occupied - scan.prefix.len(),
        remaining_slots: layout.index_slots - scan.prefix.len() as u32,
        remaining_data: layout.data_size() - last.map_or(0, |e| e.end()),
    })
}
