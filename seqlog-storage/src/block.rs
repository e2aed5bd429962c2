//! In-memory block index.
//!
//! One [`Block`] per segment file, ordered by offset range. Ranges are
//! contiguous and never overlap; only the tail block grows. Readers take the
//! shared lock just long enough to locate an entry, then read the payload
//! through the block's own handle without holding it.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use seqlog_core::error::{Error, Result, ResultExt};

use crate::codec::SegmentLayout;
use crate::file::read_exact_at;

/// Location of one payload inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub offset: u64,
    /// Position relative to the start of the data region.
    pub data_offset: u64,
    pub length: u32,
}

impl Entry {
    pub fn new(offset: u64, data_offset: u64, length: u32) -> Self {
        Self {
            offset,
            data_offset,
            length,
        }
    }

    /// First data-region byte after this payload.
    pub fn end(&self) -> u64 {
        self.data_offset + self.length as u64
    }
}

/// Descriptor of one segment file.
pub struct Block {
    pub id: u64,
    pub path: PathBuf,
    file: Arc<File>,
    pub min_offset: u64,
    pub max_offset: u64,
    entries: Vec<Entry>,
}

impl Block {
    /// A recovered block. `entries` must be consecutive offsets.
    pub fn new(id: u64, path: PathBuf, file: File, entries: Vec<Entry>) -> Self {
        let min_offset = entries.first().map_or(0, |e| e.offset);
        let max_offset = entries.last().map_or(0, |e| e.offset);
        Self {
            id,
            path,
            file: Arc::new(file),
            min_offset,
            max_offset,
            entries,
        }
    }

    pub fn empty(id: u64, path: PathBuf, file: File) -> Self {
        Self::new(id, path, file, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, offset: u64) -> bool {
        !self.is_empty() && offset >= self.min_offset && offset <= self.max_offset
    }

    pub fn entry(&self, offset: u64) -> Option<&Entry> {
        if !self.contains(offset) {
            return None;
        }
        self.entries.get((offset - self.min_offset) as usize)
    }

    pub fn last_entry(&self) -> Option<&Entry> {
        self.entries.last()
    }

    fn sort_key(&self) -> (bool, u64, u64) {
        // empty blocks only ever appear at the tail
        (self.is_empty(), self.min_offset, self.id)
    }
}

/// Summary of the tail block, detached from the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: u64,
    pub path: PathBuf,
    pub min_offset: u64,
    pub max_offset: u64,
    pub entries: usize,
    pub last_entry: Option<Entry>,
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        Self {
            id: block.id,
            path: block.path.clone(),
            min_offset: block.min_offset,
            max_offset: block.max_offset,
            entries: block.len(),
            last_entry: block.last_entry().copied(),
        }
    }
}

/// Ordered collection of blocks shared by the writer and readers.
pub struct BlockIndex {
    layout: SegmentLayout,
    blocks: RwLock<Vec<Block>>,
    closed: AtomicBool,
}

impl BlockIndex {
    pub fn new(layout: SegmentLayout) -> Self {
        Self {
            layout,
            blocks: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a recovered block, keeping the collection ordered by range.
    pub fn append_and_sort(&self, block: Block) {
        let mut blocks = self.blocks.write();
        blocks.push(block);
        blocks.sort_by_key(Block::sort_key);
    }

    /// Insert a freshly created block as the new tail.
    pub fn append(&self, block: Block) {
        self.blocks.write().push(block);
    }

    pub fn last(&self) -> Option<BlockInfo> {
        self.blocks.read().last().map(BlockInfo::from)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Highest offset held by any block.
    pub fn max_offset(&self) -> Option<u64> {
        self.blocks
            .read()
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| b.max_offset)
            .max()
    }

    /// Record a newly written entry against the tail block.
    pub fn update_last(&self, entry: Entry, min_offset: u64, max_offset: u64) {
        let mut blocks = self.blocks.write();
        if let Some(last) = blocks.last_mut() {
            last.entries.push(entry);
            last.min_offset = min_offset;
            last.max_offset = max_offset;
        }
    }

    /// Verify that recovered ranges do not overlap. Gaps (left by skipped
    /// segments) are reported but tolerated.
    pub fn check_ranges(&self) -> Result<()> {
        let blocks = self.blocks.read();
        let mut prev: Option<&Block> = None;
        for block in blocks.iter().filter(|b| !b.is_empty()) {
            if let Some(prev) = prev {
                if block.min_offset <= prev.max_offset {
                    return Err(Error::corruption(
                        &block.path,
                        format!(
                            "offsets [{}, {}] overlap segment {} [{}, {}]",
                            block.min_offset,
                            block.max_offset,
                            prev.id,
                            prev.min_offset,
                            prev.max_offset
                        ),
                    ));
                }
                if block.min_offset != prev.max_offset + 1 {
                    warn!(
                        "Offsets {}..{} are missing between segments {} and {}",
                        prev.max_offset + 1,
                        block.min_offset - 1,
                        prev.id,
                        block.id
                    );
                }
            }
            prev = Some(block);
        }
        Ok(())
    }

    /// Locate the entry for `offset` and the handle to read it through.
    fn locate(&self, offset: u64) -> Result<(Arc<File>, PathBuf, Entry)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let blocks = self.blocks.read();
        let idx = blocks.partition_point(|b| !b.is_empty() && b.max_offset < offset);
        let block = blocks
            .get(idx)
            .filter(|b| b.contains(offset))
            .ok_or(Error::NotFound { offset })?;
        let entry = *block.entry(offset).ok_or(Error::NotFound { offset })?;

        Ok((Arc::clone(&block.file), block.path.clone(), entry))
    }

    /// Read the payload stored at `offset`.
    pub fn get(&self, offset: u64) -> Result<Bytes> {
        let (file, path, entry) = self.locate(offset)?;

        let mut buf = vec![0u8; entry.length as usize];
        read_exact_at(&file, &mut buf, self.layout.data_position(entry.data_offset))
            .with_context(|| format!("read offset {} in file {}", offset, path.display()))?;
        Ok(Bytes::from(buf))
    }

    /// Every stored payload in ascending offset order.
    pub fn dump(&self) -> Result<Vec<Bytes>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        // copy the handles so the writer can publish while files are read
        let snapshot: Vec<(Arc<File>, PathBuf, Vec<Entry>)> = self
            .blocks
            .read()
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| (Arc::clone(&b.file), b.path.clone(), b.entries.clone()))
            .collect();

        let mut payloads = Vec::with_capacity(snapshot.iter().map(|(_, _, e)| e.len()).sum());
        for (file, path, entries) in &snapshot {
            for entry in entries {
                let mut buf = vec![0u8; entry.length as usize];
                read_exact_at(file, &mut buf, self.layout.data_position(entry.data_offset))
                    .with_context(|| {
                        format!("read offset {} in file {}", entry.offset, path.display())
                    })?;
                payloads.push(Bytes::from(buf));
            }
        }
        Ok(payloads)
    }

    /// Release every read handle. Later lookups fail with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.blocks.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::write_all_at;
    use tempfile::TempDir;

    fn layout() -> SegmentLayout {
        SegmentLayout {
            segment_size: 1024,
            index_slots: 4,
        }
    }

    /// Block over a scratch file holding `payloads` starting at `first`.
    fn block_with(dir: &TempDir, id: u64, first: u64, payloads: &[&[u8]]) -> Block {
        let path = dir.path().join(format!("{}.dat", id));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        file.set_len(layout().segment_size).unwrap();

        let mut entries = Vec::new();
        let mut data_offset = 0;
        for (i, payload) in payloads.iter().enumerate() {
            write_all_at(&file, payload, layout().data_position(data_offset)).unwrap();
            entries.push(Entry::new(first + i as u64, data_offset, payload.len() as u32));
            data_offset += payload.len() as u64;
        }
        Block::new(id, path, file, entries)
    }

    #[test]
    fn test_get_across_blocks() {
        let dir = TempDir::new().unwrap();
        let index = BlockIndex::new(layout());
        index.append_and_sort(block_with(&dir, 2, 3, &[b"ccc", b"dddd"]));
        index.append_and_sort(block_with(&dir, 1, 1, &[b"a", b"bb"]));

        assert_eq!(index.get(1).unwrap(), Bytes::from_static(b"a"));
        assert_eq!(index.get(2).unwrap(), Bytes::from_static(b"bb"));
        assert_eq!(index.get(3).unwrap(), Bytes::from_static(b"ccc"));
        assert_eq!(index.get(4).unwrap(), Bytes::from_static(b"dddd"));
        assert!(matches!(index.get(0), Err(Error::NotFound { offset: 0 })));
        assert!(matches!(index.get(5), Err(Error::NotFound { offset: 5 })));
        assert_eq!(index.last().unwrap().id, 2);
        index.check_ranges().unwrap();
    }

    #[test]
    fn test_update_last_extends_tail() {
        let dir = TempDir::new().unwrap();
        let index = BlockIndex::new(layout());
        index.append_and_sort(block_with(&dir, 1, 1, &[b"a"]));

        let tail = block_with(&dir, 2, 0, &[]);
        write_all_at(&tail.file, b"zz", layout().data_position(0)).unwrap();
        index.append(tail);
        assert!(matches!(index.get(2), Err(Error::NotFound { .. })));

        index.update_last(Entry::new(2, 0, 2), 2, 2);
        let last = index.last().unwrap();
        assert_eq!((last.min_offset, last.max_offset, last.entries), (2, 2, 1));
        assert_eq!(index.get(2).unwrap(), Bytes::from_static(b"zz"));
    }

    #[test]
    fn test_empty_block_sorts_last() {
        let dir = TempDir::new().unwrap();
        let index = BlockIndex::new(layout());
        index.append_and_sort(block_with(&dir, 3, 0, &[]));
        index.append_and_sort(block_with(&dir, 2, 1, &[b"x"]));

        assert_eq!(index.last().unwrap().id, 3);
        assert_eq!(index.get(1).unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_overlapping_ranges_are_corruption() {
        let dir = TempDir::new().unwrap();
        let index = BlockIndex::new(layout());
        index.append_and_sort(block_with(&dir, 1, 1, &[b"a", b"b"]));
        index.append_and_sort(block_with(&dir, 2, 2, &[b"c"]));

        assert!(matches!(index.check_ranges(), Err(Error::Corruption { .. })));
    }

    #[test]
    fn test_dump_and_close() {
        let dir = TempDir::new().unwrap();
        let index = BlockIndex::new(layout());
        index.append_and_sort(block_with(&dir, 1, 1, &[b"a", b""]));
        index.append_and_sort(block_with(&dir, 2, 3, &[b"ccc"]));

        let payloads = index.dump().unwrap();
        assert_eq!(payloads, vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b""),
            Bytes::from_static(b"ccc"),
        ]);

        index.close();
        assert!(index.is_closed());
        assert!(index.is_empty());
        assert!(matches!(index.get(1), Err(Error::Closed)));
        assert!(matches!(index.dump(), Err(Error::Closed)));
    }
}
