//! Segment file codec.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (26 bytes)                                            │
//! │   0..4    capacity: entry count, u32 big-endian              │
//! │   4       '~'                                                │
//! │   5..15   ts0: creation date, YYYY/MM/DD                     │
//! │   15      '~'                                                │
//! │   16..26  tsN: date of last write, YYYY/MM/DD                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index table (index_slots * 32 bytes, 8192 by default)        │
//! │   offset u64 BE | length u32 BE | SHA-1(payload) 20 bytes    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data region (remainder of the fixed file size)               │
//! │   payloads packed back to back in offset order               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Local};

use seqlog_core::config::{LogConfig, HEADER_SIZE, SLOT_SIZE};
use seqlog_core::crypto::{Digest, DIGEST_LEN};

pub const CAPACITY_OFFSET: u64 = 0;
pub const CAPACITY_LEN: usize = 4;
pub const TS0_OFFSET: u64 = 5;
pub const TSN_OFFSET: u64 = 16;
pub const INDEX_OFFSET: u64 = HEADER_SIZE;
pub const DATE_LEN: usize = 10;
pub const DELIMITER: u8 = b'~';
pub const DATE_FORMAT: &str = "%Y/%m/%d";

pub const SEGMENT_EXT: &str = "dat";
pub const EMPTY_SEGMENT_EXT: &str = "emp";

/// Geometry of every segment in a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    pub segment_size: u64,
    pub index_slots: u32,
}

impl Default for SegmentLayout {
    fn default() -> Self {
        Self::from_config(&LogConfig::default())
    }
}

impl SegmentLayout {
    pub fn from_config(config: &LogConfig) -> Self {
        Self {
            segment_size: config.segment_size,
            index_slots: config.index_slots,
        }
    }

    pub fn index_size(&self) -> u64 {
        self.index_slots as u64 * SLOT_SIZE
    }

    /// File position where the data region starts.
    pub fn data_offset(&self) -> u64 {
        INDEX_OFFSET + self.index_size()
    }

    /// Bytes available for payloads in one segment.
    pub fn data_size(&self) -> u64 {
        self.segment_size - self.data_offset()
    }

    pub fn slot_position(&self, slot: u32) -> u64 {
        INDEX_OFFSET + slot as u64 * SLOT_SIZE
    }

    pub fn data_position(&self, data_offset: u64) -> u64 {
        self.data_offset() + data_offset
    }
}

/// Encode the capacity field for a segment holding `[min_offset, max_offset]`.
/// `max_offset == 0` means the segment is empty.
pub fn encode_capacity(min_offset: u64, max_offset: u64) -> [u8; CAPACITY_LEN] {
    let count = if max_offset == 0 {
        0
    } else {
        max_offset - min_offset + 1
    };
    let mut buf = [0u8; CAPACITY_LEN];
    BigEndian::write_u32(&mut buf, count as u32);
    buf
}

pub fn decode_capacity(raw: &[u8]) -> u32 {
    BigEndian::read_u32(&raw[..CAPACITY_LEN])
}

pub fn encode_date(at: DateTime<Local>) -> [u8; DATE_LEN] {
    let mut buf = [0u8; DATE_LEN];
    buf.copy_from_slice(at.format(DATE_FORMAT).to_string().as_bytes());
    buf
}

/// Today's date in header form.
pub fn today() -> [u8; DATE_LEN] {
    encode_date(Local::now())
}

/// Delimiters and dates written into a freshly allocated segment.
pub fn encode_fresh_header(date: [u8; DATE_LEN]) -> [u8; HEADER_SIZE as usize] {
    let mut buf = [0u8; HEADER_SIZE as usize];
    buf[TS0_OFFSET as usize - 1] = DELIMITER;
    buf[TS0_OFFSET as usize..TS0_OFFSET as usize + DATE_LEN].copy_from_slice(&date);
    buf[TSN_OFFSET as usize - 1] = DELIMITER;
    buf[TSN_OFFSET as usize..TSN_OFFSET as usize + DATE_LEN].copy_from_slice(&date);
    buf
}

/// Decoded segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub capacity: u32,
    pub created: String,
    pub updated: String,
}

impl Header {
    pub fn decode(raw: &[u8]) -> Self {
        let date = |at: u64| {
            let at = at as usize;
            String::from_utf8_lossy(&raw[at..at + DATE_LEN]).into_owned()
        };
        Header {
            capacity: decode_capacity(raw),
            created: date(TS0_OFFSET),
            updated: date(TSN_OFFSET),
        }
    }
}

/// One 32-byte slot of the index table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSlot {
    pub offset: u64,
    pub length: u32,
    pub digest: Digest,
}

impl IndexSlot {
    pub fn for_payload(offset: u64, payload: &[u8]) -> Self {
        Self {
            offset,
            length: payload.len() as u32,
            digest: Digest::of(payload),
        }
    }

    pub fn encode(&self) -> [u8; SLOT_SIZE as usize] {
        let mut buf = [0u8; SLOT_SIZE as usize];
        BigEndian::write_u64(&mut buf[..8], self.offset);
        BigEndian::write_u32(&mut buf[8..12], self.length);
        buf[12..12 + DIGEST_LEN].copy_from_slice(self.digest.as_bytes());
        buf
    }

    /// Decode a slot. `raw` must hold at least 32 bytes.
    pub fn decode(raw: &[u8]) -> Self {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&raw[12..12 + DIGEST_LEN]);
        Self {
            offset: BigEndian::read_u64(&raw[..8]),
            length: BigEndian::read_u32(&raw[8..12]),
            digest: Digest(digest),
        }
    }

    /// Offset 0 is never assigned, so a zero offset marks an unused slot.
    pub fn is_vacant(&self) -> bool {
        self.offset == 0
    }
}

/// Decode a whole index table.
pub fn decode_index_table(raw: &[u8]) -> Vec<IndexSlot> {
    raw.chunks_exact(SLOT_SIZE as usize)
        .map(IndexSlot::decode)
        .collect()
}
