//! # seqlog Storage Engine
//!
//! Segmented append-only log: payloads get consecutive offsets starting at 1
//! and are stored in fixed-size segment files with an embedded index.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  write() ──> bounded queue ──> SegmentWriter ──> <id>.dat   │
//! │                                   │      │                  │
//! │                                   ▼      ▼                  │
//! │                            BlockIndex   fill marks ──>      │
//! │                            (tail entry) <id+1>.emp (bg)     │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  get(offset) ──> BlockIndex (binary search) ──> pread       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Startup                                │
//! │                                                             │
//! │  *.dat ──> SHA-1 tail walk ──> self-heal ──> BlockIndex     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod block;
pub mod codec;
pub mod file;
pub mod inspect;
pub mod prealloc;
mod recovery;
pub mod sequential;
mod writer;

pub use block::{Block, BlockIndex, BlockInfo, Entry};
pub use codec::{Header, IndexSlot, SegmentLayout};
pub use inspect::{inspect, SegmentSummary};
pub use prealloc::{FillThresholds, Preallocator};
pub use sequential::SequentialLog;
