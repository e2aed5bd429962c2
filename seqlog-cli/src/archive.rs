//! Backup file produced by `seqlog dump` and consumed by `seqlog load`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const ARCHIVE_VERSION: u32 = 1;

/// Every payload of a log in ascending offset order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub version: u32,
    pub payloads: Vec<Vec<u8>>,
}

impl Archive {
    pub fn new(payloads: Vec<Bytes>) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            payloads: payloads.into_iter().map(|p| p.to_vec()).collect(),
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create archive {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .with_context(|| format!("Failed to encode archive {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write archive {}", path.display()))?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open archive {}", path.display()))?;
        let archive: Archive = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("Failed to decode archive {}", path.display()))?;
        if archive.version != ARCHIVE_VERSION {
            bail!(
                "Unsupported archive version {} in {} (expected {})",
                archive.version,
                path.display(),
                ARCHIVE_VERSION
            );
        }
        Ok(archive)
    }
}
