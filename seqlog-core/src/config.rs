//! # Configuration Management
//!
//! Settings for a log directory. Every field has a default, so a TOML file
//! only needs to name what it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bytes taken by the segment header (capacity + ts0 + tsN).
pub const HEADER_SIZE: u64 = 26;
/// Bytes per index slot.
pub const SLOT_SIZE: u64 = 32;

pub const DEFAULT_SEGMENT_SIZE: u64 = 1 << 30; // 1GB
pub const DEFAULT_INDEX_SLOTS: u32 = 8192; // 256KB index table

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub data_dir: PathBuf,
    /// Total size of every segment file.
    pub segment_size: u64,
    /// Number of 32-byte slots in the index table.
    pub index_slots: u32,
    /// Pending writes the queue holds before producers stall.
    pub queue_capacity: usize,
    /// Leave non-tail segments without a verifiable slot out of the index
    /// instead of refusing to open.
    pub skip_corrupt_segments: bool,
    /// How often rotation re-checks a pre-allocation that is still running.
    pub rotation_poll_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            segment_size: DEFAULT_SEGMENT_SIZE,
            index_slots: DEFAULT_INDEX_SLOTS,
            queue_capacity: 10,
            skip_corrupt_segments: false,
            rotation_poll_ms: 10,
        }
    }
}

impl LogConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a config from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Configuration {
            message: format!("read config file {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LogConfig = toml::from_str(text).map_err(|e| Error::Configuration {
            message: format!("parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_slots == 0 {
            return Err(Error::Configuration {
                message: "index_slots must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(Error::Configuration {
                message: "queue_capacity must be at least 1".to_string(),
            });
        }
        if self.segment_size <= HEADER_SIZE + self.index_size() {
            return Err(Error::Configuration {
                message: format!(
                    "segment_size {} leaves no data region after a {} byte header and {} byte index",
                    self.segment_size,
                    HEADER_SIZE,
                    self.index_size()
                ),
            });
        }
        // slot lengths are u32, so a single payload can never exceed that
        let data_size = self.segment_size - HEADER_SIZE - self.index_size();
        if data_size > u32::MAX as u64 {
            return Err(Error::Configuration {
                message: format!(
                    "segment_size {} gives a {} byte data region, more than the {} a slot can address",
                    self.segment_size,
                    data_size,
                    u32::MAX
                ),
            });
        }
        Ok(())
    }

    /// Size of the index table in bytes.
    pub fn index_size(&self) -> u64 {
        self.index_slots as u64 * SLOT_SIZE
    }

    pub fn rotation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rotation_poll_ms.max(1))
    }
}
