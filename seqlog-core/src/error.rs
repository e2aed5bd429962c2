//! # Error Handling
//!
//! Error types shared by every seqlog crate.
//!
//! ## Classes
//!
//! 1. **Caller errors**: `Closed`, `NotFound`, `SizeLimitExceeded` are returned
//!    to the caller and leave the log untouched
//! 2. **Integrity errors**: `Corruption` is raised by startup recovery when a
//!    segment cannot be trusted
//! 3. **Fatal errors**: `Io` means the durability contract can no longer be
//!    upheld; the engine shuts itself down after reporting it

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for seqlog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for seqlog
#[derive(Error, Debug)]
pub enum Error {
    #[error("log has been closed")]
    Closed,

    #[error("offset {offset} not found")]
    NotFound { offset: u64 },

    #[error("payload of {size} bytes exceeds the segment limit of {limit} bytes")]
    SizeLimitExceeded { size: usize, limit: u64 },

    #[error("corrupted segment {}: {details}", path.display())]
    Corruption { path: PathBuf, details: String },

    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Wrap an I/O failure with the file and operation it came from.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Error::Corruption {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Check if the caller can keep using the log after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::SizeLimitExceeded { .. } => true,
            Error::Closed => false,
            Error::Io { .. } => false,
            Error::Corruption { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Closed => "CLOSED",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::SizeLimitExceeded { .. } => "SIZE_LIMIT_EXCEEDED",
            Error::Corruption { .. } => "CORRUPTION",
            Error::Io { .. } => "IO_FATAL",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::io(format!("{}: {}", f(), e), e))
    }
}
