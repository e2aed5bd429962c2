//! # seqlog Core
//!
//! This crate provides the building blocks shared by the log engine and its tools:
//! - Error types
//! - Configuration
//! - Metrics
//! - Payload digests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   seqlog-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • error   - Error taxonomy                     │
//! │  • config  - Directory and segment geometry     │
//! │  • metrics - Counters and timers                │
//! │  • crypto  - SHA-1 payload digests              │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::LogConfig;
pub use crypto::Digest;
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
