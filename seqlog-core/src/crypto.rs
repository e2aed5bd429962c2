//! # Payload Digests
//!
//! Every index slot carries the SHA-1 of its payload. Recovery recomputes it
//! for the tail entry to tell a complete write from a torn one.
//!
//! ```text
//! slot:   offset (8B) | length (4B) | SHA-1(payload) (20B)
//! verify: SHA-1(data[pos..pos+length]) == slot.digest
//! ```

use std::fmt;

use sha1::{Digest as _, Sha1};

pub const DIGEST_LEN: usize = 20;

/// SHA-1 digest of a payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    /// Digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Digest(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Check `data` against this digest.
    pub fn matches(&self, data: &[u8]) -> bool {
        Digest::of(data) == *self
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
