//! Content-addressed cache keys
//!
//! The key is the SHA-256 of the exact source bytes. No canonicalization is
//! applied, so sources that differ only in whitespace or comments get
//! different keys and compile separately. That is a known cache-miss
//! inflator, not a correctness problem.

use crate::error::{SwsError, SwsResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hex length of a cache key
pub const CACHE_KEY_LEN: usize = 64;

/// Hex-encoded SHA-256 of a source file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash raw source bytes
    pub fn from_source(source: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for CacheKey {
    type Err = SwsError;

    fn from_str(s: &str) -> SwsResult<Self> {
        if s.len() == CACHE_KEY_LEN && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            Ok(Self(s.to_string()))
        } else {
            Err(SwsError::CacheEntryNotFound(s.to_string()))
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
