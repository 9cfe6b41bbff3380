//! Job identifiers
//!
//! Ids are checked against a fixed alphabet and length window before they are
//! ever joined onto a storage path, so an id can never name anything outside
//! its own job directory.

use crate::error::{SwsError, SwsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Characters allowed in a job id
pub const JOB_ID_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

/// Shortest accepted job id
pub const JOB_ID_MIN_LEN: usize = 12;

/// Longest accepted job id
pub const JOB_ID_MAX_LEN: usize = 40;

/// Validated job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id (32 lowercase hex characters)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validity predicate shared by every entry point that accepts an id
    pub fn is_valid(s: &str) -> bool {
        (JOB_ID_MIN_LEN..=JOB_ID_MAX_LEN).contains(&s.len())
            && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobId {
    type Err = SwsError;

    fn from_str(s: &str) -> SwsResult<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(SwsError::InvalidJobId(s.to_string()))
        }
    }
}

impl TryFrom<String> for JobId {
    type Error = SwsError;

    fn try_from(s: String) -> SwsResult<Self> {
        s.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
