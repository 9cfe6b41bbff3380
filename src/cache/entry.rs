//! Cache entry state
//!
//! Tracks entry state (absent, building, ready), the lease record written
//! while an entry is being built, and the summary shown by `sws cache list`.

use crate::cache::key::CacheKey;
use crate::toolchain::ArtifactPair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// State of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Nothing usable on disk
    Absent,
    /// A lease is held and a build is (presumably) running
    Building,
    /// Both artifacts are published
    Ready,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Building => write!(f, "building"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Contents of `lease.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Unique per claim; names the holder's staging directory
    pub token: String,
    /// Job that triggered the build
    pub job_id: Option<String>,
    /// Process holding the lease
    pub pid: u32,
    /// Lease start
    pub started_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn new(job_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4().simple().to_string(),
            job_id,
            pid: std::process::id(),
            started_at,
        }
    }
}

/// Age of a lease started at `started_at`; a start in the future counts as zero
pub(crate) fn lease_age(started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - started_at).to_std().unwrap_or_default()
}

/// Result of [`BuildCache::lookup`](crate::cache::BuildCache::lookup)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Absent,
    Building {
        age: Duration,
        holder: Option<String>,
    },
    Ready(ArtifactPair),
}

impl CacheLookup {
    pub fn state(&self) -> CacheState {
        match self {
            Self::Absent => CacheState::Absent,
            Self::Building { .. } => CacheState::Building,
            Self::Ready(_) => CacheState::Ready,
        }
    }
}

/// Result of [`BuildCache::try_claim`](crate::cache::BuildCache::try_claim)
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller is now the only builder for this key
    Claimed(BuildLease),
    /// Someone else holds the lease
    AlreadyBuilding,
    /// The entry was published between lookup and claim
    Ready(ArtifactPair),
}

/// Result of [`BuildCache::publish`](crate::cache::BuildCache::publish)
#[derive(Debug)]
pub enum PublishOutcome {
    /// The entry is ready with these artifacts
    Published(ArtifactPair),
    /// The lease was reclaimed while building and the staging directory is
    /// gone. Whatever the entry holds now belongs to another builder.
    LeaseLost,
}

/// Proof of holding the build lease for one key.
///
/// Consumed by `publish` or `abandon`. If the holder dies without doing
/// either, the lease ages out and is reclaimed by the next caller.
#[derive(Debug)]
#[must_use = "a build lease must be published or abandoned"]
pub struct BuildLease {
    pub(crate) key: CacheKey,
    pub(crate) token: String,
    pub(crate) staging_dir: PathBuf,
}

impl BuildLease {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Private directory the holder builds into
    pub fn staging_dir(&self) -> &std::path::Path {
        &self.staging_dir
    }
}

/// Summary of one entry for listings
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub state: CacheState,
    /// Lease holder job while building
    pub holder: Option<String>,
    /// Lease age while building
    pub age_secs: Option<u64>,
    /// Combined artifact size once ready
    pub size_bytes: Option<u64>,
    /// Last modification of the entry directory
    pub modified_at: Option<DateTime<Utc>>,
}
