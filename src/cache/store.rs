//! On-disk build cache with single-flight claims
//!
//! Layout under the cache root:
//!
//! ```text
//! <hash>/lease.json          present while a build holds the lease
//! <hash>/.staging-<token>/   the lease holder's private build directory
//! <hash>/artifacts/          main.js + main.wasm once published
//! ```
//!
//! Within a process, every state change on a key runs under that key's slot
//! mutex, so operations on different keys never contend. Across processes the
//! lease file is installed with a hard link (fails if it already exists) and
//! reclaimed with a rename (only one mover wins), which gives the same
//! exclusive-claim guarantee without a shared lock.

use crate::cache::entry::{
    lease_age, BuildLease, CacheEntryInfo, CacheLookup, ClaimOutcome, LeaseRecord, PublishOutcome,
};
use crate::cache::key::CacheKey;
use crate::error::{SwsError, SwsResult};
use crate::fsutil::{remove_dir_if_exists, remove_file_if_exists};
use crate::toolchain::ArtifactPair;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LEASE_FILE: &str = "lease.json";
const ARTIFACTS_DIR: &str = "artifacts";
const STAGING_PREFIX: &str = ".staging-";

/// Per-key coordination state.
///
/// Slots are never removed: one small struct per distinct source hash seen by
/// this process, and removal would reopen the race between lookup and insert.
#[derive(Default)]
struct EntrySlot {
    lock: tokio::sync::Mutex<()>,
    changed: Notify,
}

/// Lease as observed on disk
struct ObservedLease {
    record: Option<LeaseRecord>,
    started_at: DateTime<Utc>,
}

impl ObservedLease {
    fn age_at(&self, now: DateTime<Utc>) -> Duration {
        lease_age(self.started_at, now)
    }
}

/// Content-addressed store of compiled artifact pairs
pub struct BuildCache {
    root: PathBuf,
    lease_timeout: Duration,
    slots: Mutex<HashMap<CacheKey, Arc<EntrySlot>>>,
}

impl BuildCache {
    pub fn new(root: PathBuf, lease_timeout: Duration) -> Self {
        Self {
            root,
            lease_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    fn slot(&self, key: &CacheKey) -> Arc<EntrySlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn lease_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(LEASE_FILE)
    }

    fn artifacts_dir(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(ARTIFACTS_DIR)
    }

    fn staging_dir(&self, key: &CacheKey, token: &str) -> PathBuf {
        self.entry_dir(key).join(format!("{STAGING_PREFIX}{token}"))
    }

    /// Read the lease, if any. A lease file that cannot be parsed still
    /// counts as held; its age comes from the file's mtime.
    async fn observe_lease(&self, key: &CacheKey) -> SwsResult<Option<ObservedLease>> {
        let path = self.lease_path(key);
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SwsError::io(format!("reading {}", path.display()), e)),
        };

        match serde_json::from_slice::<LeaseRecord>(&content) {
            Ok(record) => Ok(Some(ObservedLease {
                started_at: record.started_at,
                record: Some(record),
            })),
            Err(e) => {
                warn!("Unreadable lease {}: {}", path.display(), e);
                let started_at = match fs::metadata(&path).await.and_then(|m| m.modified()) {
                    Ok(mtime) => DateTime::<Utc>::from(mtime),
                    // Gone between read and stat; treat as brand new
                    Err(_) => Utc::now(),
                };
                Ok(Some(ObservedLease {
                    record: None,
                    started_at,
                }))
            }
        }
    }

    /// Current state of `key`. Never modifies anything.
    pub async fn lookup(&self, key: &CacheKey) -> SwsResult<CacheLookup> {
        self.lookup_at(key, Utc::now()).await
    }

    pub(crate) async fn lookup_at(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> SwsResult<CacheLookup> {
        let pair = ArtifactPair::in_dir(&self.artifacts_dir(key));
        if pair.both_present().await {
            return Ok(CacheLookup::Ready(pair));
        }

        Ok(match self.observe_lease(key).await? {
            Some(lease) => CacheLookup::Building {
                age: lease.age_at(now),
                holder: lease.record.and_then(|r| r.job_id),
            },
            None => CacheLookup::Absent,
        })
    }

    /// Move `key` from absent to building, or report why not.
    ///
    /// At most one caller holds [`ClaimOutcome::Claimed`] for a key at a time.
    pub async fn try_claim(&self, key: &CacheKey, job_id: Option<&str>) -> SwsResult<ClaimOutcome> {
        self.try_claim_at(key, job_id, Utc::now()).await
    }

    pub(crate) async fn try_claim_at(
        &self,
        key: &CacheKey,
        job_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> SwsResult<ClaimOutcome> {
        let slot = self.slot(key);
        let _guard = slot.lock.lock().await;

        let artifacts = ArtifactPair::in_dir(&self.artifacts_dir(key));
        if artifacts.both_present().await {
            return Ok(ClaimOutcome::Ready(artifacts));
        }

        let entry_dir = self.entry_dir(key);
        fs::create_dir_all(&entry_dir)
            .await
            .map_err(|e| SwsError::io(format!("creating {}", entry_dir.display()), e))?;

        let record = LeaseRecord::new(job_id.map(str::to_string), now);
        if !self.install_lease(key, &record).await? {
            debug!("Cache {} already building", key.short());
            return Ok(ClaimOutcome::AlreadyBuilding);
        }

        // A half-populated artifacts dir can only come from outside
        // interference; clear it so publish can rename over it.
        remove_dir_if_exists(&self.artifacts_dir(key)).await?;

        let staging_dir = self.staging_dir(key, &record.token);
        remove_dir_if_exists(&staging_dir).await?;
        fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| SwsError::io(format!("creating {}", staging_dir.display()), e))?;

        info!("Claimed build lease for {}", key.short());
        Ok(ClaimOutcome::Claimed(BuildLease {
            key: key.clone(),
            token: record.token,
            staging_dir,
        }))
    }

    /// Install `record` as the lease file. Returns false if a lease exists.
    ///
    /// The record is written to a private file first and then hard-linked into
    /// place, so the lease appears fully written or not at all, and the link
    /// fails if another claimant got there first.
    async fn install_lease(&self, key: &CacheKey, record: &LeaseRecord) -> SwsResult<bool> {
        let lease_path = self.lease_path(key);
        let tmp = self
            .entry_dir(key)
            .join(format!(".lease-{}.tmp", record.token));

        fs::write(&tmp, serde_json::to_vec_pretty(record)?)
            .await
            .map_err(|e| SwsError::io(format!("writing {}", tmp.display()), e))?;

        let linked = fs::hard_link(&tmp, &lease_path).await;
        remove_file_if_exists(&tmp).await?;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(SwsError::io(
                format!("installing lease {}", lease_path.display()),
                e,
            )),
        }
    }

    /// Remove the lease file if it still belongs to `token`. Returns false
    /// when the lease was reclaimed out from under the holder.
    async fn release_lease(&self, key: &CacheKey, token: &str) -> SwsResult<bool> {
        match self.observe_lease(key).await? {
            Some(ObservedLease {
                record: Some(record),
                ..
            }) if record.token == token => {
                remove_file_if_exists(&self.lease_path(key)).await?;
                Ok(true)
            }
            Some(_) => {
                debug!(
                    "Lease for {} was reclaimed by another builder; leaving it",
                    key.short()
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Make the lease holder's artifacts visible as `ready`.
    ///
    /// Both files are confirmed present in the staging directory, then the
    /// directory is renamed to `artifacts/` in one step, so readers see the
    /// whole pair or nothing. A holder whose lease was reclaimed mid-build
    /// gets [`PublishOutcome::LeaseLost`].
    pub async fn publish(&self, lease: BuildLease, built: &ArtifactPair) -> SwsResult<PublishOutcome> {
        let slot = self.slot(&lease.key);
        let _guard = slot.lock.lock().await;
        let key = &lease.key;

        let staged = fs::try_exists(&lease.staging_dir)
            .await
            .map_err(|e| SwsError::io(format!("checking {}", lease.staging_dir.display()), e))?;
        if !staged {
            warn!(
                "Build of {} finished after its lease was reclaimed; discarding",
                key.short()
            );
            self.release_lease(key, &lease.token).await?;
            slot.changed.notify_waiters();
            return Ok(PublishOutcome::LeaseLost);
        }

        let expected = ArtifactPair::in_dir(&lease.staging_dir);
        if built != &expected || !expected.both_present().await {
            remove_dir_if_exists(&lease.staging_dir).await?;
            self.release_lease(key, &lease.token).await?;
            slot.changed.notify_waiters();
            return Err(SwsError::Internal(format!(
                "refusing to publish incomplete artifacts for {}",
                key.short()
            )));
        }

        let artifacts_dir = self.artifacts_dir(key);
        let existing = ArtifactPair::in_dir(&artifacts_dir);
        if existing.both_present().await {
            // Identical content by construction
            debug!("Cache {} already published, discarding duplicate", key.short());
            remove_dir_if_exists(&lease.staging_dir).await?;
        } else {
            remove_dir_if_exists(&artifacts_dir).await?;
            if let Err(e) = fs::rename(&lease.staging_dir, &artifacts_dir).await {
                let _ = remove_dir_if_exists(&lease.staging_dir).await;
                self.release_lease(key, &lease.token).await?;
                slot.changed.notify_waiters();
                return Err(SwsError::io(
                    format!("publishing {}", artifacts_dir.display()),
                    e,
                ));
            }
        }

        self.release_lease(key, &lease.token).await?;
        slot.changed.notify_waiters();

        info!("Published artifacts for {}", key.short());
        Ok(PublishOutcome::Published(existing))
    }

    /// Return a building entry to absent, discarding partial output.
    ///
    /// Returns false if the lease had already been reclaimed, in which case
    /// the failure may have been caused by the reclaim itself.
    pub async fn abandon(&self, lease: BuildLease) -> SwsResult<bool> {
        let slot = self.slot(&lease.key);
        let _guard = slot.lock.lock().await;

        remove_dir_if_exists(&lease.staging_dir).await?;
        let held = self.release_lease(&lease.key, &lease.token).await?;
        slot.changed.notify_waiters();

        info!("Abandoned build for {}", lease.key.short());
        Ok(held)
    }

    /// Reclaim a lease older than the lease timeout.
    ///
    /// Returns true only for the caller that actually removed the stale
    /// lease; concurrent reclaimers of the same lease get false.
    pub async fn reclaim_if_stale(&self, key: &CacheKey, now: DateTime<Utc>) -> SwsResult<bool> {
        let slot = self.slot(key);
        let _guard = slot.lock.lock().await;

        let Some(observed) = self.observe_lease(key).await? else {
            return Ok(false);
        };
        if observed.age_at(now) < self.lease_timeout {
            return Ok(false);
        }

        // Move the lease aside; a rename has exactly one winner even across
        // processes.
        let lease_path = self.lease_path(key);
        let moved = self
            .entry_dir(key)
            .join(format!(".reclaimed-{}", Uuid::new_v4().simple()));
        match fs::rename(&lease_path, &moved).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(SwsError::io(
                    format!("reclaiming lease {}", lease_path.display()),
                    e,
                ))
            }
        }

        // Another process may have swapped in a fresh lease between our read
        // and the rename. If so, put it back untouched.
        let taken = fs::read(&moved)
            .await
            .ok()
            .and_then(|c| serde_json::from_slice::<LeaseRecord>(&c).ok());
        if let Some(ref record) = taken {
            let same = observed
                .record
                .as_ref()
                .is_some_and(|o| o.token == record.token);
            if !same && lease_age(record.started_at, now) < self.lease_timeout {
                let _ = fs::hard_link(&moved, &lease_path).await;
                remove_file_if_exists(&moved).await?;
                return Ok(false);
            }
        }
        remove_file_if_exists(&moved).await?;

        match taken {
            Some(record) => {
                remove_dir_if_exists(&self.staging_dir(key, &record.token)).await?;
            }
            None => self.remove_all_staging(key).await?,
        }

        slot.changed.notify_waiters();
        warn!(
            "Reclaimed stale build lease for {} (older than {}s)",
            key.short(),
            self.lease_timeout.as_secs()
        );
        Ok(true)
    }

    async fn remove_all_staging(&self, key: &CacheKey) -> SwsResult<()> {
        let dir = self.entry_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SwsError::io(format!("reading {}", dir.display()), e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SwsError::io("reading cache entry", e))?
        {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                remove_dir_if_exists(&entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Reclaim every stale lease under the cache root
    pub async fn reclaim_all_stale(&self, now: DateTime<Utc>) -> SwsResult<Vec<CacheKey>> {
        let mut reclaimed = Vec::new();
        for key in self.keys().await? {
            if self.reclaim_if_stale(&key, now).await? {
                reclaimed.push(key);
            }
        }
        Ok(reclaimed)
    }

    /// Wait until `key` leaves the building state or `timeout` elapses.
    ///
    /// Wakes immediately when a builder in this process publishes or
    /// abandons; builds in other processes are noticed when the timeout
    /// elapses and the caller re-checks.
    pub async fn wait_for_change(&self, key: &CacheKey, timeout: Duration) -> SwsResult<()> {
        let slot = self.slot(key);
        let notified = slot.changed.notified();
        tokio::pin!(notified);
        // Register before checking so a publish in between is not missed
        notified.as_mut().enable();

        if !matches!(self.lookup(key).await?, CacheLookup::Building { .. }) {
            return Ok(());
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        Ok(())
    }

    /// All keys with a directory under the cache root
    pub async fn keys(&self) -> SwsResult<Vec<CacheKey>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(SwsError::io(
                    format!("reading cache directory {}", self.root.display()),
                    e,
                ))
            }
        };

        let mut keys = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SwsError::io("reading cache entry", e))?
        {
            if let Ok(key) = entry.file_name().to_string_lossy().parse::<CacheKey>() {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Summary of one entry
    pub async fn info(&self, key: &CacheKey) -> SwsResult<CacheEntryInfo> {
        let entry_dir = self.entry_dir(key);
        let modified_at = fs::metadata(&entry_dir)
            .await
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let lookup = self.lookup(key).await?;
        let mut info = CacheEntryInfo {
            key: key.to_string(),
            state: lookup.state(),
            holder: None,
            age_secs: None,
            size_bytes: None,
            modified_at,
        };

        match lookup {
            CacheLookup::Absent => {}
            CacheLookup::Building { age, holder } => {
                info.holder = holder;
                info.age_secs = Some(age.as_secs());
            }
            CacheLookup::Ready(pair) => {
                let mut size = 0;
                for path in [&pair.js, &pair.wasm] {
                    size += fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
                }
                info.size_bytes = Some(size);
            }
        }
        Ok(info)
    }

    /// Summaries of every entry
    pub async fn list(&self) -> SwsResult<Vec<CacheEntryInfo>> {
        let mut infos = vec![];
        for key in self.keys().await? {
            infos.push(self.info(&key).await?);
        }
        Ok(infos)
    }
}
