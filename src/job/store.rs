//! Filesystem-backed job store
//!
//! One directory per job holding `job.json`, the uploaded `main.stan` and,
//! once completed, `main.js` + `main.wasm`.

use crate::config::schema::DEFAULT_MAX_SOURCE_BYTES;
use crate::error::{SwsError, SwsResult};
use crate::fsutil::{copy_atomic, remove_dir_if_exists, write_atomic};
use crate::job::id::JobId;
use crate::job::state::{Job, JobStatus};
use crate::toolchain::{Artifact, ArtifactPair, SOURCE_FILE_NAME};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use tracing::{debug, info};

const RECORD_FILE: &str = "job.json";

/// How many fresh ids to try before giving up on `create_job`
const CREATE_ATTEMPTS: u32 = 5;

/// Job store handles job CRUD and cleanup
pub struct JobStore {
    root: PathBuf,
    max_source_bytes: usize,
    /// Serializes read-modify-write of a single job record
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobStore {
    /// Create a job store rooted at `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the source size ceiling
    pub fn with_max_source_bytes(mut self, limit: usize) -> Self {
        self.max_source_bytes = limit;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a job (does not check existence)
    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(RECORD_FILE)
    }

    fn source_path(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(SOURCE_FILE_NAME)
    }

    /// Lock for one job. Entries nobody holds are dropped on the way, so the
    /// map only ever contains jobs with an operation in flight.
    fn job_lock(&self, id: &JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|held, lock| held == id || Arc::strong_count(lock) > 1);
        locks.entry(id.clone()).or_default().clone()
    }

    async fn save(&self, job: &Job) -> SwsResult<()> {
        let content = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.record_path(&job.id), &content).await
    }

    /// Create a new job with a fresh id
    pub async fn create_job(&self) -> SwsResult<Job> {
        self.create_job_with(JobId::generate).await
    }

    /// Create a new job, drawing candidate ids from `next_id`.
    ///
    /// The job directory is created exclusively, so an id that is already in
    /// use is detected and another one drawn.
    pub async fn create_job_with(&self, mut next_id: impl FnMut() -> JobId) -> SwsResult<Job> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SwsError::io(format!("creating jobs directory {}", self.root.display()), e))?;

        for _ in 0..CREATE_ATTEMPTS {
            let id = next_id();
            let dir = self.job_dir(&id);
            match fs::create_dir(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Job id collision on {}, retrying", id);
                    continue;
                }
                Err(e) => {
                    return Err(SwsError::io(format!("creating job directory {}", dir.display()), e))
                }
            }

            let job = Job::new(id);
            self.save(&job).await?;
            info!("Created job: {}", job.id);
            return Ok(job);
        }

        Err(SwsError::IdCollision {
            attempts: CREATE_ATTEMPTS,
        })
    }

    /// Load a job record
    pub async fn get(&self, id: &JobId) -> SwsResult<Job> {
        let path = self.record_path(id);
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SwsError::JobNotFound(id.to_string()))
            }
            Err(e) => {
                return Err(SwsError::io(format!("reading job file {}", path.display()), e))
            }
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// Current status of a job
    pub async fn get_status(&self, id: &JobId) -> SwsResult<JobStatus> {
        Ok(self.get(id).await?.status)
    }

    /// Store the job's source, replacing any earlier upload.
    ///
    /// Only allowed while the job is still `initiated`.
    pub async fn attach_source(&self, id: &JobId, source: &[u8]) -> SwsResult<()> {
        if source.len() > self.max_source_bytes {
            return Err(SwsError::PayloadTooLarge {
                size: source.len(),
                limit: self.max_source_bytes,
            });
        }

        let lock = self.job_lock(id);
        let _guard = lock.lock().await;

        let job = self.get(id).await?;
        if job.status != JobStatus::Initiated {
            return Err(SwsError::invalid_state(
                id.as_str(),
                format!("cannot upload source to a job with status {}", job.status),
            ));
        }

        write_atomic(&self.source_path(id), source).await?;
        debug!("Stored {} bytes of source for job {}", source.len(), id);
        Ok(())
    }

    /// Uploaded source bytes
    pub async fn read_source(&self, id: &JobId) -> SwsResult<Vec<u8>> {
        let path = self.source_path(id);
        match fs::read(&path).await {
            Ok(c) => Ok(c),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // distinguish a missing job from a missing upload
                self.get(id).await?;
                Err(SwsError::invalid_state(id.as_str(), "no source uploaded"))
            }
            Err(e) => Err(SwsError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Freeze a job's source and mark it `running`, returning the source.
    ///
    /// Runs under the job lock, so an upload either lands before this (and is
    /// the source that gets built) or is rejected. Terminal jobs are
    /// `InvalidState`; a job without source stays `initiated`.
    pub async fn begin_run(&self, id: &JobId) -> SwsResult<Vec<u8>> {
        let lock = self.job_lock(id);
        let _guard = lock.lock().await;

        let mut job = self.get(id).await?;
        if job.status.is_terminal() {
            return Err(SwsError::invalid_state(
                id.as_str(),
                format!("job is already {}", job.status),
            ));
        }

        let source = self.read_source(id).await?;
        if job.status != JobStatus::Running {
            job.status = JobStatus::Running;
            job.updated_at = Utc::now();
            self.save(&job).await?;
            debug!("Job {} source frozen ({} bytes)", id, source.len());
        }
        Ok(source)
    }

    /// Advance a job's status.
    ///
    /// A terminal status is never overwritten by a non-terminal one, so a
    /// poller that observed `running` cannot undo a concurrent completion.
    pub async fn set_status(
        &self,
        id: &JobId,
        status: JobStatus,
        diagnostic: Option<String>,
    ) -> SwsResult<Job> {
        let lock = self.job_lock(id);
        let _guard = lock.lock().await;

        let mut job = self.get(id).await?;
        if job.status.is_terminal() && !status.is_terminal() {
            debug!(
                "Ignoring {} for job {} already {}",
                status, id, job.status
            );
            return Ok(job);
        }

        if job.status == status && diagnostic.is_none() {
            return Ok(job);
        }

        job.status = status;
        if diagnostic.is_some() {
            job.diagnostic = diagnostic;
        }
        job.updated_at = Utc::now();
        self.save(&job).await?;

        debug!("Updated job {} status to {}", id, status);
        Ok(job)
    }

    /// Remember which cache entry a job maps to
    pub async fn set_source_hash(&self, id: &JobId, hash: &str) -> SwsResult<()> {
        let lock = self.job_lock(id);
        let _guard = lock.lock().await;

        let mut job = self.get(id).await?;
        if job.source_hash.as_deref() == Some(hash) {
            return Ok(());
        }
        job.source_hash = Some(hash.to_string());
        job.updated_at = Utc::now();
        self.save(&job).await
    }

    /// Copy a published artifact pair into the job's result slot
    pub async fn install_artifacts(&self, id: &JobId, pair: &ArtifactPair) -> SwsResult<ArtifactPair> {
        let dest = ArtifactPair::in_dir(&self.job_dir(id));
        for artifact in Artifact::ALL {
            copy_atomic(pair.path(artifact), dest.path(artifact)).await?;
        }
        Ok(dest)
    }

    /// Paths of both artifacts of a completed job
    pub async fn artifact_paths(&self, id: &JobId) -> SwsResult<ArtifactPair> {
        let job = self.get(id).await?;
        let pair = ArtifactPair::in_dir(&self.job_dir(id));

        if job.status != JobStatus::Completed || !pair.both_present().await {
            let name = if job.status == JobStatus::Completed {
                "main.js/main.wasm"
            } else {
                "artifacts"
            };
            return Err(SwsError::ArtifactNotFound {
                job_id: id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(pair)
    }

    /// Bytes of one artifact of a completed job
    pub async fn read_artifact(&self, id: &JobId, artifact: Artifact) -> SwsResult<Vec<u8>> {
        let pair = self.artifact_paths(id).await.map_err(|e| match e {
            SwsError::ArtifactNotFound { job_id, .. } => SwsError::ArtifactNotFound {
                job_id,
                name: artifact.file_name().to_string(),
            },
            other => other,
        })?;

        let path = pair.path(artifact);
        fs::read(path)
            .await
            .map_err(|e| SwsError::io(format!("reading {}", path.display()), e))
    }

    /// List all jobs, newest first
    pub async fn list(&self) -> SwsResult<Vec<Job>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(SwsError::io("reading jobs directory", e)),
        };

        let mut jobs = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SwsError::io("reading job entry", e))?
        {
            let Ok(id) = entry.file_name().to_string_lossy().parse::<JobId>() else {
                continue;
            };
            if let Ok(job) = self.get(&id).await {
                jobs.push(job);
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Remove terminal jobs not updated for `max_age`
    pub async fn prune(&self, max_age: Duration) -> SwsResult<u32> {
        let cutoff = Utc::now() - max_age;
        let mut pruned = 0;

        for job in self.list().await? {
            if !job.status.is_terminal() || job.updated_at >= cutoff {
                continue;
            }
            remove_dir_if_exists(&self.job_dir(&job.id)).await?;
            pruned += 1;
            info!("Pruned job: {}", job.id);
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> JobStore {
        JobStore::new(dir.path().join("jobs"))
    }

    #[tokio::test]
    async fn create_then_status_is_initiated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let job = store.create_job().await.unwrap();

        assert_eq!(store.get_status(&job.id).await.unwrap(), JobStatus::Initiated);
        assert!(store.job_dir(&job.id).join("job.json").is_file());
    }

    #[tokio::test]
    async fn unknown_job_not_found() {
        let dir = TempDir::new().unwrap();
        let id: JobId = "abcdef123456".parse().unwrap();

        let err = store(&dir).get_status(&id).await.unwrap_err();
        assert!(matches!(err, SwsError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn create_retries_on_collision() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let taken: JobId = "aaaaaaaaaaaa".parse().unwrap();
        let fresh: JobId = "bbbbbbbbbbbb".parse().unwrap();
        store.create_job_with(|| taken.clone()).await.unwrap();

        let mut candidates = vec![fresh.clone(), taken.clone()];
        let job = store
            .create_job_with(|| candidates.pop().unwrap())
            .await
            .unwrap();

        assert_eq!(job.id, fresh);
    }

    #[tokio::test]
    async fn create_gives_up_after_repeated_collisions() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let taken: JobId = "aaaaaaaaaaaa".parse().unwrap();
        store.create_job_with(|| taken.clone()).await.unwrap();

        let err = store.create_job_with(|| taken.clone()).await.unwrap_err();
        assert!(matches!(err, SwsError::IdCollision { attempts: 5 }));
    }

    #[tokio::test]
    async fn attach_source_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();

        store.attach_source(&job.id, b"first").await.unwrap();
        store.attach_source(&job.id, b"second").await.unwrap();

        assert_eq!(store.read_source(&job.id).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn attach_source_rejects_non_initiated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();
        store.attach_source(&job.id, b"model").await.unwrap();
        store
            .set_status(&job.id, JobStatus::Running, None)
            .await
            .unwrap();

        let err = store.attach_source(&job.id, b"other").await.unwrap_err();
        assert!(matches!(err, SwsError::InvalidState { .. }));
        assert_eq!(store.read_source(&job.id).await.unwrap(), b"model");
    }

    #[tokio::test]
    async fn attach_source_enforces_ceiling() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).with_max_source_bytes(8);
        let job = store.create_job().await.unwrap();

        store.attach_source(&job.id, b"12345678").await.unwrap();
        let err = store.attach_source(&job.id, b"123456789").await.unwrap_err();
        assert!(matches!(
            err,
            SwsError::PayloadTooLarge { size: 9, limit: 8 }
        ));
    }

    #[tokio::test]
    async fn begin_run_freezes_source() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();
        store.attach_source(&job.id, b"model").await.unwrap();

        assert_eq!(store.begin_run(&job.id).await.unwrap(), b"model");
        assert_eq!(store.get_status(&job.id).await.unwrap(), JobStatus::Running);
        // a second start on a running job is allowed and sees the same bytes
        assert_eq!(store.begin_run(&job.id).await.unwrap(), b"model");

        assert!(matches!(
            store.attach_source(&job.id, b"other").await,
            Err(SwsError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn begin_run_requires_source_and_live_job() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let empty = store.create_job().await.unwrap();

        assert!(matches!(
            store.begin_run(&empty.id).await,
            Err(SwsError::InvalidState { .. })
        ));
        assert_eq!(store.get_status(&empty.id).await.unwrap(), JobStatus::Initiated);

        let done = store.create_job().await.unwrap();
        store.attach_source(&done.id, b"model").await.unwrap();
        store
            .set_status(&done.id, JobStatus::Completed, None)
            .await
            .unwrap();
        assert!(matches!(
            store.begin_run(&done.id).await,
            Err(SwsError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn read_source_without_upload_is_invalid_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();

        let err = store.read_source(&job.id).await.unwrap_err();
        assert!(matches!(err, SwsError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();

        store
            .set_status(&job.id, JobStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();
        let after = store
            .set_status(&job.id, JobStatus::Running, None)
            .await
            .unwrap();

        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.diagnostic.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn artifacts_not_found_before_completion() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();

        let err = store.read_artifact(&job.id, Artifact::Wasm).await.unwrap_err();
        match err {
            SwsError::ArtifactNotFound { name, .. } => assert_eq!(name, "main.wasm"),
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn install_and_read_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let job = store.create_job().await.unwrap();

        let built = dir.path().join("built");
        std::fs::create_dir_all(&built).unwrap();
        std::fs::write(built.join("main.js"), b"js").unwrap();
        std::fs::write(built.join("main.wasm"), b"wasm").unwrap();

        store
            .install_artifacts(&job.id, &ArtifactPair::in_dir(&built))
            .await
            .unwrap();
        store
            .set_status(&job.id, JobStatus::Completed, None)
            .await
            .unwrap();

        assert_eq!(store.read_artifact(&job.id, Artifact::Js).await.unwrap(), b"js");
        assert_eq!(
            store.read_artifact(&job.id, Artifact::Wasm).await.unwrap(),
            b"wasm"
        );
    }

    #[tokio::test]
    async fn idle_job_locks_are_dropped() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for _ in 0..10 {
            let job = store.create_job().await.unwrap();
            store.attach_source(&job.id, b"model").await.unwrap();
            store.begin_run(&job.id).await.unwrap();
        }

        let held = store.job_lock(&"abcdef123456".parse().unwrap());
        let locks = store.locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        drop(locks);
        drop(held);
    }

    #[tokio::test]
    async fn prune_removes_old_terminal_jobs_only() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let done = store.create_job().await.unwrap();
        let pending = store.create_job().await.unwrap();
        store
            .set_status(&done.id, JobStatus::Completed, None)
            .await
            .unwrap();

        // nothing is older than an hour yet
        assert_eq!(store.prune(Duration::hours(1)).await.unwrap(), 0);
        // everything terminal is older than "zero"
        assert_eq!(store.prune(Duration::zero()).await.unwrap(), 1);

        assert!(matches!(
            store.get(&done.id).await.unwrap_err(),
            SwsError::JobNotFound(_)
        ));
        assert!(store.get(&pending.id).await.is_ok());
    }
}
