//! Job orchestration
//!
//! Ties the job store, the build cache and the toolchain together. A run
//! never compiles the same source twice concurrently: the first job to claim
//! a cache entry builds it, every other job with byte-identical source sees
//! `running` until the entry is published and then completes from the cache.

use crate::audit::{AuditEvent, AuditLog};
use crate::cache::{BuildCache, CacheKey, CacheLookup, ClaimOutcome, PublishOutcome};
use crate::config::{schema::Config, ConfigManager};
use crate::error::{SwsError, SwsResult};
use crate::job::{Job, JobId, JobStatus, JobStore};
use crate::toolchain::{Artifact, ArtifactPair, BuildExecutor, Diagnostic, ShellToolchain};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Response body for create, run and status requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl From<&Job> for JobReport {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            diagnostic: job.diagnostic.clone(),
        }
    }
}

/// What a run learned from the cache before trying to claim
enum Probe {
    Absent,
    Building,
    Ready(ArtifactPair),
}

pub struct Orchestrator {
    jobs: JobStore,
    cache: BuildCache,
    executor: Option<Arc<dyn BuildExecutor>>,
    audit: AuditLog,
    wait_poll: Duration,
}

impl Orchestrator {
    pub fn new(jobs: JobStore, cache: BuildCache, executor: Arc<dyn BuildExecutor>) -> Self {
        Self {
            jobs,
            cache,
            executor: Some(executor),
            audit: AuditLog::disabled(),
            wait_poll: Duration::from_millis(500),
        }
    }

    /// Orchestrator that can serve cache hits but cannot compile
    pub fn without_executor(jobs: JobStore, cache: BuildCache) -> Self {
        Self {
            jobs,
            cache,
            executor: None,
            audit: AuditLog::disabled(),
            wait_poll: Duration::from_millis(500),
        }
    }

    /// Wire everything from config. A missing toolchain directory is only an
    /// error once a build is actually needed.
    pub fn from_config(config: &Config) -> Self {
        let jobs = JobStore::new(ConfigManager::jobs_dir(config))
            .with_max_source_bytes(config.build.max_source_bytes);
        let cache = BuildCache::new(
            ConfigManager::cache_dir(config),
            config.cache.lease_timeout(),
        );
        let executor = ShellToolchain::from_config(&config.build)
            .ok()
            .map(|t| Arc::new(t) as Arc<dyn BuildExecutor>);

        Self {
            jobs,
            cache,
            executor,
            audit: AuditLog::new(config),
            wait_poll: config.cache.wait_poll(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_wait_poll(mut self, wait_poll: Duration) -> Self {
        self.wait_poll = wait_poll;
        self
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    fn executor(&self) -> SwsResult<&Arc<dyn BuildExecutor>> {
        self.executor.as_ref().ok_or(SwsError::ToolchainNotConfigured)
    }

    pub async fn create_job(&self) -> SwsResult<JobReport> {
        let job = self.jobs.create_job().await?;
        info!("Created job {}", job.id);
        self.audit
            .record(AuditEvent::JobCreated, json!({ "job_id": job.id.as_str() }))
            .await;
        Ok(JobReport::from(&job))
    }

    pub async fn status(&self, id: &JobId) -> SwsResult<JobReport> {
        let job = self.jobs.get(id).await?;
        Ok(JobReport::from(&job))
    }

    /// Attach source to a job that has not started yet
    pub async fn upload(&self, id: &JobId, source: &[u8]) -> SwsResult<()> {
        self.jobs.attach_source(id, source).await?;
        self.audit
            .record(
                AuditEvent::JobSource,
                json!({ "job_id": id.as_str(), "bytes": source.len() }),
            )
            .await;
        Ok(())
    }

    pub async fn fetch(&self, id: &JobId, artifact: Artifact) -> SwsResult<Vec<u8>> {
        self.jobs.read_artifact(id, artifact).await
    }

    /// Advance a job as far as it can go without waiting.
    ///
    /// Returns `running` while another job holds the build for the same
    /// source; call again (or use [`Self::run_until_terminal`]) to pick up the
    /// published result. Finished jobs are returned unchanged.
    pub async fn run(&self, id: &JobId) -> SwsResult<JobStatus> {
        let source = match self.jobs.begin_run(id).await {
            Ok(source) => source,
            Err(e @ SwsError::InvalidState { .. }) => {
                let job = self.jobs.get(id).await?;
                if job.status.is_terminal() {
                    debug!("Job {} already {}", id, job.status);
                    return Ok(job.status);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let key = CacheKey::from_source(&source);
        self.jobs.set_source_hash(id, key.as_str()).await?;

        match self.probe(&key).await {
            Ok(Probe::Ready(pair)) => return self.complete(id, &key, &pair).await,
            Ok(Probe::Building) => return self.mark_running(id).await,
            Ok(Probe::Absent) => {}
            Err(SwsError::StaleLease(_)) => self.reclaim(&key).await?,
            Err(e) => return Err(e),
        }

        self.claim_and_build(id, &key, &source).await
    }

    /// Look at the cache entry. An over-age lease surfaces as
    /// [`SwsError::StaleLease`] so the caller reclaims before claiming.
    async fn probe(&self, key: &CacheKey) -> SwsResult<Probe> {
        match self.cache.lookup(key).await? {
            CacheLookup::Ready(pair) => Ok(Probe::Ready(pair)),
            CacheLookup::Building { age, holder } => {
                if age >= self.cache.lease_timeout() {
                    warn!(
                        "Build of {} by {} exceeded lease timeout ({}s)",
                        key.short(),
                        holder.as_deref().unwrap_or("unknown holder"),
                        age.as_secs()
                    );
                    return Err(SwsError::StaleLease(key.to_string()));
                }
                Ok(Probe::Building)
            }
            CacheLookup::Absent => Ok(Probe::Absent),
        }
    }

    async fn reclaim(&self, key: &CacheKey) -> SwsResult<()> {
        if self.cache.reclaim_if_stale(key, Utc::now()).await? {
            self.audit
                .record(AuditEvent::CacheReclaimed, json!({ "key": key.as_str() }))
                .await;
        }
        Ok(())
    }

    async fn claim_and_build(
        &self,
        id: &JobId,
        key: &CacheKey,
        source: &[u8],
    ) -> SwsResult<JobStatus> {
        let executor = self.executor()?;

        let lease = match self.cache.try_claim(key, Some(id.as_str())).await? {
            ClaimOutcome::Claimed(lease) => lease,
            ClaimOutcome::AlreadyBuilding => return self.mark_running(id).await,
            ClaimOutcome::Ready(pair) => return self.complete(id, key, &pair).await,
        };

        self.audit
            .record(
                AuditEvent::CacheClaimed,
                json!({ "key": key.as_str(), "job_id": id.as_str() }),
            )
            .await;
        info!(
            "Job {} building {} with {}",
            id,
            key.short(),
            executor.executor_name()
        );

        match executor.execute(source, lease.staging_dir()).await {
            Ok(built) => match self.cache.publish(lease, &built).await? {
                PublishOutcome::Published(pair) => {
                    self.audit
                        .record(AuditEvent::CachePublished, json!({ "key": key.as_str() }))
                        .await;
                    self.complete(id, key, &pair).await
                }
                PublishOutcome::LeaseLost => self.after_lost_lease(id, key).await,
            },
            Err(diagnostic) => {
                let held = self.cache.abandon(lease).await?;
                self.audit
                    .record(AuditEvent::CacheAbandoned, json!({ "key": key.as_str() }))
                    .await;
                if !held {
                    // The staging dir may have been removed under the build
                    return self.after_lost_lease(id, key).await;
                }
                self.fail(id, diagnostic).await
            }
        }
    }

    /// The build outlived its lease and a reclaimer took over. Pick up the
    /// replacement's result if it is already published, otherwise keep the
    /// job `running` so the next run waits on (or redoes) the rebuild.
    async fn after_lost_lease(&self, id: &JobId, key: &CacheKey) -> SwsResult<JobStatus> {
        warn!("Job {} lost the build lease for {}", id, key.short());
        match self.cache.lookup(key).await? {
            CacheLookup::Ready(pair) => self.complete(id, key, &pair).await,
            CacheLookup::Building { .. } | CacheLookup::Absent => self.mark_running(id).await,
        }
    }

    async fn mark_running(&self, id: &JobId) -> SwsResult<JobStatus> {
        let job = self.jobs.set_status(id, JobStatus::Running, None).await?;
        Ok(job.status)
    }

    async fn complete(&self, id: &JobId, key: &CacheKey, pair: &ArtifactPair) -> SwsResult<JobStatus> {
        self.jobs.install_artifacts(id, pair).await?;
        let job = self.jobs.set_status(id, JobStatus::Completed, None).await?;
        info!("Job {} completed from {}", id, key.short());
        self.audit
            .record(
                AuditEvent::JobCompleted,
                json!({ "job_id": id.as_str(), "key": key.as_str() }),
            )
            .await;
        Ok(job.status)
    }

    async fn fail(&self, id: &JobId, diagnostic: Diagnostic) -> SwsResult<JobStatus> {
        warn!("Job {} failed to compile", id);
        let job = self
            .jobs
            .set_status(id, JobStatus::Failed, Some(diagnostic.0))
            .await?;
        self.audit
            .record(AuditEvent::JobFailed, json!({ "job_id": id.as_str() }))
            .await;
        Ok(job.status)
    }

    /// Run a job and keep driving it until it finishes or `max_wait` passes.
    ///
    /// Between attempts it sleeps on the cache entry, so a build published by
    /// this process wakes it immediately and one published by another process
    /// is noticed within the configured poll interval.
    pub async fn run_until_terminal(&self, id: &JobId, max_wait: Duration) -> SwsResult<JobStatus> {
        let deadline = Instant::now() + max_wait;
        loop {
            let status = self.run(id).await?;
            if status.is_terminal() {
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(status);
            }

            let job = self.jobs.get(id).await?;
            let Some(hash) = job.source_hash.as_deref() else {
                return Err(SwsError::Internal(format!(
                    "job {id} is running without a source hash"
                )));
            };
            let key: CacheKey = hash.parse()?;
            let wait = self.wait_poll.min(deadline - now);
            self.cache.wait_for_change(&key, wait).await?;
        }
    }
}
