use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
        Mutex,
        RwLock,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{error, info, warn};

use crate::{
    catalog::ObjectCatalog,
    data_model::{
        EventType,
        FileTransfer,
        FileTransferState,
        JobPriority,
        JobStatus,
        MigrationJob,
        MigrationJobBuilder,
        ProviderKind,
    },
    events::EventBus,
    metrics,
    providers::{ProviderError, ProviderRegistry},
    state_store::StateStore,
    utils::get_epoch_time_in_ms,
};

pub mod queue;
pub mod retry;
mod worker;

use queue::ReadyQueue;
use retry::RetryPolicy;

fn default_max_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_per_job_parallelism() -> usize {
    4
}
fn default_per_route_concurrency() -> usize {
    8
}
fn default_max_concurrent_transfers() -> usize {
    32
}
fn default_ready_queue_capacity() -> usize {
    128
}
fn default_file_deadline_seconds() -> u64 {
    60
}
fn default_max_files_per_job() -> usize {
    1_000
}
fn default_active_jobs_per_owner() -> usize {
    8
}
fn default_dedup_window_seconds() -> u64 {
    300
}
fn default_progress_event_interval_ms() -> u64 {
    1_000
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_quota_backoff_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_per_job_parallelism")]
    pub per_job_parallelism: usize,
    #[serde(default = "default_per_route_concurrency")]
    pub per_route_concurrency: usize,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_ready_queue_capacity")]
    pub ready_queue_capacity: usize,
    #[serde(default = "default_file_deadline_seconds")]
    pub file_deadline_seconds: u64,
    #[serde(default = "default_max_files_per_job")]
    pub max_files_per_job: usize,
    #[serde(default = "default_active_jobs_per_owner")]
    pub active_jobs_per_owner: usize,
    #[serde(default = "default_dedup_window_seconds")]
    pub dedup_window_seconds: u64,
    #[serde(default = "default_progress_event_interval_ms")]
    pub progress_event_interval_ms: u64,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_quota_backoff_ms")]
    pub quota_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        serde_json::from_value(json!({})).expect("engine defaults are valid")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    pub source_provider: ProviderKind,
    pub dest_provider: ProviderKind,
    #[serde(default)]
    pub source_container: Option<String>,
    #[serde(default)]
    pub dest_container: Option<String>,
    pub file_list: Vec<String>,
    #[serde(default)]
    pub priority: JobPriority,
}

/// Mutable runtime state of one job. The job itself sits behind a mutex
/// whose critical sections never cross an await; the cancellation flag is
/// the cooperative signal workers observe between and during transfers.
pub(crate) struct JobHandle {
    pub(crate) job: Mutex<MigrationJob>,
    pub(crate) cancel: AtomicBool,
    pub(crate) cancel_notify: Notify,
    pub(crate) last_progress_event_ms: AtomicU64,
}

impl JobHandle {
    fn new(job: MigrationJob) -> Arc<Self> {
        Arc::new(Self {
            job: Mutex::new(job),
            cancel: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            last_progress_event_ms: AtomicU64::new(0),
        })
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> MigrationJob {
        self.job.lock().expect("job lock poisoned").clone()
    }
}

/// Creates, schedules, executes and reports on migration jobs. Locks are
/// always taken jobs-index, then queue, then per-job, which keeps the
/// paths cycle-free.
pub struct MigrationEngine {
    config: EngineConfig,
    retry_policy: RetryPolicy,
    providers: Arc<ProviderRegistry>,
    default_containers: HashMap<ProviderKind, String>,
    state_store: Arc<StateStore>,
    event_bus: Arc<EventBus>,
    catalog: Arc<ObjectCatalog>,
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    pub(crate) queue: ReadyQueue,
    pub(crate) metrics: metrics::engine::Metrics,
    resumed: AtomicBool,
    pub(crate) global_transfers: Arc<Semaphore>,
    route_limits: Mutex<HashMap<(ProviderKind, ProviderKind), Arc<Semaphore>>>,
    dedup: Mutex<HashMap<String, (String, u64)>>,
}

impl MigrationEngine {
    pub fn new(
        config: EngineConfig,
        providers: Arc<ProviderRegistry>,
        default_containers: HashMap<ProviderKind, String>,
        state_store: Arc<StateStore>,
        event_bus: Arc<EventBus>,
        catalog: Arc<ObjectCatalog>,
    ) -> Arc<Self> {
        let retry_policy = RetryPolicy {
            max_attempts: config.max_attempts,
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            quota_backoff_ms: config.quota_backoff_ms,
        };
        Arc::new(Self {
            queue: ReadyQueue::new(config.ready_queue_capacity),
            global_transfers: Arc::new(Semaphore::new(config.max_concurrent_transfers.max(1))),
            retry_policy,
            config,
            providers,
            default_containers,
            state_store,
            event_bus,
            catalog,
            jobs: RwLock::new(HashMap::new()),
            metrics: metrics::engine::Metrics::new(),
            resumed: AtomicBool::new(false),
            route_limits: Mutex::new(HashMap::new()),
            dedup: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Reloads persisted jobs and spawns the worker pool. Jobs that were
    /// PENDING or RUNNING at shutdown are resumed; their in-flight files
    /// return to QUEUED first.
    pub async fn start(self: &Arc<Self>, shutdown_rx: watch::Receiver<()>) -> anyhow::Result<()> {
        self.resume_persisted()?;
        for worker_id in 0..self.config.max_workers.max(1) {
            let engine = self.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                engine.worker_loop(worker_id, shutdown_rx).await;
            });
        }
        Ok(())
    }

    pub(crate) fn resume_persisted(&self) -> anyhow::Result<()> {
        if self.resumed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let persisted = self.state_store.all_jobs()?;
        let mut resumed = 0usize;
        for mut job in persisted {
            let terminal = job.status.is_terminal();
            if !terminal {
                for file in &mut job.files {
                    if matches!(
                        file.state,
                        FileTransferState::InFlight | FileTransferState::Copied
                    ) {
                        file.state = FileTransferState::Queued;
                    }
                }
                self.state_store.upsert_job(&job)?;
            }
            let id = job.id.clone();
            let priority = job.priority;
            self.jobs
                .write()
                .expect("jobs index lock poisoned")
                .insert(id.clone(), JobHandle::new(job));
            if !terminal {
                if let Err(err) = self.queue.push(id.clone(), priority) {
                    warn!(job_id = %id, "could not re-enqueue persisted job: {err}");
                } else {
                    resumed += 1;
                }
            }
        }
        if resumed > 0 {
            info!(resumed, "resumed persisted migration jobs");
        }
        Ok(())
    }

    /// Validates and persists a new job, then enqueues it. Resubmission of
    /// an identical request inside the dedup window returns the original
    /// job id instead of creating a duplicate.
    pub async fn create_job(
        &self,
        request: CreateJobRequest,
        owner: &str,
    ) -> Result<String, EngineError> {
        if request.file_list.is_empty() {
            return Err(EngineError::InvalidArgument(
                "file_list must contain at least one key".to_string(),
            ));
        }
        if request.file_list.len() > self.config.max_files_per_job {
            return Err(EngineError::InvalidArgument(format!(
                "file_list exceeds the {}-file limit",
                self.config.max_files_per_job
            )));
        }

        let source = self
            .providers
            .get(request.source_provider)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        self.providers
            .get(request.dest_provider)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        let source_container = self
            .resolve_container(request.source_container.as_deref(), request.source_provider)?;
        let dest_container =
            self.resolve_container(request.dest_container.as_deref(), request.dest_provider)?;

        let dedup_key = MigrationJob::dedup_key_from(
            owner,
            request.source_provider,
            &source_container,
            request.dest_provider,
            &dest_container,
            &request.file_list,
        );
        if let Some(existing) = self.dedup_hit(&dedup_key) {
            info!(job_id = %existing, "deduplicated migration submission");
            return Ok(existing);
        }

        let active = self.active_jobs_owned_by(owner);
        if active >= self.config.active_jobs_per_owner {
            return Err(EngineError::Overloaded(format!(
                "owner {owner} already has {active} active jobs"
            )));
        }

        // One stat against a representative file proves the source
        // container is reachable with our credentials. A missing file is
        // fine here; it will fail per-file later.
        match source
            .stat(&source_container, &request.file_list[0])
            .await
        {
            Ok(_) | Err(ProviderError::NotFound(_)) => {}
            Err(ProviderError::PermissionDenied(msg)) => {
                return Err(EngineError::Forbidden(format!(
                    "source container is not accessible: {msg}"
                )));
            }
            Err(err) => {
                return Err(EngineError::ProviderUnavailable(format!(
                    "source container validation failed: {err}"
                )));
            }
        }

        let files = request
            .file_list
            .iter()
            .map(|key| FileTransfer::new(key.clone()))
            .collect::<Vec<_>>();
        let job = MigrationJobBuilder::default()
            .source_provider(request.source_provider)
            .dest_provider(request.dest_provider)
            .source_container(source_container)
            .dest_container(dest_container)
            .files(files)
            .priority(request.priority)
            .owner(owner.to_string())
            .dedup_key(dedup_key.clone())
            .build()
            .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;
        let job_id = job.id.clone();

        self.state_store.upsert_job(&job)?;
        self.jobs
            .write()
            .expect("jobs index lock poisoned")
            .insert(job_id.clone(), JobHandle::new(job));

        if let Err(err) = self.queue.push(job_id.clone(), request.priority) {
            // Roll the persisted job back; the submission never happened.
            self.jobs
                .write()
                .expect("jobs index lock poisoned")
                .remove(&job_id);
            let _ = self.state_store.delete_job(&job_id);
            return Err(EngineError::Overloaded(err.to_string()));
        }

        self.dedup
            .lock()
            .expect("dedup lock poisoned")
            .insert(dedup_key, (job_id.clone(), get_epoch_time_in_ms()));

        info!(job_id = %job_id, owner, "created migration job");
        Ok(job_id)
    }

    fn resolve_container(
        &self,
        requested: Option<&str>,
        provider: ProviderKind,
    ) -> Result<String, EngineError> {
        requested
            .map(str::to_string)
            .or_else(|| self.default_containers.get(&provider).cloned())
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "no container given and provider {provider} has no default"
                ))
            })
    }

    fn dedup_hit(&self, dedup_key: &str) -> Option<String> {
        let now = get_epoch_time_in_ms();
        let window_ms = self.config.dedup_window_seconds * 1000;
        let mut dedup = self.dedup.lock().expect("dedup lock poisoned");
        dedup.retain(|_, (_, created)| now.saturating_sub(*created) <= window_ms);
        dedup.get(dedup_key).map(|(job_id, _)| job_id.clone())
    }

    fn active_jobs_owned_by(&self, owner: &str) -> usize {
        self.jobs
            .read()
            .expect("jobs index lock poisoned")
            .values()
            .filter(|handle| {
                let job = handle.job.lock().expect("job lock poisoned");
                job.owner == owner && !job.status.is_terminal()
            })
            .count()
    }

    pub fn get_job(&self, job_id: &str) -> Option<MigrationJob> {
        self.jobs
            .read()
            .expect("jobs index lock poisoned")
            .get(job_id)
            .map(|handle| handle.snapshot())
    }

    /// All jobs, newest first. Caller applies visibility rules.
    pub fn list_jobs(&self) -> Vec<MigrationJob> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .expect("jobs index lock poisoned")
            .values()
            .map(|handle| handle.snapshot())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn active_job_count(&self) -> usize {
        self.jobs
            .read()
            .expect("jobs index lock poisoned")
            .values()
            .filter(|handle| !handle.job.lock().expect("job lock poisoned").status.is_terminal())
            .count()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Cooperative cancellation. A job no worker picked up yet settles
    /// immediately; a running job is flagged and its worker finalizes at
    /// the next checkpoint. Cancelling a terminal job is a conflict and
    /// mutates nothing.
    pub fn cancel_job(&self, job_id: &str) -> Result<MigrationJob, EngineError> {
        let handle = self
            .jobs
            .read()
            .expect("jobs index lock poisoned")
            .get(job_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("job {job_id}")))?;

        let (was_pending, snapshot) = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            if job.status.is_terminal() {
                return Err(EngineError::Conflict(format!(
                    "job {job_id} is already {}",
                    job.status
                )));
            }
            handle.cancel.store(true, Ordering::Relaxed);
            let was_pending = job.status == JobStatus::Pending;
            if was_pending {
                for file in &mut job.files {
                    if file.state == FileTransferState::Queued {
                        file.state = FileTransferState::Skipped;
                    }
                }
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(get_epoch_time_in_ms());
                job.recompute_progress();
            }
            (was_pending, job.clone())
        };
        handle.cancel_notify.notify_waiters();

        if was_pending {
            self.state_store.upsert_job(&snapshot)?;
            self.emit_job_event(EventType::MigrationCancelled, &snapshot);
        }
        info!(job_id, "cancellation requested");
        Ok(snapshot)
    }

    pub(crate) fn job_handle(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        self.jobs
            .read()
            .expect("jobs index lock poisoned")
            .get(job_id)
            .cloned()
    }

    pub(crate) fn route_semaphore(
        &self,
        route: (ProviderKind, ProviderKind),
    ) -> Arc<Semaphore> {
        self.route_limits
            .lock()
            .expect("route limits lock poisoned")
            .entry(route)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_route_concurrency.max(1))))
            .clone()
    }

    /// Throttling feedback: withdraws one slot from the route's concurrency
    /// cap and hands it back after a cooldown. Never drains the last slot.
    pub(crate) fn throttle_route(&self, route: (ProviderKind, ProviderKind)) {
        let semaphore = self.route_semaphore(route);
        if semaphore.available_permits() <= 1 {
            return;
        }
        let Ok(permit) = semaphore.try_acquire_owned() else {
            return;
        };
        let cooldown = Duration::from_millis(self.config.quota_backoff_ms.min(30_000));
        info!(
            source = %route.0,
            dest = %route.1,
            cooldown_ms = cooldown.as_millis() as u64,
            "throttling route after provider pushback"
        );
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            drop(permit);
        });
    }

    pub(crate) fn persist(&self, job: &MigrationJob) {
        if let Err(err) = self.state_store.upsert_job(job) {
            error!(job_id = %job.id, "failed to persist job state: {err:#}");
        }
    }

    pub(crate) fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub(crate) fn catalog(&self) -> &ObjectCatalog {
        &self.catalog
    }

    pub(crate) fn emit_job_event(&self, event_type: EventType, job: &MigrationJob) {
        let counts = job.counts();
        self.event_bus.publish(
            event_type,
            json!({
                "job_id": job.id,
                "source_provider": job.source_provider,
                "dest_provider": job.dest_provider,
                "status": job.status,
                "priority": job.priority,
                "progress_percentage": job.progress_percentage,
                "total_files": job.files.len(),
                "files_completed": counts.completed,
                "files_failed": counts.failed,
                "files_skipped": counts.skipped,
            }),
        );
    }

    /// Rate-limited progress event; file-level events are never limited.
    pub(crate) fn emit_progress_event(&self, handle: &JobHandle) {
        let now = get_epoch_time_in_ms();
        let last = handle.last_progress_event_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.config.progress_event_interval_ms {
            return;
        }
        if handle
            .last_progress_event_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let snapshot = handle.snapshot();
        self.emit_job_event(EventType::MigrationProgress, &snapshot);
    }

    pub(crate) fn emit_file_event(
        &self,
        event_type: EventType,
        job: &MigrationJob,
        file: &FileTransfer,
    ) {
        self.event_bus.publish(
            event_type,
            json!({
                "job_id": job.id,
                "source_key": file.source_key,
                "dest_key": file.dest_key,
                "state": file.state,
                "bytes_transferred": file.bytes_transferred,
                "attempts": file.attempts,
                "error": file.last_error,
            }),
        );
    }
}
