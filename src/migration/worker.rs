use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{sync::watch, time::timeout};
use tracing::{info, warn};

use super::{JobHandle, MigrationEngine};
use crate::{
    data_model::{
        EventType,
        FileTransferState,
        JobStatus,
        TransferError,
        TransferErrorKind,
    },
    migration::retry::classify_provider_error,
    providers::{OverwriteMode, ProviderAdapter},
    utils::get_epoch_time_in_ms,
};

enum Outcome {
    Verified,
    Cancelled,
    Failed(TransferError),
}

fn deadline_error(step: &str) -> TransferError {
    TransferError {
        kind: TransferErrorKind::DeadlineExceeded,
        message: format!("{step} exceeded the per-step deadline"),
    }
}

impl MigrationEngine {
    pub(crate) async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        info!(worker_id, "migration worker started");
        while let Some(job_id) = self.queue.pop(&mut shutdown_rx).await {
            match self.job_handle(&job_id) {
                Some(handle) => self.run_job(&handle).await,
                None => warn!(job_id = %job_id, "dequeued a job the index does not know"),
            }
        }
        info!(worker_id, "migration worker stopped");
    }

    #[tracing::instrument(skip(self, handle), fields(job_id = %handle.snapshot().id))]
    async fn run_job(&self, handle: &Arc<JobHandle>) {
        let (proceed, was_pending, snapshot) = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            if job.status.is_terminal() {
                (false, false, job.clone())
            } else {
                let was_pending = job.status == JobStatus::Pending;
                if was_pending {
                    job.status = JobStatus::Running;
                    job.started_at = Some(get_epoch_time_in_ms());
                }
                (true, was_pending, job.clone())
            }
        };
        if !proceed {
            return;
        }
        self.persist(&snapshot);
        if was_pending {
            self.emit_job_event(EventType::MigrationStarted, &snapshot);
        }

        let queued: Vec<usize> = snapshot
            .files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.state == FileTransferState::Queued)
            .map(|(idx, _)| idx)
            .collect();
        let parallelism = self
            .config
            .per_job_parallelism
            .min(queued.len().max(1))
            .max(1);

        futures::stream::iter(queued)
            .for_each_concurrent(parallelism, |idx| async move {
                self.process_file(handle, idx).await;
            })
            .await;

        let snapshot = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            if !job.status.is_terminal() {
                if handle.cancelled() {
                    for file in &mut job.files {
                        if file.state == FileTransferState::Queued {
                            file.state = FileTransferState::Skipped;
                        }
                    }
                    job.status = JobStatus::Cancelled;
                } else {
                    job.status = job.aggregate_outcome();
                }
                job.completed_at = Some(get_epoch_time_in_ms());
                job.recompute_progress();
            }
            job.clone()
        };
        self.persist(&snapshot);

        let event = match snapshot.status {
            JobStatus::Completed => EventType::MigrationCompleted,
            JobStatus::Cancelled => EventType::MigrationCancelled,
            _ => EventType::MigrationFailed,
        };
        self.emit_job_event(event, &snapshot);

        if snapshot.counts().completed > 0 {
            self.catalog().apply_migration(&snapshot).await;
        }
        info!(status = %snapshot.status, "migration job settled");
    }

    /// Drives one file through stat → copy → verify, with retries. Holds
    /// one global and one per-route permit for the whole transfer.
    async fn process_file(&self, handle: &Arc<JobHandle>, idx: usize) {
        if handle.cancelled() {
            let snapshot = {
                let mut job = handle.job.lock().expect("job lock poisoned");
                if job.files[idx].state == FileTransferState::Queued {
                    job.files[idx].state = FileTransferState::Skipped;
                    job.recompute_progress();
                    Some(job.clone())
                } else {
                    None
                }
            };
            if let Some(snapshot) = snapshot {
                self.persist(&snapshot);
            }
            return;
        }

        let Ok(_global_permit) = self.global_transfers.clone().acquire_owned().await else {
            return;
        };
        let route = handle.job.lock().expect("job lock poisoned").route();
        let Ok(_route_permit) = self.route_semaphore(route).acquire_owned().await else {
            return;
        };

        let (source, dest) = {
            let source = self.providers().get(route.0);
            let dest = self.providers().get(route.1);
            match (source, dest) {
                (Ok(source), Ok(dest)) => (source, dest),
                (Err(err), _) | (_, Err(err)) => {
                    self.settle_file_failed(handle, idx, classify_provider_error(&err));
                    return;
                }
            }
        };

        let snapshot = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            let file = &mut job.files[idx];
            file.state = FileTransferState::InFlight;
            file.attempts += 1;
            job.clone()
        };
        self.persist(&snapshot);

        let _timer = crate::metrics::Timer::start_with_labels(&self.metrics.transfer_duration, &[]);
        loop {
            match self.transfer_once(handle, idx, &source, &dest).await {
                Outcome::Verified => {
                    let snapshot = handle.snapshot();
                    self.metrics.files_transferred.add(1, &[]);
                    self.metrics
                        .bytes_transferred
                        .add(snapshot.files[idx].bytes_transferred, &[]);
                    self.emit_file_event(
                        EventType::MigrationFileCompleted,
                        &snapshot,
                        &snapshot.files[idx],
                    );
                    self.emit_progress_event(handle);
                    return;
                }
                Outcome::Cancelled => {
                    // The attempt was already in flight, so SKIPPED is off
                    // the table: an aborted transfer settles as FAILED and
                    // is counted.
                    self.settle_file_failed(
                        handle,
                        idx,
                        TransferError {
                            kind: TransferErrorKind::Cancelled,
                            message: "transfer aborted by job cancellation".to_string(),
                        },
                    );
                    return;
                }
                Outcome::Failed(error) => {
                    let attempts = {
                        let job = handle.job.lock().expect("job lock poisoned");
                        job.files[idx].attempts
                    };
                    if matches!(
                        error.kind,
                        TransferErrorKind::QuotaExceeded | TransferErrorKind::Transient
                    ) {
                        self.throttle_route(route);
                    }
                    let Some(delay) = self.retry_policy().next_delay(&error, attempts) else {
                        self.settle_file_failed(handle, idx, error);
                        return;
                    };

                    let snapshot = {
                        let mut job = handle.job.lock().expect("job lock poisoned");
                        let file = &mut job.files[idx];
                        file.state = FileTransferState::Queued;
                        file.last_error = Some(error);
                        job.clone()
                    };
                    self.persist(&snapshot);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = handle.cancel_notify.notified() => {}
                    }
                    if handle.cancelled() {
                        return;
                    }

                    let snapshot = {
                        let mut job = handle.job.lock().expect("job lock poisoned");
                        let file = &mut job.files[idx];
                        file.state = FileTransferState::InFlight;
                        file.attempts += 1;
                        job.clone()
                    };
                    self.persist(&snapshot);
                }
            }
        }
    }

    fn settle_file_failed(&self, handle: &Arc<JobHandle>, idx: usize, error: TransferError) {
        self.metrics.files_failed.add(1, &[]);
        let snapshot = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            let file = &mut job.files[idx];
            file.state = FileTransferState::Failed;
            file.last_error = Some(error);
            job.recompute_progress();
            job.clone()
        };
        self.persist(&snapshot);
        self.emit_file_event(
            EventType::MigrationFileFailed,
            &snapshot,
            &snapshot.files[idx],
        );
        self.emit_progress_event(handle);
    }

    /// One attempt: stat source, copy, record COPIED, verify by re-stat,
    /// record VERIFIED. Every provider call runs under the per-step
    /// deadline, and the copy aborts on the job's cancellation signal.
    async fn transfer_once(
        &self,
        handle: &Arc<JobHandle>,
        idx: usize,
        source: &Arc<ProviderAdapter>,
        dest: &Arc<ProviderAdapter>,
    ) -> Outcome {
        let deadline = Duration::from_secs(self.config.file_deadline_seconds.max(1));
        let (source_container, dest_container, source_key, dest_key) = {
            let job = handle.job.lock().expect("job lock poisoned");
            let file = &job.files[idx];
            (
                job.source_container.clone(),
                job.dest_container.clone(),
                file.source_key.clone(),
                file.dest_key.clone(),
            )
        };

        let src_ref = match timeout(deadline, source.stat(&source_container, &source_key)).await {
            Err(_) => return Outcome::Failed(deadline_error("source stat")),
            Ok(Err(err)) => return Outcome::Failed(classify_provider_error(&err)),
            Ok(Ok(src_ref)) => src_ref,
        };

        if handle.cancelled() {
            return Outcome::Cancelled;
        }
        let copy = dest.copy_object(
            source,
            &src_ref,
            &dest_container,
            &dest_key,
            OverwriteMode::IfDifferent,
        );
        let bytes = tokio::select! {
            biased;
            _ = handle.cancel_notify.notified() => return Outcome::Cancelled,
            result = timeout(deadline, copy) => match result {
                Err(_) => return Outcome::Failed(deadline_error("copy")),
                Ok(Err(err)) => return Outcome::Failed(classify_provider_error(&err)),
                Ok(Ok(bytes)) => bytes,
            },
        };

        let snapshot = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            let file = &mut job.files[idx];
            file.state = FileTransferState::Copied;
            file.bytes_transferred = bytes;
            job.clone()
        };
        self.persist(&snapshot);

        let dest_ref = match timeout(deadline, dest.stat(&dest_container, &dest_key)).await {
            Err(_) => return Outcome::Failed(deadline_error("destination stat")),
            Ok(Err(err)) => return Outcome::Failed(classify_provider_error(&err)),
            Ok(Ok(dest_ref)) => dest_ref,
        };

        // Etags are only comparable within one provider; across providers
        // the size check has to stand alone.
        let etag_ok = if source.kind() == dest.kind() {
            match (&src_ref.etag, &dest_ref.etag) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        } else {
            true
        };
        if dest_ref.size_bytes != src_ref.size_bytes || !etag_ok {
            return Outcome::Failed(TransferError {
                kind: TransferErrorKind::VerificationMismatch,
                message: format!(
                    "destination reports {} bytes, source {} bytes",
                    dest_ref.size_bytes, src_ref.size_bytes
                ),
            });
        }

        let snapshot = {
            let mut job = handle.job.lock().expect("job lock poisoned");
            let file = &mut job.files[idx];
            file.state = FileTransferState::Verified;
            file.last_error = None;
            job.recompute_progress();
            job.clone()
        };
        self.persist(&snapshot);
        Outcome::Verified
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::watch;

    use super::*;
    use crate::{
        catalog::ObjectCatalog,
        data_model::{
            FileTransfer,
            JobPriority,
            MigrationJobBuilder,
            ProviderKind,
        },
        events::{BusSubscription, EventBus, StreamFrame, SubscriptionItem},
        migration::{CreateJobRequest, EngineConfig, EngineError, MigrationEngine},
        providers::{
            mock::{MockAdapter, MockOp},
            ProviderError,
            ProviderRegistry,
        },
        state_store::StateStore,
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<MigrationEngine>,
        bus: Arc<EventBus>,
        store: Arc<StateStore>,
        aws: MockAdapter,
        azure: MockAdapter,
        shutdown_tx: watch::Sender<()>,
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            base_backoff_ms: 2,
            max_backoff_ms: 10,
            quota_backoff_ms: 10,
            progress_event_interval_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        let bus = Arc::new(EventBus::new(10_000, 4096));
        let catalog = Arc::new(ObjectCatalog::new());

        let aws = MockAdapter::new(ProviderKind::Aws);
        let azure = MockAdapter::new(ProviderKind::Azure);
        let gcp = MockAdapter::new(ProviderKind::Gcp);
        let mut registry = ProviderRegistry::new();
        registry.register(crate::providers::ProviderAdapter::Mock(aws.clone()));
        registry.register(crate::providers::ProviderAdapter::Mock(azure.clone()));
        registry.register(crate::providers::ProviderAdapter::Mock(gcp));

        let default_containers = HashMap::from([
            (ProviderKind::Aws, "bucket-a".to_string()),
            (ProviderKind::Azure, "bucket-b".to_string()),
            (ProviderKind::Gcp, "bucket-c".to_string()),
        ]);

        let engine = MigrationEngine::new(
            config,
            Arc::new(registry),
            default_containers,
            store.clone(),
            bus.clone(),
            catalog,
        );
        let (shutdown_tx, _) = watch::channel(());
        Fixture {
            _dir: dir,
            engine,
            bus,
            store,
            aws,
            azure,
            shutdown_tx,
        }
    }

    fn request(
        source: ProviderKind,
        dest: ProviderKind,
        files: &[&str],
    ) -> CreateJobRequest {
        CreateJobRequest {
            source_provider: source,
            dest_provider: dest,
            source_container: None,
            dest_container: None,
            file_list: files.iter().map(|f| f.to_string()).collect(),
            priority: JobPriority::Normal,
        }
    }

    async fn wait_terminal(engine: &MigrationEngine, job_id: &str) -> crate::data_model::MigrationJob {
        for _ in 0..1000 {
            let job = engine.get_job(job_id).expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} did not settle in time");
    }

    async fn next_job_event(subscription: &mut BusSubscription, job_id: &str) -> EventType {
        loop {
            match timeout(Duration::from_secs(5), subscription.next_item())
                .await
                .expect("event stream stalled")
            {
                SubscriptionItem::Frame(StreamFrame::Event { payload, .. }) => {
                    if payload.job_id() == Some(job_id) {
                        return payload.event_type;
                    }
                }
                SubscriptionItem::Frame(_) => {}
                SubscriptionItem::Lagged(_) => {}
                SubscriptionItem::Closed => panic!("bus closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_s1_happy_migration_across_providers() {
        let fixture = fixture(fast_config());
        fixture
            .aws
            .insert_object("bucket-a", "report.pdf", vec![42u8; 1_048_576], "STANDARD");
        let mut subscription = fixture.bus.subscribe(0);

        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["report.pdf"]),
                "alice",
            )
            .await
            .unwrap();

        let job = wait_terminal(&fixture.engine, &job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percentage, 100);
        assert_eq!(job.counts().completed, 1);
        assert!(job.started_at.is_some() && job.completed_at.is_some());

        let migrated = fixture.azure.stat("bucket-b", "report.pdf").unwrap();
        assert_eq!(migrated.size_bytes, 1_048_576);

        // Lifecycle events for this job arrive in publication order.
        assert_eq!(
            next_job_event(&mut subscription, &job_id).await,
            EventType::MigrationStarted
        );
        let mut saw_file_completed = false;
        loop {
            let event = next_job_event(&mut subscription, &job_id).await;
            match event {
                EventType::MigrationFileCompleted => saw_file_completed = true,
                EventType::MigrationProgress => {}
                EventType::MigrationCompleted => break,
                other => panic!("unexpected event {other}"),
            }
        }
        assert!(saw_file_completed);
    }

    #[tokio::test]
    async fn test_s2_partial_failure_not_found_is_not_retried() {
        let fixture = fixture(fast_config());
        fixture
            .aws
            .insert_object("bucket-a", "a.bin", vec![1u8; 128], "STANDARD");
        // b.bin does not exist anywhere.

        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Gcp, &["a.bin", "b.bin"]),
                "alice",
            )
            .await
            .unwrap();

        let job = wait_terminal(&fixture.engine, &job_id).await;
        assert_eq!(job.status, JobStatus::PartiallyFailed);

        let a = job.files.iter().find(|f| f.source_key == "a.bin").unwrap();
        assert_eq!(a.state, FileTransferState::Verified);

        let b = job.files.iter().find(|f| f.source_key == "b.bin").unwrap();
        assert_eq!(b.state, FileTransferState::Failed);
        assert_eq!(b.attempts, 1);
        assert_eq!(
            b.last_error.as_ref().unwrap().kind,
            TransferErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_success() {
        let fixture = fixture(fast_config());
        fixture
            .aws
            .insert_object("bucket-a", "ok.bin", vec![1u8; 64], "STANDARD");
        fixture
            .aws
            .insert_object("bucket-a", "flaky.bin", vec![2u8; 64], "STANDARD");
        for _ in 0..2 {
            fixture.aws.push_failure(
                MockOp::Get,
                "flaky.bin",
                ProviderError::Transient("connection reset".to_string()),
            );
        }

        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["ok.bin", "flaky.bin"]),
                "alice",
            )
            .await
            .unwrap();

        let job = wait_terminal(&fixture.engine, &job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        let flaky = job.files.iter().find(|f| f.source_key == "flaky.bin").unwrap();
        assert_eq!(flaky.state, FileTransferState::Verified);
        assert_eq!(flaky.attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempt_budget() {
        let fixture = fixture(fast_config());
        fixture
            .aws
            .insert_object("bucket-a", "doomed.bin", vec![2u8; 64], "STANDARD");
        for _ in 0..3 {
            fixture.aws.push_failure(
                MockOp::Get,
                "doomed.bin",
                ProviderError::Transient("still down".to_string()),
            );
        }

        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["doomed.bin"]),
                "alice",
            )
            .await
            .unwrap();

        let job = wait_terminal(&fixture.engine, &job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        let file = &job.files[0];
        assert_eq!(file.attempts, 3);
        assert_eq!(
            file.last_error.as_ref().unwrap().kind,
            TransferErrorKind::Transient
        );
    }

    #[tokio::test]
    async fn test_s3_cancellation_mid_flight() {
        let config = EngineConfig {
            per_job_parallelism: 2,
            max_workers: 1,
            ..fast_config()
        };
        let fixture = fixture(config);
        let files: Vec<String> = (0..10).map(|i| format!("file-{i:02}.bin")).collect();
        for file in &files {
            fixture
                .aws
                .insert_object("bucket-a", file, vec![7u8; 256], "STANDARD");
        }
        fixture.azure.set_put_latency(Duration::from_millis(25));

        let mut subscription = fixture.bus.subscribe(0);
        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let file_refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &file_refs),
                "alice",
            )
            .await
            .unwrap();

        // Wait until at least one file settled, then pull the plug.
        loop {
            if next_job_event(&mut subscription, &job_id).await
                == EventType::MigrationFileCompleted
            {
                break;
            }
        }
        fixture.engine.cancel_job(&job_id).unwrap();

        let job = wait_terminal(&fixture.engine, &job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        let counts = job.counts();
        assert_eq!(counts.total(), 10);
        assert_eq!(counts.queued, 0);
        assert_eq!(counts.in_flight, 0);
        assert!(counts.completed >= 1);
        assert!(counts.skipped >= 1);
        assert_eq!(
            job.progress_percentage as usize,
            100 * counts.settled() / 10
        );

        // A file that was in flight when the cancel landed settles as
        // VERIFIED or FAILED; only files that never started may be SKIPPED.
        for file in &job.files {
            if file.attempts > 0 {
                assert!(
                    matches!(
                        file.state,
                        FileTransferState::Verified | FileTransferState::Failed
                    ),
                    "started file {} ended as {:?}",
                    file.source_key,
                    file.state
                );
                if file.state == FileTransferState::Failed {
                    assert_eq!(
                        file.last_error.as_ref().unwrap().kind,
                        TransferErrorKind::Cancelled
                    );
                }
            } else {
                assert_eq!(file.state, FileTransferState::Skipped);
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_pending_job_skips_everything() {
        let fixture = fixture(fast_config());
        fixture
            .aws
            .insert_object("bucket-a", "a.bin", vec![1u8; 32], "STANDARD");

        // No workers running: the job stays PENDING in the queue.
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["a.bin"]),
                "alice",
            )
            .await
            .unwrap();
        let cancelled = fixture.engine.cancel_job(&job_id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled
            .files
            .iter()
            .all(|f| f.state == FileTransferState::Skipped));

        // Terminal jobs refuse a second cancellation and stay unchanged.
        let err = fixture.engine.cancel_job(&job_id).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(
            fixture.engine.get_job(&job_id).unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_empty_and_oversized_file_lists_rejected() {
        let fixture = fixture(fast_config());
        let err = fixture
            .engine
            .create_job(request(ProviderKind::Aws, ProviderKind::Azure, &[]), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let config = EngineConfig {
            max_files_per_job: 2,
            ..fast_config()
        };
        let fixture = fixture(config);
        let err = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["a", "b", "c"]),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_ready_queue_overload_rejects_submission() {
        let config = EngineConfig {
            ready_queue_capacity: 1,
            ..fast_config()
        };
        let fixture = fixture(config);
        fixture
            .aws
            .insert_object("bucket-a", "a.bin", vec![1u8; 32], "STANDARD");
        fixture
            .aws
            .insert_object("bucket-a", "b.bin", vec![1u8; 32], "STANDARD");

        fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["a.bin"]),
                "alice",
            )
            .await
            .unwrap();
        let err = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["b.bin"]),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Overloaded(_)));

        // The rejected job rolled back entirely.
        assert_eq!(fixture.engine.list_jobs().len(), 1);
        assert_eq!(fixture.store.all_jobs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_submission_returns_same_job() {
        let fixture = fixture(fast_config());
        fixture
            .aws
            .insert_object("bucket-a", "a.bin", vec![1u8; 32], "STANDARD");

        let req = request(ProviderKind::Aws, ProviderKind::Azure, &["a.bin"]);
        let first = fixture
            .engine
            .create_job(req.clone(), "alice")
            .await
            .unwrap();
        let second = fixture
            .engine
            .create_job(req.clone(), "alice")
            .await
            .unwrap();
        assert_eq!(first, second);

        // A different owner is a different request identity.
        let other = fixture.engine.create_job(req, "bob").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_per_owner_active_job_cap() {
        let config = EngineConfig {
            active_jobs_per_owner: 1,
            ..fast_config()
        };
        let fixture = fixture(config);
        fixture
            .aws
            .insert_object("bucket-a", "a.bin", vec![1u8; 32], "STANDARD");
        fixture
            .aws
            .insert_object("bucket-a", "b.bin", vec![1u8; 32], "STANDARD");

        fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["a.bin"]),
                "alice",
            )
            .await
            .unwrap();
        let err = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["b.bin"]),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Overloaded(_)));
    }

    #[tokio::test]
    async fn test_permission_denied_on_source_validation() {
        let fixture = fixture(fast_config());
        fixture.aws.push_failure(
            MockOp::Stat,
            "a.bin",
            ProviderError::PermissionDenied("403".to_string()),
        );
        let err = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["a.bin"]),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        let bus = Arc::new(EventBus::new(16, 16));
        let catalog = Arc::new(ObjectCatalog::new());
        // Registry with only AWS configured.
        let aws = MockAdapter::new(ProviderKind::Aws);
        let mut registry = ProviderRegistry::new();
        registry.register(crate::providers::ProviderAdapter::Mock(aws));
        let engine = MigrationEngine::new(
            fast_config(),
            Arc::new(registry),
            HashMap::from([(ProviderKind::Aws, "bucket-a".to_string())]),
            store,
            bus,
            catalog,
        );

        let err = engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["a.bin"]),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_restart_requeues_in_flight_files() {
        let fixture = fixture(fast_config());

        // A job that was RUNNING with one file mid-transfer when the
        // process died.
        let mut in_flight = FileTransfer::new("partial.bin");
        in_flight.state = FileTransferState::InFlight;
        in_flight.attempts = 1;
        let mut done = FileTransfer::new("done.bin");
        done.state = FileTransferState::Verified;
        let job = MigrationJobBuilder::default()
            .source_provider(ProviderKind::Aws)
            .dest_provider(ProviderKind::Azure)
            .source_container("bucket-a".to_string())
            .dest_container("bucket-b".to_string())
            .files(vec![in_flight, done])
            .status(JobStatus::Running)
            .owner("alice".to_string())
            .dedup_key("restart".to_string())
            .build()
            .unwrap();
        fixture.store.upsert_job(&job).unwrap();

        fixture.engine.resume_persisted().unwrap();

        let resumed = fixture.engine.get_job(&job.id).unwrap();
        assert_eq!(resumed.files[0].state, FileTransferState::Queued);
        assert_eq!(resumed.files[1].state, FileTransferState::Verified);
        assert_eq!(fixture.engine.queue_depth(), 1);

        // With the data present, finishing the resumed job completes it.
        fixture
            .aws
            .insert_object("bucket-a", "partial.bin", vec![9u8; 64], "STANDARD");
        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let settled = wait_terminal(&fixture.engine, &job.id).await;
        assert_eq!(settled.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_throttling_lowers_route_concurrency_temporarily() {
        let fixture = fixture(fast_config());
        let route = (ProviderKind::Aws, ProviderKind::Azure);
        let semaphore = fixture.engine.route_semaphore(route);
        let before = semaphore.available_permits();

        fixture.engine.throttle_route(route);
        assert_eq!(semaphore.available_permits(), before - 1);

        // The withdrawn slot returns after the cooldown.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(semaphore.available_permits(), before);
    }

    #[tokio::test]
    async fn test_deadline_expires_transfer() {
        let config = EngineConfig {
            file_deadline_seconds: 1,
            max_attempts: 1,
            ..fast_config()
        };
        let fixture = fixture(config);
        fixture
            .aws
            .insert_object("bucket-a", "slow.bin", vec![1u8; 64], "STANDARD");
        fixture.azure.set_put_latency(Duration::from_millis(1_400));

        fixture
            .engine
            .start(fixture.shutdown_tx.subscribe())
            .await
            .unwrap();
        let job_id = fixture
            .engine
            .create_job(
                request(ProviderKind::Aws, ProviderKind::Azure, &["slow.bin"]),
                "alice",
            )
            .await
            .unwrap();

        let job = wait_terminal(&fixture.engine, &job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.files[0].last_error.as_ref().unwrap().kind,
            TransferErrorKind::DeadlineExceeded
        );
    }
}
