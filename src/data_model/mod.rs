use std::{
    fmt::{self, Display},
    str::FromStr,
};

use derive_builder::Builder;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::AsRefStr;

use crate::utils::get_epoch_time_in_ms;

/// Cloud providers with a configured adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, utoipa::ToSchema)]
pub enum ProviderKind {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "AZURE")]
    Azure,
    #[serde(rename = "GCP")]
    Gcp,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Aws, ProviderKind::Azure, ProviderKind::Gcp];

    /// Stable index used for feature one-hot encoding and partition ordering.
    pub fn index(&self) -> usize {
        match self {
            ProviderKind::Aws => 0,
            ProviderKind::Azure => 1,
            ProviderKind::Gcp => 2,
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Aws => write!(f, "AWS"),
            ProviderKind::Azure => write!(f, "AZURE"),
            ProviderKind::Gcp => write!(f, "GCP"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWS" => Ok(ProviderKind::Aws),
            "AZURE" => Ok(ProviderKind::Azure),
            "GCP" => Ok(ProviderKind::Gcp),
            other => Err(anyhow::anyhow!("unknown provider: {other}")),
        }
    }
}

/// Storage temperature tier, ordered by retrieval latency and inversely by
/// unit storage cost.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr,
)]
pub enum Tier {
    #[serde(rename = "HOT")]
    #[strum(serialize = "HOT")]
    Hot,
    #[serde(rename = "WARM")]
    #[strum(serialize = "WARM")]
    Warm,
    #[serde(rename = "COLD")]
    #[strum(serialize = "COLD")]
    Cold,
    #[serde(rename = "ARCHIVE")]
    #[strum(serialize = "ARCHIVE")]
    Archive,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Archive];

    /// Maps a provider-reported storage class onto a tier. Unrecognized
    /// classes land on HOT, the default class of every provider.
    pub fn from_storage_class(provider: ProviderKind, class: &str) -> Tier {
        let class = class.to_ascii_uppercase();
        match provider {
            ProviderKind::Aws => match class.as_str() {
                "STANDARD_IA" | "ONEZONE_IA" | "INTELLIGENT_TIERING" => Tier::Warm,
                "GLACIER" | "GLACIER_IR" => Tier::Cold,
                "DEEP_ARCHIVE" => Tier::Archive,
                _ => Tier::Hot,
            },
            ProviderKind::Azure => match class.as_str() {
                "COOL" => Tier::Warm,
                "COLD" => Tier::Cold,
                "ARCHIVE" => Tier::Archive,
                _ => Tier::Hot,
            },
            ProviderKind::Gcp => match class.as_str() {
                "NEARLINE" => Tier::Warm,
                "COLDLINE" => Tier::Cold,
                "ARCHIVE" => Tier::Archive,
                _ => Tier::Hot,
            },
        }
    }
}

impl Tier {
    /// The provider storage class that realizes this tier, the inverse of
    /// `from_storage_class`.
    pub fn storage_class(&self, provider: ProviderKind) -> &'static str {
        match provider {
            ProviderKind::Aws => match self {
                Tier::Hot => "STANDARD",
                Tier::Warm => "STANDARD_IA",
                Tier::Cold => "GLACIER",
                Tier::Archive => "DEEP_ARCHIVE",
            },
            ProviderKind::Azure => match self {
                Tier::Hot => "HOT",
                Tier::Warm => "COOL",
                Tier::Cold => "COLD",
                Tier::Archive => "ARCHIVE",
            },
            ProviderKind::Gcp => match self {
                Tier::Hot => "STANDARD",
                Tier::Warm => "NEARLINE",
                Tier::Cold => "COLDLINE",
                Tier::Archive => "ARCHIVE",
            },
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Ok(Tier::Hot),
            "WARM" => Ok(Tier::Warm),
            "COLD" => Ok(Tier::Cold),
            "ARCHIVE" => Ok(Tier::Archive),
            other => Err(anyhow::anyhow!("unknown tier: {other}")),
        }
    }
}

/// Identity of a stored object. `(provider, container, key)` is the primary
/// identity: two refs with the same triple name the same underlying object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectRef {
    pub provider: ProviderKind,
    pub container: String,
    pub key: String,
    pub size_bytes: u64,
    /// Provider-reported modification time, epoch milliseconds.
    pub last_modified: u64,
    /// Free-form provider storage class, e.g. "STANDARD" or "COOL".
    pub storage_class: String,
    pub etag: Option<String>,
}

impl ObjectRef {
    pub fn identity(&self) -> (ProviderKind, &str, &str) {
        (self.provider, &self.container, &self.key)
    }

    pub fn age_days(&self, now_ms: u64) -> u32 {
        (now_ms.saturating_sub(self.last_modified) / (24 * 3600 * 1000)) as u32
    }
}

/// Per-object access statistics over a rolling window. Zeroed when the
/// provider reports nothing; a true access log is not required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccessStats {
    pub access_count_window: u64,
    pub last_access_at: Option<u64>,
    pub age_days: u32,
}

impl AccessStats {
    pub fn days_since_last_access(&self, now_ms: u64) -> u32 {
        match self.last_access_at {
            Some(at) => (now_ms.saturating_sub(at) / (24 * 3600 * 1000)) as u32,
            // Never accessed: fall back to object age.
            None => self.age_days,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

/// Machine tag naming the classifier rule that produced a recommendation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTag {
    #[strum(serialize = "temperature_rule")]
    TemperatureRule,
    #[strum(serialize = "predictor_override")]
    PredictorOverride,
    #[strum(serialize = "provider_constraint")]
    ProviderConstraint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rationale {
    pub tag: RationaleTag,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub recommended_tier: Tier,
    pub monthly_savings: f64,
    pub priority: RecommendationPriority,
    pub rationale: Rationale,
    pub confidence: f64,
}

/// An object as known to the catalog: identity, access stats, current tier
/// and the classifier's verdict, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub object: ObjectRef,
    pub access: AccessStats,
    pub current_tier: Tier,
    pub recommendation: Option<Recommendation>,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[strum(serialize = "PENDING")]
    Pending,
    #[strum(serialize = "RUNNING")]
    Running,
    #[strum(serialize = "COMPLETED")]
    Completed,
    #[strum(serialize = "PARTIALLY_FAILED")]
    PartiallyFailed,
    #[strum(serialize = "FAILED")]
    Failed,
    #[strum(serialize = "CANCELLED")]
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileTransferState {
    #[strum(serialize = "QUEUED")]
    Queued,
    #[strum(serialize = "IN_FLIGHT")]
    InFlight,
    #[strum(serialize = "COPIED")]
    Copied,
    #[strum(serialize = "VERIFIED")]
    Verified,
    #[strum(serialize = "FAILED")]
    Failed,
    #[strum(serialize = "SKIPPED")]
    Skipped,
}

/// Structured reason a file transfer failed; mirrors the provider error
/// taxonomy so clients can distinguish retryable from permanent outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferErrorKind {
    PermissionDenied,
    NotFound,
    QuotaExceeded,
    Transient,
    InvalidArgument,
    Unavailable,
    Conflict,
    DeadlineExceeded,
    VerificationMismatch,
    /// The attempt was aborted by job cancellation while in flight.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
}

/// Per-file subtask of a migration job. A transfer never outlives its job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransfer {
    pub source_key: String,
    pub dest_key: String,
    pub state: FileTransferState,
    pub bytes_transferred: u64,
    pub attempts: u32,
    pub last_error: Option<TransferError>,
}

impl FileTransfer {
    pub fn new(source_key: impl Into<String>) -> Self {
        let source_key = source_key.into();
        Self {
            dest_key: source_key.clone(),
            source_key,
            state: FileTransferState::Queued,
            bytes_transferred: 0,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Counts of file transfers by state; always sums to the job's total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl FileCounts {
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    pub fn total(&self) -> usize {
        self.settled() + self.queued + self.in_flight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct MigrationJob {
    #[builder(default = "format!(\"job-{}\", nanoid!())")]
    pub id: String,
    pub source_provider: ProviderKind,
    pub dest_provider: ProviderKind,
    pub source_container: String,
    pub dest_container: String,
    pub files: Vec<FileTransfer>,
    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default = "JobStatus::Pending")]
    pub status: JobStatus,
    #[builder(default)]
    pub progress_percentage: u8,
    #[builder(default = "get_epoch_time_in_ms()")]
    pub created_at: u64,
    #[builder(default)]
    pub started_at: Option<u64>,
    #[builder(default)]
    pub completed_at: Option<u64>,
    pub owner: String,
    pub dedup_key: String,
}

impl MigrationJob {
    /// Deterministic resubmission key over the request identity. Two
    /// requests with the same owner, route and file list map to the same
    /// key, which is how duplicate submissions inside the dedup window are
    /// collapsed onto the original job.
    pub fn dedup_key_from(
        owner: &str,
        source_provider: ProviderKind,
        source_container: &str,
        dest_provider: ProviderKind,
        dest_container: &str,
        file_list: &[String],
    ) -> String {
        const DEDUP_NAMESPACE: uuid::Uuid = uuid::uuid!("9f2fcd9a-2f34-46c1-9c2a-5b77a66f2d11");
        let material = format!(
            "{owner}|{source_provider}|{source_container}|{dest_provider}|{dest_container}|{}",
            file_list.join("\n"),
        );
        uuid::Uuid::new_v5(&DEDUP_NAMESPACE, material.as_bytes()).to_string()
    }

    pub fn counts(&self) -> FileCounts {
        let mut counts = FileCounts::default();
        for file in &self.files {
            match file.state {
                FileTransferState::Queued => counts.queued += 1,
                FileTransferState::InFlight => counts.in_flight += 1,
                FileTransferState::Verified => counts.completed += 1,
                // COPIED is a transient stop on the way to VERIFIED; a copy
                // that never verifies is still in flight from the job's
                // point of view.
                FileTransferState::Copied => counts.in_flight += 1,
                FileTransferState::Failed => counts.failed += 1,
                FileTransferState::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Recomputes the progress percentage from settled file counts. The
    /// result only grows until the job reaches a terminal state.
    pub fn recompute_progress(&mut self) {
        let counts = self.counts();
        let total = self.files.len().max(1);
        let pct = (100 * counts.settled() / total) as u8;
        if pct > self.progress_percentage {
            self.progress_percentage = pct;
        }
    }

    /// Terminal status implied by settled per-file outcomes. Only meaningful
    /// once no file is QUEUED or IN_FLIGHT.
    pub fn aggregate_outcome(&self) -> JobStatus {
        let counts = self.counts();
        if counts.failed == 0 && counts.skipped == 0 {
            JobStatus::Completed
        } else if counts.completed > 0 {
            JobStatus::PartiallyFailed
        } else {
            JobStatus::Failed
        }
    }

    pub fn route(&self) -> (ProviderKind, ProviderKind) {
        (self.source_provider, self.dest_provider)
    }
}

/// Event type namespace carried on the push channel and the recent-events
/// endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr)]
pub enum EventType {
    #[serde(rename = "migration.started")]
    #[strum(serialize = "migration.started")]
    MigrationStarted,
    #[serde(rename = "migration.progress")]
    #[strum(serialize = "migration.progress")]
    MigrationProgress,
    #[serde(rename = "migration.file_completed")]
    #[strum(serialize = "migration.file_completed")]
    MigrationFileCompleted,
    #[serde(rename = "migration.file_failed")]
    #[strum(serialize = "migration.file_failed")]
    MigrationFileFailed,
    #[serde(rename = "migration.completed")]
    #[strum(serialize = "migration.completed")]
    MigrationCompleted,
    #[serde(rename = "migration.failed")]
    #[strum(serialize = "migration.failed")]
    MigrationFailed,
    #[serde(rename = "migration.cancelled")]
    #[strum(serialize = "migration.cancelled")]
    MigrationCancelled,
    #[serde(rename = "catalog.refresh_started")]
    #[strum(serialize = "catalog.refresh_started")]
    CatalogRefreshStarted,
    #[serde(rename = "catalog.refresh_completed")]
    #[strum(serialize = "catalog.refresh_completed")]
    CatalogRefreshCompleted,
    #[serde(rename = "placement.recommendation")]
    #[strum(serialize = "placement.recommendation")]
    PlacementRecommendation,
    #[serde(rename = "cloud.operation")]
    #[strum(serialize = "cloud.operation")]
    CloudOperation,
}

impl Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Append-only operational event. Never mutated after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: u64,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            id: format!("evt-{}", nanoid!()),
            event_type,
            timestamp: get_epoch_time_in_ms(),
            payload,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.payload.get("job_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[strum(serialize = "admin")]
    Admin,
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "viewer")]
    Viewer,
}

impl Role {
    /// Viewers read; users additionally create migrations; admins
    /// additionally refresh the catalog and manage jobs and principals.
    pub fn can_write(&self) -> bool {
        matches!(self, Role::Admin | Role::User)
    }

    pub fn can_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "viewer" => Ok(Role::Viewer),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

/// An authenticatable identity. The credential is stored only as an argon2
/// PHC string; API responses use a DTO that omits it entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub credential_hash: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineMetadata {
    pub db_version: u64,
}
