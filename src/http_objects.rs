use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::AuthError,
    data_model::{
        CatalogEntry,
        FileTransfer,
        MigrationJob,
        Principal,
        ProviderKind,
        Recommendation,
        Role,
        Tier,
    },
    migration::EngineError,
};

/// The only error kinds that cross the HTTP boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    InvalidArgument,
    Conflict,
    Overloaded,
    ProviderUnavailable,
    Internal,
}

impl ApiErrorKind {
    fn status(&self) -> StatusCode {
        match self {
            ApiErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorKind::NotFound => StatusCode::NOT_FOUND,
            ApiErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ApiErrorKind::Conflict => StatusCode::CONFLICT,
            ApiErrorKind::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorKind::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            ApiErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidArgument, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Conflict, message)
    }

    pub fn internal_error(error: anyhow::Error) -> Self {
        tracing::error!("internal error: {error:#}");
        Self::new(ApiErrorKind::Internal, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        (status, Json(self)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthenticated(msg) => ApiError::unauthenticated(msg),
            AuthError::Forbidden(msg) => ApiError::forbidden(msg),
            AuthError::Conflict(id) => ApiError::conflict(format!("principal {id} already exists")),
            AuthError::NotFound(id) => ApiError::not_found(format!("principal {id} not found")),
            AuthError::Internal(err) => ApiError::internal_error(err),
        }
    }
}

impl From<crate::providers::ProviderError> for ApiError {
    fn from(error: crate::providers::ProviderError) -> Self {
        use crate::providers::ProviderError;
        match &error {
            ProviderError::PermissionDenied(_) => ApiError::forbidden(error.to_string()),
            ProviderError::NotFound(_) => ApiError::not_found(error.to_string()),
            ProviderError::InvalidArgument(_) => ApiError::invalid_argument(error.to_string()),
            ProviderError::DestExistsConflict(_) => ApiError::conflict(error.to_string()),
            ProviderError::QuotaExceeded(_) => {
                ApiError::new(ApiErrorKind::Overloaded, error.to_string())
            }
            ProviderError::Transient(_) | ProviderError::Unavailable(_) => {
                ApiError::new(ApiErrorKind::ProviderUnavailable, error.to_string())
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::InvalidArgument(msg) => ApiError::invalid_argument(msg),
            EngineError::NotFound(msg) => ApiError::not_found(msg),
            EngineError::Conflict(msg) => ApiError::conflict(msg),
            EngineError::Overloaded(msg) => ApiError::new(ApiErrorKind::Overloaded, msg),
            EngineError::Forbidden(msg) => ApiError::forbidden(msg),
            EngineError::ProviderUnavailable(msg) => {
                ApiError::new(ApiErrorKind::ProviderUnavailable, msg)
            }
            EngineError::Internal(err) => ApiError::internal_error(err),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub principal_id: String,
    pub credential: String,
    /// Defaults to `user`; minting an admin requires an admin bearer.
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub principal_id: String,
    pub credential: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

impl From<crate::auth::BearerToken> for TokenResponse {
    fn from(token: crate::auth::BearerToken) -> Self {
        Self {
            access_token: token.access_token,
            token_type: token.token_type.to_string(),
            expires_in: token.expires_in,
        }
    }
}

/// Principal as exposed over the API: no credential material.
#[derive(Debug, Serialize, ToSchema)]
pub struct PrincipalInfo {
    pub id: String,
    pub role: Role,
    pub created_at: u64,
}

impl From<Principal> for PrincipalInfo {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            role: principal.role,
            created_at: principal.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CatalogObjectsQuery {
    pub provider: Option<ProviderKind>,
    pub tier: Option<Tier>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CatalogObjectsResponse {
    pub objects: Vec<CatalogEntry>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refresh_id: String,
    pub providers: Vec<ProviderKind>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationItem {
    pub provider: ProviderKind,
    pub container: String,
    pub key: String,
    pub size_bytes: u64,
    pub current_tier: Tier,
    pub recommendation: Recommendation,
}

impl From<CatalogEntry> for Option<RecommendationItem> {
    fn from(entry: CatalogEntry) -> Self {
        entry.recommendation.map(|recommendation| RecommendationItem {
            provider: entry.object.provider,
            container: entry.object.container,
            key: entry.object.key,
            size_bytes: entry.object.size_bytes,
            current_tier: entry.current_tier,
            recommendation,
        })
    }
}

/// Job as listed: file details elided, counts surfaced.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobSummary {
    pub job_id: String,
    pub source_provider: ProviderKind,
    pub dest_provider: ProviderKind,
    pub source_container: String,
    pub dest_container: String,
    pub status: String,
    pub priority: String,
    pub progress_percentage: u8,
    pub total_files: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub owner: String,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

impl From<&MigrationJob> for JobSummary {
    fn from(job: &MigrationJob) -> Self {
        let counts = job.counts();
        Self {
            job_id: job.id.clone(),
            source_provider: job.source_provider,
            dest_provider: job.dest_provider,
            source_container: job.source_container.clone(),
            dest_container: job.dest_container.clone(),
            status: job.status.to_string(),
            priority: job.priority.to_string(),
            progress_percentage: job.progress_percentage,
            total_files: job.files.len(),
            files_completed: counts.completed,
            files_failed: counts.failed,
            files_skipped: counts.skipped,
            owner: job.owner.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub files: Vec<FileTransfer>,
}

impl From<&MigrationJob> for JobDetail {
    fn from(job: &MigrationJob) -> Self {
        Self {
            summary: JobSummary::from(job),
            files: job.files.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProviderStatusRow {
    pub provider: ProviderKind,
    pub enabled: bool,
    pub configured: bool,
    pub default_container: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub state_store: bool,
    pub event_bus: bool,
    pub model_available: bool,
    pub providers_configured: Vec<ProviderKind>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: HealthComponents,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsOverview {
    pub total_objects: usize,
    pub total_bytes: u64,
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub recommendation_count: usize,
    pub potential_monthly_savings: f64,
    pub events_published: u64,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub provider: ProviderKind,
    pub container: Option<String>,
    pub key: String,
    /// Validity window for the signed URL, default 900 seconds.
    pub expires_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub url: String,
    pub expires_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApplyTierRequest {
    pub provider: ProviderKind,
    pub container: Option<String>,
    pub key: String,
    pub tier: Tier,
}

#[derive(Debug, Deserialize)]
pub struct RecentEventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// How many buffered events to replay before going live.
    pub replay: Option<usize>,
}
