use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::RouteState;
use crate::{
    auth::AuthenticatedPrincipal,
    data_model::Role,
    http_objects::{ApiError, JobDetail, JobSummary},
    migration::CreateJobRequest,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateMigrationResponse {
    pub job_id: String,
}

fn sees_all_jobs(role: Role) -> bool {
    // Viewers are read-only observers; users only see what they own.
    matches!(role, Role::Admin | Role::Viewer)
}

/// Create a migration job
#[utoipa::path(
    post,
    path = "/migrations",
    tag = "migrations",
    responses(
        (status = 200, description = "job accepted", body = CreateMigrationResponse),
        (status = 400, description = "invalid request"),
        (status = 403, description = "caller cannot create migrations"),
        (status = 429, description = "engine is at capacity"),
    ),
)]
pub async fn create_migration(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateMigrationResponse>, ApiError> {
    principal.require_write()?;
    let job_id = state.engine.create_job(request, &principal.id).await?;
    state.metrics.migrations_created.add(1, &[]);
    Ok(Json(CreateMigrationResponse { job_id }))
}

/// List migration jobs visible to the caller
#[utoipa::path(
    get,
    path = "/migrations",
    tag = "migrations",
    responses(
        (status = 200, description = "jobs, newest first", body = [JobSummary]),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn list_migrations(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let jobs = state
        .engine
        .list_jobs()
        .into_iter()
        .filter(|job| sees_all_jobs(principal.role) || job.owner == principal.id)
        .map(|job| JobSummary::from(&job))
        .collect();
    Ok(Json(jobs))
}

/// One job with per-file status
#[utoipa::path(
    get,
    path = "/migrations/{id}",
    tag = "migrations",
    params(("id" = String, Path, description = "job id")),
    responses(
        (status = 200, description = "job detail"),
        (status = 404, description = "no such job visible to the caller"),
    ),
)]
pub async fn get_migration(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Path(id): Path<String>,
) -> Result<Json<JobDetail>, ApiError> {
    let job = state
        .engine
        .get_job(&id)
        .filter(|job| sees_all_jobs(principal.role) || job.owner == principal.id)
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))?;
    Ok(Json(JobDetail::from(&job)))
}

/// Cancel a job
#[utoipa::path(
    delete,
    path = "/migrations/{id}",
    tag = "migrations",
    params(("id" = String, Path, description = "job id")),
    responses(
        (status = 200, description = "cancellation requested", body = JobSummary),
        (status = 403, description = "caller is neither owner nor admin"),
        (status = 409, description = "job already terminal"),
    ),
)]
pub async fn cancel_migration(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Path(id): Path<String>,
) -> Result<Json<JobSummary>, ApiError> {
    let job = state
        .engine
        .get_job(&id)
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))?;
    if job.owner != principal.id && !principal.role.can_admin() {
        return Err(ApiError::forbidden(
            "only the owner or an admin can cancel a job",
        ));
    }
    let cancelled = state.engine.cancel_job(&id)?;
    Ok(Json(JobSummary::from(&cancelled)))
}
