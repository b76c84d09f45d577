use axum::{extract::State, Json};

use super::RouteState;
use crate::{
    auth::AuthenticatedPrincipal,
    data_model::ProviderKind,
    http_objects::{
        AnalyticsOverview,
        ApiError,
        HealthComponents,
        HealthResponse,
        ProviderStatusRow,
    },
};

/// Liveness and component readiness
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "service is up")),
)]
pub async fn health(State(state): State<RouteState>) -> Json<HealthResponse> {
    let state_store = state.state_store.metadata().is_ok();
    let components = HealthComponents {
        state_store,
        event_bus: true,
        model_available: state.classifier.predictor().model_available(),
        providers_configured: state.providers.configured(),
    };
    Json(HealthResponse {
        status: if state_store { "ok" } else { "degraded" },
        components,
    })
}

/// Configuration and reachability per provider
#[utoipa::path(
    get,
    path = "/providers/status",
    tag = "system",
    responses(
        (status = 200, description = "provider status rows"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn provider_status(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<Vec<ProviderStatusRow>>, ApiError> {
    let rows = ProviderKind::ALL
        .into_iter()
        .map(|provider| {
            let settings = state.config.providers.settings(provider);
            ProviderStatusRow {
                provider,
                enabled: settings.enabled,
                configured: state.providers.is_configured(provider),
                default_container: settings.default_container.clone(),
            }
        })
        .collect();
    Ok(Json(rows))
}

/// Aggregate view: inventory size, job counts, recommendation value
#[utoipa::path(
    get,
    path = "/analytics/overview",
    tag = "system",
    responses(
        (status = 200, description = "aggregates"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn analytics_overview(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<AnalyticsOverview>, ApiError> {
    let (total_objects, total_bytes) = state.catalog.totals().await;
    let recommendations = state.catalog.recommendations().await;
    let potential_monthly_savings = recommendations
        .iter()
        .filter_map(|entry| entry.recommendation.as_ref())
        .map(|rec| rec.monthly_savings)
        .sum();
    let jobs = state.engine.list_jobs();
    Ok(Json(AnalyticsOverview {
        total_objects,
        total_bytes,
        total_jobs: jobs.len(),
        active_jobs: state.engine.active_job_count(),
        queued_jobs: state.engine.queue_depth(),
        recommendation_count: recommendations.len(),
        potential_monthly_savings,
        events_published: state.event_bus.stats().total_published,
    }))
}
