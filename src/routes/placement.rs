use axum::{extract::State, Json};
use serde_json::json;

use super::RouteState;
use crate::{
    auth::AuthenticatedPrincipal,
    catalog::TierDistributionRow,
    data_model::EventType,
    http_objects::{ApiError, ApplyTierRequest, RecommendationItem},
};

/// Current placement recommendations
#[utoipa::path(
    get,
    path = "/placement/recommendations",
    tag = "placement",
    responses(
        (status = 200, description = "objects with a cheaper placement"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn recommendations(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<Vec<RecommendationItem>>, ApiError> {
    let items = state
        .catalog
        .recommendations()
        .await
        .into_iter()
        .filter_map(Option::<RecommendationItem>::from)
        .collect();
    Ok(Json(items))
}

/// Objects, bytes and monthly cost per (provider, tier)
#[utoipa::path(
    get,
    path = "/placement/tier-distribution",
    tag = "placement",
    responses(
        (status = 200, description = "aggregate distribution"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn tier_distribution(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<Vec<TierDistributionRow>>, ApiError> {
    let rows = state
        .catalog
        .tier_distribution(state.classifier.cost_model())
        .await;
    Ok(Json(rows))
}

/// Apply a tier change in place, where the provider supports it
#[utoipa::path(
    post,
    path = "/placement/apply",
    tag = "placement",
    responses(
        (status = 200, description = "storage class changed"),
        (status = 403, description = "caller cannot perform writes"),
        (status = 502, description = "provider does not support in-place changes"),
    ),
)]
pub async fn apply_tier(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Json(request): Json<ApplyTierRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    principal.require_write()?;
    let adapter = state.providers.get(request.provider)?;
    let container = request
        .container
        .clone()
        .or_else(|| {
            state
                .config
                .providers
                .settings(request.provider)
                .default_container
                .clone()
        })
        .ok_or_else(|| ApiError::invalid_argument("no container given and no default configured"))?;

    let class = request.tier.storage_class(request.provider);
    adapter
        .set_storage_class(&container, &request.key, class)
        .await?;
    state
        .catalog
        .set_entry_tier(request.provider, &container, &request.key, request.tier)
        .await;
    state.event_bus.publish(
        EventType::CloudOperation,
        json!({
            "operation": "set_storage_class",
            "provider": request.provider,
            "container": container,
            "key": request.key,
            "storage_class": class,
            "principal": principal.id,
        }),
    );
    Ok(Json(json!({
        "provider": request.provider,
        "container": container,
        "key": request.key,
        "tier": request.tier,
    })))
}
