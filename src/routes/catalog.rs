use std::time::Duration;

use axum::{
    extract::{Query, State},
    Json,
};
use nanoid::nanoid;

use super::RouteState;
use crate::{
    auth::AuthenticatedPrincipal,
    catalog::CatalogFilter,
    http_objects::{
        ApiError,
        ApiErrorKind,
        CatalogObjectsQuery,
        CatalogObjectsResponse,
        PresignQuery,
        PresignResponse,
        RefreshResponse,
    },
};

/// List catalog entries
#[utoipa::path(
    get,
    path = "/catalog/objects",
    tag = "catalog",
    params(
        ("provider" = Option<String>, Query, description = "AWS | AZURE | GCP"),
        ("tier" = Option<String>, Query, description = "HOT | WARM | COLD | ARCHIVE"),
        ("limit" = Option<usize>, Query, description = "page size, default 100"),
        ("cursor" = Option<String>, Query, description = "cursor from the previous page"),
    ),
    responses(
        (status = 200, description = "page of catalog entries"),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn list_objects(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Query(query): Query<CatalogObjectsQuery>,
) -> Result<Json<CatalogObjectsResponse>, ApiError> {
    let page = state
        .catalog
        .list(&CatalogFilter {
            provider: query.provider,
            tier: query.tier,
            limit: query.limit,
            cursor: query.cursor,
        })
        .await;
    Ok(Json(CatalogObjectsResponse {
        objects: page.entries,
        cursor: page.cursor,
    }))
}

/// Trigger an asynchronous catalog refresh
#[utoipa::path(
    post,
    path = "/catalog/refresh",
    tag = "catalog",
    responses(
        (status = 200, description = "refresh scheduled"),
        (status = 403, description = "caller is not an admin"),
    ),
)]
pub async fn trigger_refresh(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    principal.require_admin()?;
    let refresh_id = format!("refresh-{}", nanoid!());
    state.refresh_tx.try_send(refresh_id.clone()).map_err(|_| {
        ApiError::new(
            ApiErrorKind::Overloaded,
            "a catalog refresh is already queued",
        )
    })?;
    Ok(Json(RefreshResponse {
        refresh_id,
        providers: state.config.providers.enabled(),
    }))
}

/// Short-lived download URL for one object
#[utoipa::path(
    get,
    path = "/catalog/presign",
    tag = "catalog",
    params(
        ("provider" = String, Query, description = "AWS | AZURE | GCP"),
        ("container" = Option<String>, Query, description = "defaults to the provider's configured container"),
        ("key" = String, Query, description = "object key"),
        ("expires_seconds" = Option<u64>, Query, description = "validity window, default 900"),
    ),
    responses(
        (status = 200, description = "signed URL"),
        (status = 404, description = "object unknown"),
    ),
)]
pub async fn presign_object(
    _principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
    Query(query): Query<PresignQuery>,
) -> Result<Json<PresignResponse>, ApiError> {
    let adapter = state.providers.get(query.provider)?;
    let container = query
        .container
        .or_else(|| {
            state
                .config
                .providers
                .settings(query.provider)
                .default_container
                .clone()
        })
        .ok_or_else(|| ApiError::invalid_argument("no container given and no default configured"))?;
    let expires_seconds = query.expires_seconds.unwrap_or(900);
    let url = adapter
        .presign_get(&container, &query.key, Duration::from_secs(expires_seconds))
        .await?;
    Ok(Json(PresignResponse {
        url,
        expires_seconds,
    }))
}
