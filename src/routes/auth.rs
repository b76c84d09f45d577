use axum::{extract::State, http::HeaderMap, Json};
use opentelemetry::KeyValue;

use super::RouteState;
use crate::{
    auth::AuthenticatedPrincipal,
    data_model::Role,
    http_objects::{ApiError, LoginRequest, PrincipalInfo, RegisterRequest, TokenResponse},
    metrics::Increment,
};

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Create a principal
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "principal created", body = PrincipalInfo),
        (status = 409, description = "principal id already taken"),
    ),
)]
pub async fn register(
    State(state): State<RouteState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<PrincipalInfo>, ApiError> {
    let labels = [KeyValue::new("endpoint", "auth.register")];
    let _inc = Increment::inc(&state.metrics.requests, &labels);
    let role = request.role.unwrap_or(Role::User);
    if role == Role::Admin && !state.auth.no_principals_yet()? {
        // Only the very first principal bootstraps itself into admin;
        // afterwards minting admins is an admin operation.
        let token = bearer_from_headers(&headers)
            .ok_or_else(|| ApiError::unauthenticated("creating an admin requires a bearer"))?;
        state.auth.validate(&token)?.require_admin()?;
    }

    let auth = state.auth.clone();
    let principal = tokio::task::spawn_blocking(move || {
        auth.register(&request.principal_id, &request.credential, role)
    })
    .await
    .map_err(|e| ApiError::internal_error(e.into()))??;
    Ok(Json(principal.into()))
}

/// Issue a bearer token
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "bearer issued", body = TokenResponse),
        (status = 401, description = "unknown principal or wrong credential"),
    ),
)]
pub async fn login(
    State(state): State<RouteState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let labels = [KeyValue::new("endpoint", "auth.login")];
    let _inc = Increment::inc(&state.metrics.requests, &labels);
    let auth = state.auth.clone();
    let token = tokio::task::spawn_blocking(move || {
        auth.login(&request.principal_id, &request.credential)
    })
    .await
    .map_err(|e| ApiError::internal_error(e.into()))??;
    Ok(Json(token.into()))
}

/// The principal behind the presented bearer
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "authenticated principal", body = PrincipalInfo),
        (status = 401, description = "missing or invalid bearer"),
    ),
)]
pub async fn me(
    principal: AuthenticatedPrincipal,
    State(state): State<RouteState>,
) -> Result<Json<PrincipalInfo>, ApiError> {
    let stored = state.auth.get_principal(&principal.id)?;
    Ok(Json(stored.into()))
}
