use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    Json,
    Router,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::{
    auth::{AuthService, AuthenticatedPrincipal},
    catalog::ObjectCatalog,
    config::ServerConfig,
    events::EventBus,
    http_objects::ApiError,
    metrics,
    migration::MigrationEngine,
    placement::PlacementClassifier,
    providers::ProviderRegistry,
    state_store::StateStore,
};

mod auth;
mod catalog;
mod events;
mod migrations;
mod placement;
mod system;

#[derive(Clone)]
pub struct RouteState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthService>,
    pub catalog: Arc<ObjectCatalog>,
    pub classifier: Arc<PlacementClassifier>,
    pub engine: Arc<MigrationEngine>,
    pub event_bus: Arc<EventBus>,
    pub providers: Arc<ProviderRegistry>,
    pub state_store: Arc<StateStore>,
    pub refresh_tx: mpsc::Sender<String>,
    pub metrics: Arc<metrics::api::Metrics>,
}

/// Bearer validation as an extractor: any handler that takes an
/// `AuthenticatedPrincipal` is gated on a valid token.
impl FromRequestParts<RouteState> for AuthenticatedPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RouteState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::unauthenticated("missing bearer token"))?;
        state
            .auth
            .validate(bearer.token())
            .map_err(ApiError::from)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register,
        auth::login,
        auth::me,
        catalog::list_objects,
        catalog::trigger_refresh,
        catalog::presign_object,
        placement::recommendations,
        placement::tier_distribution,
        placement::apply_tier,
        migrations::create_migration,
        migrations::list_migrations,
        migrations::get_migration,
        migrations::cancel_migration,
        events::recent_events,
        events::event_stats,
        system::health,
        system::provider_status,
        system::analytics_overview,
    ),
    components(schemas(
        crate::http_objects::RegisterRequest,
        crate::http_objects::LoginRequest,
        crate::http_objects::TokenResponse,
        crate::http_objects::PrincipalInfo,
        crate::http_objects::JobSummary,
        crate::http_objects::ApiErrorKind,
    )),
    tags(
        (name = "auth", description = "Credential issuance and validation"),
        (name = "catalog", description = "Object inventory"),
        (name = "placement", description = "Tiering recommendations"),
        (name = "migrations", description = "Cross-provider migration jobs"),
        (name = "events", description = "Operational event streaming"),
        (name = "system", description = "Health and aggregates"),
    )
)]
struct ApiDoc;

async fn openapi_document() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_routes(state: RouteState) -> Router {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/catalog/objects", get(catalog::list_objects))
        .route("/catalog/refresh", post(catalog::trigger_refresh))
        .route("/catalog/presign", get(catalog::presign_object))
        .route("/placement/recommendations", get(placement::recommendations))
        .route("/placement/apply", post(placement::apply_tier))
        .route(
            "/placement/tier-distribution",
            get(placement::tier_distribution),
        )
        .route(
            "/migrations",
            post(migrations::create_migration).get(migrations::list_migrations),
        )
        .route(
            "/migrations/{id}",
            get(migrations::get_migration).delete(migrations::cancel_migration),
        )
        .route("/events/recent", get(events::recent_events))
        .route("/events/stream", get(events::stream_events))
        .route("/events/stats", get(events::event_stats))
        .route("/providers/status", get(system::provider_status))
        .route("/analytics/overview", get(system::analytics_overview))
        .route("/health", get(system::health))
        .route("/openapi.json", get(openapi_document))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing;
