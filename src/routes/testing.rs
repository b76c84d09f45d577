use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use super::{create_routes, RouteState};
use crate::{
    auth::AuthService,
    catalog::ObjectCatalog,
    config::ServerConfig,
    data_model::{ProviderKind, Role},
    events::EventBus,
    metrics,
    migration::{EngineConfig, MigrationEngine},
    placement::{cost::CostModel, predictor::AccessPredictor, ClassifierConfig, PlacementClassifier},
    providers::{mock::MockAdapter, ProviderAdapter, ProviderRegistry},
    state_store::StateStore,
};

pub(crate) struct TestApp {
    pub router: Router,
    pub auth: Arc<AuthService>,
    pub aws: MockAdapter,
    _refresh_rx: mpsc::Receiver<String>,
    _dir: tempfile::TempDir,
}

pub(crate) fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let bus = Arc::new(EventBus::new(1_000, 64));
    let catalog = Arc::new(ObjectCatalog::new());
    let cost_model = Arc::new(CostModel::default());
    let predictor = Arc::new(AccessPredictor::load(None));
    let classifier = Arc::new(PlacementClassifier::new(
        ClassifierConfig::default(),
        cost_model,
        predictor,
    ));
    let auth = Arc::new(AuthService::new(
        store.clone(),
        b"route-test-signing-key",
        Duration::from_secs(3600),
    ));

    let aws = MockAdapter::new(ProviderKind::Aws);
    let azure = MockAdapter::new(ProviderKind::Azure);
    let mut registry = ProviderRegistry::new();
    registry.register(ProviderAdapter::Mock(aws.clone()));
    registry.register(ProviderAdapter::Mock(azure));
    let registry = Arc::new(registry);

    let mut config = ServerConfig {
        dev: true,
        ..ServerConfig::default()
    };
    config.providers.aws.enabled = true;
    config.providers.aws.default_container = Some("bucket-a".to_string());
    config.providers.azure.enabled = true;
    config.providers.azure.default_container = Some("bucket-b".to_string());

    let engine = MigrationEngine::new(
        EngineConfig::default(),
        registry.clone(),
        HashMap::from([
            (ProviderKind::Aws, "bucket-a".to_string()),
            (ProviderKind::Azure, "bucket-b".to_string()),
        ]),
        store.clone(),
        bus.clone(),
        catalog.clone(),
    );

    let (refresh_tx, refresh_rx) = mpsc::channel(4);
    let state = RouteState {
        config: Arc::new(config),
        auth: auth.clone(),
        catalog,
        classifier,
        engine,
        event_bus: bus,
        providers: registry,
        state_store: store,
        refresh_tx,
        metrics: Arc::new(metrics::api::Metrics::new()),
    };

    TestApp {
        router: create_routes(state),
        auth,
        aws,
        _refresh_rx: refresh_rx,
        _dir: dir,
    }
}

impl TestApp {
    /// Registers a principal directly and returns a bearer for it.
    pub fn issue_token(&self, id: &str, role: Role) -> String {
        self.auth.register(id, "credential", role).unwrap();
        self.auth.login(id, "credential").unwrap().access_token
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

pub(crate) fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub(crate) fn post_json(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub(crate) fn delete(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri(path);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_gate_on_migrations() {
        let app = test_app();

        // No token: UNAUTHENTICATED.
        let (status, body) = app.send(get("/migrations", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "UNAUTHENTICATED");

        // Viewer reads fine.
        let viewer = app.issue_token("victor", Role::Viewer);
        let (status, _) = app.send(get("/migrations", Some(&viewer))).await;
        assert_eq!(status, StatusCode::OK);

        // Viewer cannot create.
        let request = json!({
            "source_provider": "AWS",
            "dest_provider": "AZURE",
            "file_list": ["report.pdf"],
        });
        let (status, body) = app
            .send(post_json("/migrations", Some(&viewer), request))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_expired_and_garbage_tokens_rejected() {
        let app = test_app();
        let (status, _) = app.send(get("/migrations", Some("not-a-token"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_login_me_flow() {
        let app = test_app();

        let (status, body) = app
            .send(post_json(
                "/auth/register",
                None,
                json!({"principal_id": "alice", "credential": "s3cret"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "alice");
        assert!(body.get("credential_hash").is_none());

        let (status, body) = app
            .send(post_json(
                "/auth/login",
                None,
                json!({"principal_id": "alice", "credential": "s3cret"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["access_token"].as_str().unwrap().to_string();

        let (status, body) = app.send(get("/auth/me", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "alice");
        assert_eq!(body["role"], "user");

        // Same id again: CONFLICT.
        let (status, body) = app
            .send(post_json(
                "/auth/register",
                None,
                json!({"principal_id": "alice", "credential": "other"}),
            ))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_first_principal_may_bootstrap_admin() {
        let app = test_app();
        let (status, body) = app
            .send(post_json(
                "/auth/register",
                None,
                json!({"principal_id": "root", "credential": "s3cret", "role": "admin"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");

        // Once principals exist, minting admins needs an admin bearer.
        let (status, _) = app
            .send(post_json(
                "/auth/register",
                None,
                json!({"principal_id": "mallory", "credential": "x", "role": "admin"}),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_catalog_refresh_requires_admin() {
        let app = test_app();
        let viewer = app.issue_token("victor", Role::Viewer);
        let (status, _) = app
            .send(post_json("/catalog/refresh", Some(&viewer), json!({})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.issue_token("root", Role::Admin);
        let (status, body) = app
            .send(post_json("/catalog/refresh", Some(&admin), json!({})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["refresh_id"].as_str().unwrap().starts_with("refresh-"));
    }

    #[tokio::test]
    async fn test_create_and_inspect_migration_over_http() {
        let app = test_app();
        app.aws
            .insert_object("bucket-a", "report.pdf", vec![1u8; 64], "STANDARD");
        let user = app.issue_token("alice", Role::User);

        let (status, body) = app
            .send(post_json(
                "/migrations",
                Some(&user),
                json!({
                    "source_provider": "AWS",
                    "dest_provider": "AZURE",
                    "file_list": ["report.pdf"],
                    "priority": "high",
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let (status, body) = app
            .send(get(&format!("/migrations/{job_id}"), Some(&user)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["files"].as_array().unwrap().len(), 1);

        // Another user cannot see it; a viewer can.
        let bob = app.issue_token("bob", Role::User);
        let (status, _) = app
            .send(get(&format!("/migrations/{job_id}"), Some(&bob)))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let viewer = app.issue_token("victor", Role::Viewer);
        let (status, _) = app
            .send(get(&format!("/migrations/{job_id}"), Some(&viewer)))
            .await;
        assert_eq!(status, StatusCode::OK);

        // Owner cancels; a second cancel conflicts.
        let (status, body) = app
            .send(delete(&format!("/migrations/{job_id}"), Some(&user)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");
        let (status, body) = app
            .send(delete(&format!("/migrations/{job_id}"), Some(&user)))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_empty_file_list_is_invalid_argument() {
        let app = test_app();
        let user = app.issue_token("alice", Role::User);
        let (status, body) = app
            .send(post_json(
                "/migrations",
                Some(&user),
                json!({
                    "source_provider": "AWS",
                    "dest_provider": "AZURE",
                    "file_list": [],
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_health_is_open_and_reports_components() {
        let app = test_app();
        let (status, body) = app.send(get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["components"]["model_available"], false);
        assert_eq!(body["components"]["state_store"], true);
    }

    #[tokio::test]
    async fn test_presign_and_apply_tier() {
        let app = test_app();
        app.aws
            .insert_object("bucket-a", "cold-report.parquet", vec![3u8; 64], "STANDARD");

        let viewer = app.issue_token("victor", Role::Viewer);
        let (status, body) = app
            .send(get(
                "/catalog/presign?provider=AWS&key=cold-report.parquet",
                Some(&viewer),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap().starts_with("mock://"));

        // Viewers cannot change tiers; users can.
        let request = json!({
            "provider": "AWS",
            "key": "cold-report.parquet",
            "tier": "COLD",
        });
        let (status, _) = app
            .send(post_json("/placement/apply", Some(&viewer), request.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let user = app.issue_token("alice", Role::User);
        let (status, _) = app
            .send(post_json("/placement/apply", Some(&user), request))
            .await;
        assert_eq!(status, StatusCode::OK);
        let updated = app.aws.stat("bucket-a", "cold-report.parquet").unwrap();
        assert_eq!(updated.storage_class, "GLACIER");
    }

    #[tokio::test]
    async fn test_events_endpoints_round_trip() {
        let app = test_app();
        let viewer = app.issue_token("victor", Role::Viewer);

        let (status, body) = app.send(get("/events/recent", Some(&viewer))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 0);

        let (status, body) = app.send(get("/events/stats", Some(&viewer))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_published"], 0);
    }
}
