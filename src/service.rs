use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum_server::Handle;
use tokio::{
    signal,
    sync::{mpsc, watch},
};
use tracing::{error, info, warn};

use crate::{
    auth::AuthService,
    catalog::{NoAccessStats, ObjectCatalog},
    config::ServerConfig,
    data_model::EventType,
    events::EventBus,
    metrics,
    migration::MigrationEngine,
    placement::{cost::CostModel, predictor::AccessPredictor, PlacementClassifier},
    providers::{cloud::CloudAdapter, ProviderAdapter, ProviderRegistry},
    routes::{create_routes, RouteState},
    state_store::StateStore,
};

/// Owns every component and threads them together by construction; nothing
/// in the process is a global.
pub struct Service {
    pub config: Arc<ServerConfig>,
    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
    state_store: Arc<StateStore>,
    event_bus: Arc<EventBus>,
    providers: Arc<ProviderRegistry>,
    predictor: Arc<AccessPredictor>,
    classifier: Arc<PlacementClassifier>,
    catalog: Arc<ObjectCatalog>,
    engine: Arc<MigrationEngine>,
    auth: Arc<AuthService>,
    refresh_tx: mpsc::Sender<String>,
    refresh_rx: Option<mpsc::Receiver<String>>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        metrics::init_provider(config.metrics.enabled, config.metrics.endpoint.as_ref())
            .context("error initializing metrics provider")?;

        let state_store = Arc::new(
            StateStore::open(Path::new(&config.state_store_path))
                .context("error opening state store")?,
        );
        let event_bus = Arc::new(EventBus::new(
            config.events.ring_capacity,
            config.events.subscriber_queue_capacity,
        ));

        let mut registry = ProviderRegistry::new();
        for kind in config.providers.enabled() {
            let settings = config.providers.settings(kind).clone();
            let adapter = CloudAdapter::new(kind, settings);
            let adapter = match kind {
                crate::data_model::ProviderKind::Aws => ProviderAdapter::Aws(adapter),
                crate::data_model::ProviderKind::Azure => ProviderAdapter::Azure(adapter),
                crate::data_model::ProviderKind::Gcp => ProviderAdapter::Gcp(adapter),
            };
            registry.register(adapter);
            info!(provider = %kind, "registered provider adapter");
        }
        let providers = Arc::new(registry);

        let predictor = Arc::new(AccessPredictor::load(
            config.predictor.model_path.as_ref().map(PathBuf::from),
        ));
        let cost_model = Arc::new(config.cost.clone());
        let classifier = Arc::new(PlacementClassifier::new(
            config.classifier.clone(),
            cost_model,
            predictor.clone(),
        ));
        let catalog = Arc::new(ObjectCatalog::new());

        let engine = MigrationEngine::new(
            config.engine.clone(),
            providers.clone(),
            config.providers.default_containers(),
            state_store.clone(),
            event_bus.clone(),
            catalog.clone(),
        );

        let signing_key = config.signing_key()?;
        if config.auth.signing_key_ref.is_none() {
            warn!("no auth.signing_key_ref configured, using the fixed dev signing key");
        }
        let auth = Arc::new(AuthService::new(
            state_store.clone(),
            &signing_key,
            Duration::from_secs(config.auth.token_ttl_seconds),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (refresh_tx, refresh_rx) = mpsc::channel(8);

        Ok(Self {
            config: Arc::new(config),
            shutdown_tx,
            shutdown_rx,
            state_store,
            event_bus,
            providers,
            predictor,
            classifier,
            catalog,
            engine,
            auth,
            refresh_tx,
            refresh_rx: Some(refresh_rx),
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        self.engine.start(self.shutdown_rx.clone()).await?;

        self.event_bus.start_heartbeat(
            Duration::from_secs(self.config.events.heartbeat_seconds.max(1)),
            self.shutdown_rx.clone(),
        );

        #[cfg(unix)]
        self.predictor.reload_on_sighup(self.shutdown_rx.clone());

        let refresh_rx = self
            .refresh_rx
            .take()
            .context("service already started")?;
        tokio::spawn(refresh_loop(
            self.catalog.clone(),
            self.providers.clone(),
            self.classifier.clone(),
            self.event_bus.clone(),
            self.config.clone(),
            refresh_rx,
            self.shutdown_rx.clone(),
        ));

        let route_state = RouteState {
            config: self.config.clone(),
            auth: self.auth.clone(),
            catalog: self.catalog.clone(),
            classifier: self.classifier.clone(),
            engine: self.engine.clone(),
            event_bus: self.event_bus.clone(),
            providers: self.providers.clone(),
            state_store: self.state_store.clone(),
            refresh_tx: self.refresh_tx.clone(),
            metrics: Arc::new(metrics::api::Metrics::new()),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("control api listening on {}", self.config.listen_addr);
        let routes = create_routes(route_state);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;
        Ok(())
    }
}

/// One refresh pass per provider, either on the periodic tick or when an
/// explicit trigger arrives with a refresh id to echo in events.
async fn refresh_loop(
    catalog: Arc<ObjectCatalog>,
    providers: Arc<ProviderRegistry>,
    classifier: Arc<PlacementClassifier>,
    event_bus: Arc<EventBus>,
    config: Arc<ServerConfig>,
    mut refresh_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let periodic_seconds = config.catalog.refresh_interval_seconds;
    let mut ticker =
        tokio::time::interval(Duration::from_secs(periodic_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick fires immediately

    loop {
        let refresh_id = tokio::select! {
            _ = ticker.tick(), if periodic_seconds > 0 => {
                format!("refresh-{}", nanoid::nanoid!())
            }
            triggered = refresh_rx.recv() => match triggered {
                Some(id) => id,
                None => return,
            },
            _ = shutdown_rx.changed() => return,
        };
        run_refresh(
            &refresh_id,
            &catalog,
            &providers,
            &classifier,
            &event_bus,
            &config,
        )
        .await;
    }
}

async fn run_refresh(
    refresh_id: &str,
    catalog: &ObjectCatalog,
    providers: &ProviderRegistry,
    classifier: &PlacementClassifier,
    event_bus: &EventBus,
    config: &ServerConfig,
) {
    event_bus.publish(
        EventType::CatalogRefreshStarted,
        serde_json::json!({ "refresh_id": refresh_id }),
    );

    let containers = config.providers.default_containers();
    let refreshes = containers.iter().map(|(kind, container)| async {
        let adapter = providers.get(*kind)?;
        catalog
            .refresh_provider(&adapter, container, classifier, &NoAccessStats)
            .await
    });
    let results = futures::future::join_all(refreshes).await;

    let mut summaries = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                error!("catalog refresh failed for a provider: {err}");
                failures.push(err.to_string());
            }
        }
    }

    let recommended: usize = summaries.iter().map(|s| s.recommended).sum();
    if recommended > 0 {
        let potential_savings: f64 = catalog
            .recommendations()
            .await
            .iter()
            .filter_map(|entry| entry.recommendation.as_ref())
            .map(|rec| rec.monthly_savings)
            .sum();
        event_bus.publish(
            EventType::PlacementRecommendation,
            serde_json::json!({
                "refresh_id": refresh_id,
                "recommended_objects": recommended,
                "potential_monthly_savings": potential_savings,
            }),
        );
    }

    event_bus.publish(
        EventType::CatalogRefreshCompleted,
        serde_json::json!({
            "refresh_id": refresh_id,
            "summaries": summaries,
            "failures": failures,
        }),
    );
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down gracefully");
}
