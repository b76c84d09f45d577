use std::{collections::HashMap, net::SocketAddr};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    data_model::ProviderKind,
    migration::EngineConfig,
    placement::{cost::CostModel, ClassifierConfig},
    providers::ProviderSettings,
};

const DEV_SIGNING_KEY: &[u8] = b"nimbus-dev-signing-key-not-for-production";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub aws: ProviderSettings,
    #[serde(default)]
    pub azure: ProviderSettings,
    #[serde(default)]
    pub gcp: ProviderSettings,
}

impl ProvidersConfig {
    pub fn settings(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Aws => &self.aws,
            ProviderKind::Azure => &self.azure,
            ProviderKind::Gcp => &self.gcp,
        }
    }

    pub fn enabled(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.settings(*kind).enabled)
            .collect()
    }

    pub fn default_containers(&self) -> HashMap<ProviderKind, String> {
        self.enabled()
            .into_iter()
            .filter_map(|kind| {
                self.settings(kind)
                    .default_container
                    .clone()
                    .map(|container| (kind, container))
            })
            .collect()
    }
}

fn default_ring_capacity() -> usize {
    1_000
}
fn default_subscriber_queue_capacity() -> usize {
    64
}
fn default_heartbeat_seconds() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}

fn default_token_ttl_seconds() -> u64 {
    24 * 3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Path to the HS256 signing key material. Required outside dev mode.
    #[serde(default)]
    pub signing_key_ref: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: default_token_ttl_seconds(),
            signing_key_ref: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictorConfig {
    #[serde(default)]
    pub model_path: Option<String>,
}

fn default_refresh_interval_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Zero disables the periodic refresh; explicit refreshes still work.
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OTLP collector endpoint; defaults to OTEL_EXPORTER_OTLP_ENDPOINT.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub dev: bool,
    pub listen_addr: String,
    pub state_store_path: String,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub cost: CostModel,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let state_store_path = std::env::current_dir()
            .map(|dir| dir.join("nimbus_storage/state"))
            .unwrap_or_else(|_| "nimbus_storage/state".into());
        ServerConfig {
            dev: false,
            listen_addr: "0.0.0.0:8900".to_string(),
            state_store_path: state_store_path.to_string_lossy().to_string(),
            providers: ProvidersConfig::default(),
            classifier: ClassifierConfig::default(),
            cost: CostModel::default(),
            engine: EngineConfig::default(),
            events: EventsConfig::default(),
            auth: AuthConfig::default(),
            predictor: PredictorConfig::default(),
            catalog: CatalogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, overridden by the YAML file (when given), overridden by
    /// NIMBUS_-prefixed environment variables (nested keys split on "__").
    pub fn load(path: Option<&str>) -> Result<ServerConfig> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            figment = figment.merge(Yaml::string(&raw));
        }
        let config: ServerConfig = figment
            .merge(Env::prefixed("NIMBUS_").split("__"))
            .extract()
            .context("failed to assemble server configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("invalid listen address: {}", self.listen_addr);
        }
        if self.events.ring_capacity == 0 {
            anyhow::bail!("events.ring_capacity must be positive");
        }
        if self.engine.max_workers == 0 {
            anyhow::bail!("engine.max_workers must be positive");
        }
        if self.auth.token_ttl_seconds == 0 {
            anyhow::bail!("auth.token_ttl_seconds must be positive");
        }
        if !self.dev && self.auth.signing_key_ref.is_none() {
            anyhow::bail!("auth.signing_key_ref is required outside dev mode");
        }
        for kind in self.providers.enabled() {
            if self.providers.settings(kind).default_container.is_none() {
                anyhow::bail!("provider {kind} is enabled without a default_container");
            }
        }
        Ok(())
    }

    /// Signing key bytes: the referenced file, or a fixed key in dev mode.
    pub fn signing_key(&self) -> Result<Vec<u8>> {
        match &self.auth.signing_key_ref {
            Some(reference) => std::fs::read(reference)
                .with_context(|| format!("failed to read signing key from {reference}")),
            None => Ok(DEV_SIGNING_KEY.to_vec()),
        }
    }
}
