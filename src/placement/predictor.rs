use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::data_model::{AccessStats, ObjectRef, ProviderKind};

/// Closed set of content-type hints derived from the object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTypeHint {
    Text,
    Image,
    Video,
    Archive,
    Binary,
}

impl ContentTypeHint {
    pub const COUNT: usize = 5;

    pub fn from_key(key: &str) -> Self {
        let extension = key.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match extension.as_str() {
            "txt" | "log" | "csv" | "json" | "xml" | "md" | "html" => ContentTypeHint::Text,
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "tiff" => ContentTypeHint::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => ContentTypeHint::Video,
            "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "zst" => ContentTypeHint::Archive,
            _ => ContentTypeHint::Binary,
        }
    }

    fn index(&self) -> usize {
        match self {
            ContentTypeHint::Text => 0,
            ContentTypeHint::Image => 1,
            ContentTypeHint::Video => 2,
            ContentTypeHint::Archive => 3,
            ContentTypeHint::Binary => 4,
        }
    }
}

/// Fixed inference feature layout: scalar features, then the content-type
/// one-hot, then last-access weekday and hour, then the provider one-hot.
pub const FEATURE_COUNT: usize = 4 + ContentTypeHint::COUNT + 2 + 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Pure function of the object and its access stats; constant-time with
    /// respect to catalog size.
    pub fn from_object(object: &ObjectRef, access: &AccessStats, now_ms: u64) -> Self {
        let mut features = [0.0; FEATURE_COUNT];
        features[0] = (object.size_bytes as f64).max(1.0).ln();
        features[1] = object.age_days(now_ms) as f64;
        features[2] = access.days_since_last_access(now_ms) as f64;
        features[3] = access.access_count_window as f64;

        features[4 + ContentTypeHint::from_key(&object.key).index()] = 1.0;

        let (weekday, hour) = access
            .last_access_at
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
            .map(|dt| {
                (
                    dt.weekday().num_days_from_monday() as f64,
                    dt.hour() as f64,
                )
            })
            .unwrap_or((0.0, 0.0));
        features[4 + ContentTypeHint::COUNT] = weekday;
        features[4 + ContentTypeHint::COUNT + 1] = hour;

        features[4 + ContentTypeHint::COUNT + 2 + object.provider.index()] = 1.0;
        Self(features)
    }
}

/// Immutable model artifact: a linear regressor over the feature vector.
/// Training happens elsewhere; only the inference contract lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl ModelArtifact {
    fn validate(&self) -> Result<()> {
        if self.weights.len() != FEATURE_COUNT {
            anyhow::bail!(
                "model artifact has {} weights, expected {}",
                self.weights.len(),
                FEATURE_COUNT
            );
        }
        Ok(())
    }

    fn infer(&self, features: &FeatureVector) -> f64 {
        let dot: f64 = self
            .weights
            .iter()
            .zip(features.0.iter())
            .map(|(w, f)| w * f)
            .sum();
        (dot + self.bias).max(0.0)
    }
}

/// Inference over the fixed feature vector. The artifact pointer is swapped
/// atomically on reload; concurrent inference sees the old model or the new
/// one, never a partially-loaded mix. Without an artifact the predictor
/// degrades and the classifier falls back to its rules.
pub struct AccessPredictor {
    model: ArcSwapOption<ModelArtifact>,
    model_path: Option<PathBuf>,
}

impl AccessPredictor {
    pub fn load(model_path: Option<PathBuf>) -> Self {
        let predictor = Self {
            model: ArcSwapOption::empty(),
            model_path,
        };
        if let Err(err) = predictor.reload() {
            warn!("access predictor model unavailable, using rule surrogate: {err:#}");
        }
        predictor
    }

    #[cfg(test)]
    pub fn with_artifact(artifact: ModelArtifact) -> Self {
        let predictor = Self {
            model: ArcSwapOption::empty(),
            model_path: None,
        };
        predictor.model.store(Some(Arc::new(artifact)));
        predictor
    }

    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.model_path else {
            anyhow::bail!("no model path configured");
        };
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?;
        let artifact: ModelArtifact =
            serde_json::from_slice(&raw).context("failed to parse model artifact")?;
        artifact.validate()?;
        info!(version = artifact.version, "loaded access predictor model");
        self.model.store(Some(Arc::new(artifact)));
        Ok(())
    }

    pub fn model_available(&self) -> bool {
        self.model.load().is_some()
    }

    pub fn model_version(&self) -> Option<String> {
        self.model.load().as_ref().map(|m| m.version.clone())
    }

    /// Predicted access count over the next window, or None when no model
    /// is loaded.
    pub fn predict(&self, features: &FeatureVector) -> Option<f64> {
        self.model.load().as_ref().map(|model| model.infer(features))
    }

    /// Re-reads the artifact on SIGHUP. A failed reload keeps the current
    /// model in place.
    #[cfg(unix)]
    pub fn reload_on_sighup(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<()>) {
        let predictor = self.clone();
        tokio::spawn(async move {
            let mut hangups =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("failed to install SIGHUP handler: {err}");
                        return;
                    }
                };
            loop {
                tokio::select! {
                    signal = hangups.recv() => {
                        if signal.is_none() {
                            return;
                        }
                        match predictor.reload() {
                            Ok(()) => info!("reloaded access predictor model"),
                            Err(err) => warn!("model reload failed, keeping current model: {err:#}"),
                        }
                    }
                    _ = shutdown_rx.changed() => return,
                }
            }
        });
    }
}
