use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    data_model::{
        AccessStats,
        CatalogEntry,
        ObjectRef,
        Rationale,
        RationaleTag,
        Recommendation,
        RecommendationPriority,
        Tier,
    },
    utils::GIB,
};

pub mod cost;
pub mod predictor;

use cost::CostModel;
use predictor::{AccessPredictor, FeatureVector};

fn default_min_savings_threshold() -> f64 {
    0.01
}
fn default_access_window_days() -> u32 {
    30
}
fn default_hot_access_threshold() -> u64 {
    100
}
fn default_warm_access_floor() -> u64 {
    10
}
fn default_hot_recent_days() -> u32 {
    7
}
fn default_archive_age_days() -> u32 {
    365
}
fn default_cold_idle_days() -> u32 {
    30
}
fn default_hot_max_size_bytes() -> u64 {
    GIB
}
fn default_cold_min_size_bytes() -> u64 {
    10 * GIB
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Recommendations saving less than this per month are suppressed.
    #[serde(default = "default_min_savings_threshold")]
    pub min_savings_threshold: f64,
    #[serde(default = "default_access_window_days")]
    pub access_window_days: u32,
    #[serde(default = "default_hot_access_threshold")]
    pub hot_access_threshold: u64,
    #[serde(default = "default_warm_access_floor")]
    pub warm_access_floor: u64,
    #[serde(default = "default_hot_recent_days")]
    pub hot_recent_days: u32,
    #[serde(default = "default_archive_age_days")]
    pub archive_age_days: u32,
    #[serde(default = "default_cold_idle_days")]
    pub cold_idle_days: u32,
    #[serde(default = "default_hot_max_size_bytes")]
    pub hot_max_size_bytes: u64,
    #[serde(default = "default_cold_min_size_bytes")]
    pub cold_min_size_bytes: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("classifier defaults are valid")
    }
}

/// Decides, for one catalog entry, whether a cheaper placement exists.
/// Deterministic: rules first, predictor override second, provider
/// constraint third, economic filter last. Pure for a fixed input.
pub struct PlacementClassifier {
    config: ClassifierConfig,
    cost_model: Arc<CostModel>,
    predictor: Arc<AccessPredictor>,
}

impl PlacementClassifier {
    pub fn new(
        config: ClassifierConfig,
        cost_model: Arc<CostModel>,
        predictor: Arc<AccessPredictor>,
    ) -> Self {
        Self {
            config,
            cost_model,
            predictor,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn predictor(&self) -> &AccessPredictor {
        &self.predictor
    }

    pub fn classify_entry(&self, entry: &CatalogEntry, now_ms: u64) -> Option<Recommendation> {
        self.classify(&entry.object, &entry.access, entry.current_tier, now_ms)
    }

    pub fn classify(
        &self,
        object: &ObjectRef,
        access: &AccessStats,
        current_tier: Tier,
        now_ms: u64,
    ) -> Option<Recommendation> {
        // Step A: deterministic temperature rules. Strict comparisons at
        // every threshold so borderline inputs resolve to the colder tier.
        let (rule_temperature, rule_reason) = self.temperature_rule(object, access, now_ms);

        // Step B: predictor override, when a model is loaded.
        let mut temperature = rule_temperature;
        let mut confidence = 0.7;
        let mut tag = RationaleTag::TemperatureRule;
        let mut reason = rule_reason;
        if let Some(predicted) = self
            .predictor
            .predict(&FeatureVector::from_object(object, access, now_ms))
        {
            let (predicted_temperature, boundary) = self.temperature_from_count(predicted);
            if predicted_temperature != rule_temperature {
                temperature = predicted_temperature;
                tag = RationaleTag::PredictorOverride;
                reason = format!(
                    "predictor expects {predicted:.1} accesses next window, moving {rule_temperature} to {predicted_temperature}",
                );
                confidence = override_confidence(predicted, boundary);
            }
        }

        // Step C: round to the coldest tier the provider actually offers.
        let constrained = self.cost_model.constrain(object.provider, temperature);
        if constrained != temperature {
            tag = RationaleTag::ProviderConstraint;
            reason = format!(
                "{} has no {temperature} tier, rounding to {constrained}",
                object.provider
            );
            temperature = constrained;
        }

        // No-op recommendations are never surfaced.
        if temperature == current_tier {
            return None;
        }

        // Step D: economic filter.
        let monthly_savings = self.cost_model.monthly_savings(
            object.provider,
            current_tier,
            temperature,
            object.size_bytes,
        );
        if monthly_savings < self.config.min_savings_threshold {
            return None;
        }
        let priority = if monthly_savings >= 10.0 * self.config.min_savings_threshold {
            RecommendationPriority::High
        } else if monthly_savings >= 3.0 * self.config.min_savings_threshold {
            RecommendationPriority::Medium
        } else {
            RecommendationPriority::Low
        };

        Some(Recommendation {
            recommended_tier: temperature,
            monthly_savings,
            priority,
            rationale: Rationale { tag, reason },
            confidence,
        })
    }

    fn temperature_rule(
        &self,
        object: &ObjectRef,
        access: &AccessStats,
        now_ms: u64,
    ) -> (Tier, String) {
        let cfg = &self.config;
        let count = access.access_count_window;
        let days_since_access = access.days_since_last_access(now_ms);
        let age_days = object.age_days(now_ms);

        if count > cfg.hot_access_threshold
            || (days_since_access < cfg.hot_recent_days && object.size_bytes < cfg.hot_max_size_bytes)
        {
            let reason = if count > cfg.hot_access_threshold {
                format!(
                    "{count} accesses in the last {} days exceeds the hot threshold",
                    cfg.access_window_days
                )
            } else {
                format!("accessed {days_since_access} days ago and small enough to keep hot")
            };
            return (Tier::Hot, reason);
        }

        if age_days > cfg.archive_age_days && count == 0 {
            return (
                Tier::Archive,
                format!("{age_days} days old with no access in the window"),
            );
        }

        if days_since_access > cfg.cold_idle_days && object.size_bytes > cfg.cold_min_size_bytes {
            return (
                Tier::Cold,
                format!("no access in {days_since_access} days and large enough to demote"),
            );
        }

        (
            Tier::Warm,
            format!("{count} accesses, last {days_since_access} days ago"),
        )
    }

    /// Maps a predicted access count onto a temperature, returning the
    /// count boundary of the band for confidence scaling. Boundaries reuse
    /// the rule thresholds so steps A and B cannot disagree on what "hot"
    /// means.
    fn temperature_from_count(&self, predicted: f64) -> (Tier, f64) {
        let hot = self.config.hot_access_threshold as f64;
        let warm = self.config.warm_access_floor as f64;
        if predicted > hot {
            (Tier::Hot, hot)
        } else if predicted >= warm {
            (Tier::Warm, warm)
        } else if predicted >= 1.0 {
            (Tier::Cold, 1.0)
        } else {
            (Tier::Archive, 1.0)
        }
    }
}

/// Confidence grows with the distance between the prediction and the band
/// boundary it crossed, clamped to [0.5, 0.95].
fn override_confidence(predicted: f64, boundary: f64) -> f64 {
    let distance = (predicted - boundary).abs() / boundary.max(1.0);
    (0.5 + 0.45 * distance).clamp(0.5, 0.95)
}
