use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    data_model::{ProviderKind, Tier},
    utils::bytes_to_gb,
};

/// Price table as it appears in configuration: provider → tier → USD per GB
/// per month. A (provider, tier) pair absent from the table means the
/// provider has no equivalent tier.
pub type CostTable = HashMap<ProviderKind, HashMap<Tier, f64>>;

/// Per-tier, per-provider storage pricing. Prices are configuration, not
/// code; the defaults mirror the providers' published list prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModel {
    prices: CostTable,
}

impl Default for CostModel {
    fn default() -> Self {
        let mut prices: CostTable = HashMap::new();
        prices.insert(
            ProviderKind::Aws,
            HashMap::from([
                (Tier::Hot, 0.023),
                (Tier::Warm, 0.0125),
                (Tier::Cold, 0.004),
                (Tier::Archive, 0.00099),
            ]),
        );
        prices.insert(
            ProviderKind::Azure,
            HashMap::from([
                (Tier::Hot, 0.0208),
                (Tier::Warm, 0.0152),
                (Tier::Cold, 0.0036),
                (Tier::Archive, 0.00099),
            ]),
        );
        prices.insert(
            ProviderKind::Gcp,
            HashMap::from([
                (Tier::Hot, 0.020),
                (Tier::Warm, 0.010),
                (Tier::Cold, 0.004),
                (Tier::Archive, 0.0012),
            ]),
        );
        Self { prices }
    }
}

impl CostModel {
    pub fn from_table(prices: CostTable) -> Self {
        Self { prices }
    }

    pub fn unit_price(&self, provider: ProviderKind, tier: Tier) -> Option<f64> {
        self.prices.get(&provider).and_then(|t| t.get(&tier)).copied()
    }

    pub fn monthly_cost(&self, provider: ProviderKind, tier: Tier, size_bytes: u64) -> Option<f64> {
        self.unit_price(provider, tier)
            .map(|price| price * bytes_to_gb(size_bytes))
    }

    /// Savings from moving within the provider; never negative, zero when
    /// either tier is unpriced.
    pub fn monthly_savings(
        &self,
        provider: ProviderKind,
        current_tier: Tier,
        recommended_tier: Tier,
        size_bytes: u64,
    ) -> f64 {
        match (
            self.monthly_cost(provider, current_tier, size_bytes),
            self.monthly_cost(provider, recommended_tier, size_bytes),
        ) {
            (Some(current), Some(recommended)) => (current - recommended).max(0.0),
            _ => 0.0,
        }
    }

    pub fn supports(&self, provider: ProviderKind, tier: Tier) -> bool {
        self.unit_price(provider, tier).is_some()
    }

    /// Rounds a desired tier to the nearest one the provider prices. A
    /// desired tier colder than anything supported rounds to the coldest
    /// supported tier; otherwise to the coldest supported tier that is not
    /// colder than desired.
    pub fn constrain(&self, provider: ProviderKind, desired: Tier) -> Tier {
        if self.supports(provider, desired) {
            return desired;
        }
        let supported: Vec<Tier> = Tier::ALL
            .into_iter()
            .filter(|tier| self.supports(provider, *tier))
            .collect();
        supported
            .iter()
            .filter(|tier| **tier <= desired)
            .max()
            .or_else(|| supported.iter().min())
            .copied()
            .unwrap_or(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::GIB;

    #[test]
    fn test_monthly_cost_and_savings() {
        let model = CostModel::default();
        let size = 100 * GIB; // 107.37 decimal GB

        let hot = model
            .monthly_cost(ProviderKind::Aws, Tier::Hot, size)
            .unwrap();
        let archive = model
            .monthly_cost(ProviderKind::Aws, Tier::Archive, size)
            .unwrap();
        assert!(hot > archive);

        let savings = model.monthly_savings(ProviderKind::Aws, Tier::Hot, Tier::Archive, size);
        assert!((savings - (hot - archive)).abs() < 1e-9);

        // Moving warmer never reports negative savings.
        assert_eq!(
            model.monthly_savings(ProviderKind::Aws, Tier::Archive, Tier::Hot, size),
            0.0
        );
    }

    #[test]
    fn test_constrain_rounds_to_coldest_supported() {
        let mut prices: CostTable = HashMap::new();
        prices.insert(
            ProviderKind::Azure,
            HashMap::from([(Tier::Hot, 0.02), (Tier::Warm, 0.015), (Tier::Cold, 0.004)]),
        );
        let model = CostModel::from_table(prices);

        assert_eq!(model.constrain(ProviderKind::Azure, Tier::Archive), Tier::Cold);
        assert_eq!(model.constrain(ProviderKind::Azure, Tier::Warm), Tier::Warm);
    }

    #[test]
    fn test_default_table_prices_every_tier() {
        let model = CostModel::default();
        for provider in ProviderKind::ALL {
            for tier in Tier::ALL {
                assert!(model.supports(provider, tier), "{provider}/{tier} unpriced");
            }
        }
    }
}
