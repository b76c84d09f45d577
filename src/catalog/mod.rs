use std::collections::BTreeMap;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    data_model::{
        AccessStats,
        CatalogEntry,
        FileTransferState,
        MigrationJob,
        ObjectRef,
        ProviderKind,
        Tier,
    },
    placement::{cost::CostModel, PlacementClassifier},
    providers::{ProviderAdapter, ProviderError},
    utils::get_epoch_time_in_ms,
};

#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub provider: Option<ProviderKind>,
    pub tier: Option<Tier>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub provider: ProviderKind,
    pub container: String,
    pub discovered: usize,
    pub removed: usize,
    pub recommended: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierDistributionRow {
    pub provider: ProviderKind,
    pub tier: Tier,
    pub object_count: usize,
    pub total_bytes: u64,
    pub monthly_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub entries: Vec<CatalogEntry>,
    pub cursor: Option<String>,
}

type EntryKey = (String, String); // (container, key)

#[derive(Default)]
struct Partition {
    entries: BTreeMap<EntryKey, CatalogEntry>,
}

/// In-memory index of known objects. One partition per provider, each
/// behind its own lock: a refresh builds the replacement snapshot off-lock
/// and swaps it in a single write section, so readers observe whole
/// snapshots and a refresh of one provider never blocks reads of another.
/// Cross-partition reads take partitions in provider-id order.
pub struct ObjectCatalog {
    partitions: BTreeMap<ProviderKind, RwLock<Partition>>,
}

impl Default for ObjectCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCatalog {
    pub fn new() -> Self {
        let partitions = ProviderKind::ALL
            .into_iter()
            .map(|kind| (kind, RwLock::new(Partition::default())))
            .collect();
        Self { partitions }
    }

    fn partition(&self, provider: ProviderKind) -> &RwLock<Partition> {
        self.partitions
            .get(&provider)
            .expect("catalog partitions cover every provider")
    }

    /// Rebuilds one provider's subset of the catalog from the adapter's
    /// inventory. Entries absent from the new inventory are dropped with
    /// the old snapshot.
    pub async fn refresh_provider(
        &self,
        adapter: &ProviderAdapter,
        container: &str,
        classifier: &PlacementClassifier,
        access_source: &dyn AccessStatsSource,
    ) -> Result<RefreshSummary, ProviderError> {
        let provider = adapter.kind();
        let started = get_epoch_time_in_ms();
        let now_ms = started;

        let mut next = BTreeMap::new();
        let mut recommended = 0usize;
        let mut stream = adapter.enumerate(container, None).await?;
        while let Some(item) = stream.next().await {
            let object = item?;
            let mut access = access_source
                .access_stats(&object)
                .unwrap_or_default();
            access.age_days = object.age_days(now_ms);
            let current_tier = Tier::from_storage_class(provider, &object.storage_class);
            let recommendation = classifier.classify(&object, &access, current_tier, now_ms);
            if recommendation.is_some() {
                recommended += 1;
            }
            next.insert(
                (object.container.clone(), object.key.clone()),
                CatalogEntry {
                    object,
                    access,
                    current_tier,
                    recommendation,
                },
            );
        }

        let discovered = next.len();
        let removed = {
            let mut partition = self.partition(provider).write().await;
            let removed = partition
                .entries
                .keys()
                .filter(|key| !next.contains_key(*key))
                .count();
            partition.entries = next;
            removed
        };

        let summary = RefreshSummary {
            provider,
            container: container.to_string(),
            discovered,
            removed,
            recommended,
            duration_ms: get_epoch_time_in_ms().saturating_sub(started),
        };
        info!(
            provider = %provider,
            discovered,
            removed,
            recommended,
            "catalog refresh finished"
        );
        Ok(summary)
    }

    pub async fn get(
        &self,
        provider: ProviderKind,
        container: &str,
        key: &str,
    ) -> Option<CatalogEntry> {
        self.partition(provider)
            .read()
            .await
            .entries
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Filterable listing with cursor pagination. The cursor encodes the
    /// last-returned identity; iteration order is provider-id, then
    /// container, then key.
    pub async fn list(&self, filter: &CatalogFilter) -> CatalogPage {
        let limit = filter.limit.unwrap_or(100).max(1);
        let cursor = filter.cursor.as_deref().and_then(decode_cursor);

        let mut entries = Vec::new();
        let mut next_cursor = None;

        'providers: for (provider, partition) in &self.partitions {
            if let Some(wanted) = filter.provider {
                if *provider != wanted {
                    continue;
                }
            }
            if let Some((cursor_provider, _, _)) = &cursor {
                if provider.index() < cursor_provider.index() {
                    continue;
                }
            }

            let partition = partition.read().await;
            for ((container, key), entry) in &partition.entries {
                if let Some((cp, cc, ck)) = &cursor {
                    if provider.index() == cp.index()
                        && (container.as_str(), key.as_str()) <= (cc.as_str(), ck.as_str())
                    {
                        continue;
                    }
                }
                if let Some(tier) = filter.tier {
                    if entry.current_tier != tier {
                        continue;
                    }
                }
                if entries.len() == limit {
                    let last: &CatalogEntry = entries.last().expect("limit >= 1");
                    next_cursor = Some(encode_cursor(
                        last.object.provider,
                        &last.object.container,
                        &last.object.key,
                    ));
                    break 'providers;
                }
                entries.push(entry.clone());
            }
        }

        CatalogPage {
            entries,
            cursor: next_cursor,
        }
    }

    pub async fn recommendations(&self) -> Vec<CatalogEntry> {
        let mut out = Vec::new();
        for partition in self.partitions.values() {
            let partition = partition.read().await;
            out.extend(
                partition
                    .entries
                    .values()
                    .filter(|entry| entry.recommendation.is_some())
                    .cloned(),
            );
        }
        out
    }

    /// Folds a finished (possibly partially-failed) migration back into the
    /// catalog: every verified file gains a destination entry. Migrations
    /// copy rather than move, so source entries stay until a refresh or an
    /// explicit delete says otherwise.
    pub async fn apply_migration(&self, job: &MigrationJob) {
        let source_partition = self.partition(job.source_provider);
        let mut new_entries = Vec::new();
        {
            let source = source_partition.read().await;
            for file in &job.files {
                if file.state != FileTransferState::Verified {
                    continue;
                }
                let source_entry = source
                    .entries
                    .get(&(job.source_container.clone(), file.source_key.clone()));
                let Some(source_entry) = source_entry else {
                    warn!(
                        job_id = %job.id,
                        key = %file.source_key,
                        "verified file missing from source catalog partition"
                    );
                    continue;
                };
                let object = ObjectRef {
                    provider: job.dest_provider,
                    container: job.dest_container.clone(),
                    key: file.dest_key.clone(),
                    ..source_entry.object.clone()
                };
                new_entries.push(CatalogEntry {
                    object,
                    access: source_entry.access.clone(),
                    current_tier: Tier::Hot,
                    recommendation: None,
                });
            }
        }

        if new_entries.is_empty() {
            return;
        }
        let mut dest = self.partition(job.dest_provider).write().await;
        for entry in new_entries {
            dest.entries.insert(
                (entry.object.container.clone(), entry.object.key.clone()),
                entry,
            );
        }
    }

    /// Records an in-place tier change: the entry's class and tier are
    /// updated and any recommendation it carried is dropped until the next
    /// classification pass.
    pub async fn set_entry_tier(
        &self,
        provider: ProviderKind,
        container: &str,
        key: &str,
        tier: Tier,
    ) -> bool {
        let mut partition = self.partition(provider).write().await;
        match partition
            .entries
            .get_mut(&(container.to_string(), key.to_string()))
        {
            Some(entry) => {
                entry.current_tier = tier;
                entry.object.storage_class = tier.storage_class(provider).to_string();
                entry.recommendation = None;
                true
            }
            None => false,
        }
    }

    pub async fn tier_distribution(&self, cost_model: &CostModel) -> Vec<TierDistributionRow> {
        let mut rows = Vec::new();
        for (provider, partition) in &self.partitions {
            let mut by_tier: BTreeMap<Tier, (usize, u64)> = BTreeMap::new();
            {
                let partition = partition.read().await;
                for entry in partition.entries.values() {
                    let slot = by_tier.entry(entry.current_tier).or_default();
                    slot.0 += 1;
                    slot.1 += entry.object.size_bytes;
                }
            }
            for (tier, (object_count, total_bytes)) in by_tier {
                rows.push(TierDistributionRow {
                    provider: *provider,
                    tier,
                    object_count,
                    total_bytes,
                    monthly_cost: cost_model
                        .monthly_cost(*provider, tier, total_bytes)
                        .unwrap_or(0.0),
                });
            }
        }
        rows
    }

    pub async fn totals(&self) -> (usize, u64) {
        let mut count = 0usize;
        let mut bytes = 0u64;
        for partition in self.partitions.values() {
            let partition = partition.read().await;
            count += partition.entries.len();
            bytes += partition.entries.values().map(|e| e.object.size_bytes).sum::<u64>();
        }
        (count, bytes)
    }
}

/// Where per-object access statistics come from during refresh. Providers
/// do not report them through the inventory API, so the default source
/// zeroes them; tests and future collectors plug in here.
pub trait AccessStatsSource: Send + Sync {
    fn access_stats(&self, object: &ObjectRef) -> Option<AccessStats>;
}

/// Zeroes every object's stats, per the degraded contract.
pub struct NoAccessStats;

impl AccessStatsSource for NoAccessStats {
    fn access_stats(&self, _object: &ObjectRef) -> Option<AccessStats> {
        None
    }
}

fn encode_cursor(provider: ProviderKind, container: &str, key: &str) -> String {
    format!("{provider}|{container}|{key}")
}

fn decode_cursor(cursor: &str) -> Option<(ProviderKind, String, String)> {
    let mut parts = cursor.splitn(3, '|');
    let provider = parts.next()?.parse().ok()?;
    let container = parts.next()?.to_string();
    let key = parts.next()?.to_string();
    Some((provider, container, key))
}
