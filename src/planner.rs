//! Fetches market data for aggregated materials and turns it into shopping plans.
use crate::core::aggregate::MaterialAggregate;
use crate::core::config::AppConfig;
use crate::core::market::{FetchError, ListingsSnapshot, MarketDataProvider};
use crate::core::shopping::{self, DetailedShoppingPlan, ShoppingOptions};
use crate::core::worlds;
use crate::providers::caching::CachingMarketProvider;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between successive per-data-center requests of a region search.
pub const REGION_REQUEST_DELAY: Duration = Duration::from_millis(100);

/// Which market boards are searched for every item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// One data center or world.
    Single(String),
    /// Several data centers searched one after the other and merged.
    Region {
        label: String,
        data_centers: Vec<String>,
    },
}

impl SearchScope {
    pub fn from_config(config: &AppConfig) -> Self {
        let market = &config.market.data_center;
        if !config.market.region_search {
            return SearchScope::Single(market.clone());
        }
        match worlds::region_of(market) {
            Some(region) => SearchScope::Region {
                label: region.to_string(),
                data_centers: worlds::data_centers_in_region(region)
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
            None => {
                warn!(
                    market = %market,
                    "Unknown region, searching the configured market only"
                );
                SearchScope::Single(market.clone())
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            SearchScope::Single(market) => market,
            SearchScope::Region { label, .. } => label,
        }
    }
}

/// Listings for one item across the whole search scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSnapshot {
    pub snapshot: ListingsSnapshot,
    /// Some of the data came from cache entries that could not be refreshed.
    pub stale: bool,
}

pub struct Planner<P: MarketDataProvider + 'static> {
    provider: CachingMarketProvider<P>,
    options: ShoppingOptions,
    scope: SearchScope,
    region_delay: Duration,
}

impl<P: MarketDataProvider + 'static> Planner<P> {
    pub fn new(
        provider: CachingMarketProvider<P>,
        options: ShoppingOptions,
        scope: SearchScope,
    ) -> Self {
        Self {
            provider,
            options,
            scope,
            region_delay: REGION_REQUEST_DELAY,
        }
    }

    pub fn with_region_delay(mut self, delay: Duration) -> Self {
        self.region_delay = delay;
        self
    }

    pub fn provider(&self) -> &CachingMarketProvider<P> {
        &self.provider
    }

    pub fn scope(&self) -> &SearchScope {
        &self.scope
    }

    /// Listings of one item for the configured scope.
    ///
    /// In a region search a data center that keeps failing is skipped; the call
    /// only fails when every data center failed.
    pub async fn fetch_scope_snapshot(
        &self,
        item_id: u32,
        cancel: &CancellationToken,
    ) -> Result<ScopeSnapshot, FetchError> {
        let (label, data_centers) = match &self.scope {
            SearchScope::Single(market) => {
                let data = self.provider.get_market_data(market, item_id, cancel).await?;
                return Ok(ScopeSnapshot {
                    snapshot: data.snapshot,
                    stale: data.stale,
                });
            }
            SearchScope::Region {
                label,
                data_centers,
            } => (label, data_centers),
        };

        let mut parts = Vec::with_capacity(data_centers.len());
        let mut stale = false;
        let mut last_error = None;
        for (index, data_center) in data_centers.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(self.region_delay) => {}
                }
            }
            match self
                .provider
                .get_market_data(data_center, item_id, cancel)
                .await
            {
                Ok(data) => {
                    stale |= data.stale;
                    parts.push((data_center.clone(), data.snapshot));
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    warn!(
                        item_id,
                        data_center = %data_center,
                        error = %e,
                        "Skipping data center, region results are partial"
                    );
                    last_error = Some(e);
                }
            }
        }

        if parts.is_empty() {
            return Err(last_error.unwrap_or_else(|| FetchError::NoData(label.clone())));
        }
        Ok(ScopeSnapshot {
            snapshot: shopping::merge_region_snapshots(item_id, label, parts),
            stale,
        })
    }

    /// Builds the shopping plan of one material. Failures end up in the plan's
    /// error field.
    pub async fn plan_item(
        &self,
        material: &MaterialAggregate,
        cancel: &CancellationToken,
    ) -> DetailedShoppingPlan {
        match self.fetch_scope_snapshot(material.item_id, cancel).await {
            Ok(data) => {
                let mut plan = shopping::plan_material(material, &data.snapshot, &self.options);
                plan.is_stale = data.stale;
                plan
            }
            Err(e) => {
                debug!(item_id = material.item_id, error = %e, "Planning failed");
                DetailedShoppingPlan::failed(material, format!("Market data unavailable: {e}"))
            }
        }
    }

    /// Plans every market-bought material concurrently, then applies the
    /// travel and consolidation preferences across all of them.
    pub async fn plan_materials(
        &self,
        materials: &[MaterialAggregate],
        cancel: &CancellationToken,
        on_progress: &(dyn Fn() + Sync),
    ) -> Vec<DetailedShoppingPlan> {
        info!(
            items = materials.len(),
            scope = self.scope.label(),
            "Planning purchases"
        );
        let futures = materials.iter().map(|material| async move {
            let plan = self.plan_item(material, cancel).await;
            on_progress();
            plan
        });
        let mut plans = join_all(futures).await;
        shopping::apply_preferences(&mut plans, &self.options);
        plans
    }

    /// Current listings for a set of items, keyed by item id. Items whose data
    /// could not be fetched are left out.
    pub async fn collect_snapshots(
        &self,
        item_ids: impl IntoIterator<Item = u32>,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn() + Sync),
    ) -> HashMap<u32, ListingsSnapshot> {
        let unique: BTreeSet<u32> = item_ids.into_iter().collect();
        let futures = unique.into_iter().map(|item_id| async move {
            let result = self.fetch_scope_snapshot(item_id, cancel).await;
            on_progress();
            (item_id, result)
        });

        join_all(futures)
            .await
            .into_iter()
            .filter_map(|(item_id, result)| match result {
                Ok(data) => Some((item_id, data.snapshot)),
                Err(e) => {
                    warn!(item_id, error = %e, "No market data for item");
                    None
                }
            })
            .collect()
    }
}
