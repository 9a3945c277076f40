pub mod cli;
pub mod core;
pub mod planner;
pub mod providers;
pub mod store;

pub use crate::core::config;

use crate::cli::cache::PruneRule;
use crate::core::aggregate::aggregate_materials;
use crate::core::cache::MarketCache;
use crate::core::plan::{PlanFile, PlanTree};
use crate::core::shopping::RecommendationMode;
use crate::planner::{Planner, SearchScope};
use crate::providers::{CachingMarketProvider, UniversalisProvider};
use crate::store::SnapshotStore;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Plan {
        file: PathBuf,
        mode: Option<RecommendationMode>,
        region: bool,
        json: bool,
    },
    Craft {
        file: PathBuf,
    },
    CacheStats,
    CachePrune(PruneRule),
}

/// Shared state of one planning run: the in-memory cache and its on-disk copy.
struct Session {
    config: config::AppConfig,
    cache: Arc<MarketCache>,
    store: Option<SnapshotStore>,
}

impl Session {
    fn open(config: config::AppConfig) -> Self {
        let cache = Arc::new(MarketCache::new());
        let store = if config.cache.persist {
            match store::open_default(&config) {
                Ok(store) => {
                    if let Err(e) = store.load_into(&cache) {
                        warn!(error = %e, "Could not load cached market data");
                    }
                    Some(store)
                }
                Err(e) => {
                    warn!(error = %e, "Market data cache disabled");
                    None
                }
            }
        } else {
            None
        };
        Self {
            config,
            cache,
            store,
        }
    }

    fn planner(&self) -> Result<Planner<UniversalisProvider>> {
        let provider = UniversalisProvider::new(
            &self.config.providers.universalis.base_url,
            self.config.retry_policy(),
        )?;
        let provider = CachingMarketProvider::new(provider, Arc::clone(&self.cache))
            .with_max_age(self.config.cache_max_age());
        Ok(Planner::new(
            provider,
            self.config.shopping_options(),
            SearchScope::from_config(&self.config),
        ))
    }

    fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(e) = store.persist_from(&self.cache)
        {
            warn!(error = %e, "Could not save market data cache");
        }
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling outstanding requests");
            token.cancel();
        }
    });
    (cancel, handle)
}

fn load_tree(file: &Path) -> Result<PlanTree> {
    let plan = PlanFile::load_from_path(file)?;
    if let Some(name) = &plan.name {
        info!("Loaded plan {}", name);
    }
    Ok(PlanTree::from_specs(&plan.items))
}

fn load_config(config_path: Option<&str>) -> Result<config::AppConfig> {
    let config = match config_path {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Procurement planner starting...");
    let mut config = load_config(config_path)?;

    match command {
        AppCommand::Plan {
            file,
            mode,
            region,
            json,
        } => {
            if let Some(mode) = mode {
                config.shopping.mode = mode;
            }
            config.market.region_search |= region;

            let tree = load_tree(&file)?;
            let aggregation = aggregate_materials(&tree);
            let session = Session::open(config);
            let planner = session.planner()?;

            let (cancel, ctrl_c) = cancel_on_ctrl_c();
            let result = cli::plan::run(&planner, &aggregation, &cancel, json).await;
            planner.provider().shutdown();
            ctrl_c.abort();
            session.persist();
            result
        }
        AppCommand::Craft { file } => {
            let mut tree = load_tree(&file)?;
            let session = Session::open(config);
            let planner = session.planner()?;

            let (cancel, ctrl_c) = cancel_on_ctrl_c();
            let result = cli::craft::run(&planner, &mut tree, &cancel).await;
            planner.provider().shutdown();
            ctrl_c.abort();
            session.persist();
            result
        }
        AppCommand::CacheStats => {
            let store = store::open_default(&config)?;
            cli::cache::run_stats(&store, config.cache_max_age())
        }
        AppCommand::CachePrune(rule) => {
            let store = store::open_default(&config)?;
            cli::cache::run_prune(&store, rule)
        }
    }
}
