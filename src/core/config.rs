use crate::core::shopping::{RecommendationMode, ShoppingOptions};
use crate::providers::util::RetryPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UniversalisProviderConfig {
    pub base_url: String,
}

impl Default for UniversalisProviderConfig {
    fn default() -> Self {
        UniversalisProviderConfig {
            base_url: "https://universalis.app".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub universalis: UniversalisProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    /// Data center (or single world) whose market board is searched.
    pub data_center: String,
    pub home_world: Option<String>,
    /// Search every data center of the region instead of one.
    pub region_search: bool,
    pub blacklisted_worlds: Vec<String>,
    pub congested_worlds: Vec<String>,
    pub travel_prohibited_worlds: Vec<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            data_center: "Aether".to_string(),
            home_world: None,
            region_search: false,
            blacklisted_worlds: Vec::new(),
            congested_worlds: Vec::new(),
            travel_prohibited_worlds: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ShoppingConfig {
    pub mode: RecommendationMode,
    pub travel_weight: u8,
    pub consolidation_bonus: f64,
    pub min_split_savings_pct: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Cached listings younger than this are used without asking the market API.
    pub max_age_minutes: i64,
    /// Keep cached listings on disk between runs.
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_age_minutes: 30,
            persist: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub timeout_secs: u64,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: 3,
            timeout_secs: 10,
            backoff_ms: 200,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            attempts: config.attempts,
            timeout: Duration::from_secs(config.timeout_secs),
            backoff_step: Duration::from_millis(config.backoff_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub shopping: ShoppingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("app", "procure", "procure")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("app", "procure", "procure")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.cache.max_age_minutes.max(0))
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn shopping_options(&self) -> ShoppingOptions {
        ShoppingOptions {
            mode: self.shopping.mode,
            travel_weight: self.shopping.travel_weight.min(100),
            consolidation_bonus: self.shopping.consolidation_bonus,
            min_split_savings_pct: self.shopping.min_split_savings_pct,
            home_world: self.market.home_world.clone(),
            blacklisted_worlds: self.market.blacklisted_worlds.clone(),
            congested_worlds: self.market.congested_worlds.clone(),
            travel_prohibited_worlds: self.market.travel_prohibited_worlds.clone(),
        }
    }
}
