//! Domain model and pure planning logic

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod craft_cost;
pub mod log;
pub mod market;
pub mod plan;
pub mod shopping;
pub mod worlds;

// Re-export main types for cleaner imports
pub use market::{FetchError, ListingsSnapshot, MarketDataProvider};
pub use plan::{AcquisitionMethod, PlanTree};
pub use shopping::{DetailedShoppingPlan, RecommendationMode};
