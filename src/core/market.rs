//! Market listing types and the market data provider abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A single seller's offer on one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub world_name: String,
    pub quantity: u32,
    pub price_per_unit: u64,
    pub retainer_name: String,
    pub is_hq: bool,
    /// Data center the listing was fetched from during a region search.
    #[serde(default)]
    pub region: Option<String>,
}

impl Listing {
    pub fn subtotal(&self) -> u64 {
        self.price_per_unit * u64::from(self.quantity)
    }
}

/// Listings for one item as returned by one market query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingsSnapshot {
    pub item_id: u32,
    /// The market (world, data center or merged region) that was queried.
    pub market: String,
    pub listings: Vec<Listing>,
    /// Average unit price across the queried data center.
    pub average_price: f64,
    pub last_upload: Option<DateTime<Utc>>,
}

impl ListingsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Cheapest unit price for the given quality line.
    pub fn cheapest(&self, hq: bool) -> Option<u64> {
        self.listings
            .iter()
            .filter(|l| l.is_hq == hq)
            .map(|l| l.price_per_unit)
            .min()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub market: String,
    pub item_id: u32,
}

impl MarketKey {
    pub fn new(market: &str, item_id: u32) -> Self {
        Self {
            market: market.to_lowercase(),
            item_id,
        }
    }
}

impl Display for MarketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.market, self.item_id)
    }
}

/// Listing data handed out by the caching layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    pub snapshot: ListingsSnapshot,
    pub fetched_at: DateTime<Utc>,
    /// A live refresh failed and this is an older cached copy.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("HTTP error: {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("No market data for {0}")]
    NoData(String),

    #[error("Fetch task failed: {0}")]
    Task(String),
}

const TRANSIENT_STATUS: [u16; 5] = [408, 429, 502, 503, 504];

impl FetchError {
    /// Whether retrying the same request may succeed.
    ///
    /// Caller-initiated cancellation is never transient; timeouts that the caller
    /// did not ask for are.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => TRANSIENT_STATUS.contains(status),
            FetchError::Timeout(_) | FetchError::Io(_) => true,
            FetchError::Cancelled
            | FetchError::Decode(_)
            | FetchError::Request(_)
            | FetchError::NoData(_)
            | FetchError::Task(_) => false,
        }
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_listings(
        &self,
        market: &str,
        item_id: u32,
        cancel: &CancellationToken,
    ) -> Result<ListingsSnapshot, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        for status in [408, 429, 502, 503, 504] {
            let err = FetchError::Status {
                status,
                url: "u".to_string(),
            };
            assert!(err.is_transient(), "{status} should be retried");
        }
        for status in [400, 401, 404, 500] {
            let err = FetchError::Status {
                status,
                url: "u".to_string(),
            };
            assert!(!err.is_transient(), "{status} should not be retried");
        }
        assert!(FetchError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(FetchError::Io("connection reset".to_string()).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        assert!(!FetchError::Decode("eof".to_string()).is_transient());
    }

    #[test]
    fn test_cheapest_by_quality() {
        let listing = |price, hq| Listing {
            world_name: "Gilgamesh".to_string(),
            quantity: 1,
            price_per_unit: price,
            retainer_name: "r".to_string(),
            is_hq: hq,
            region: None,
        };
        let snapshot = ListingsSnapshot {
            item_id: 1,
            market: "Aether".to_string(),
            listings: vec![listing(300, true), listing(120, false), listing(90, false)],
            average_price: 100.0,
            last_upload: None,
        };
        assert_eq!(snapshot.cheapest(false), Some(90));
        assert_eq!(snapshot.cheapest(true), Some(300));
    }

    #[test]
    fn test_market_key_is_case_insensitive() {
        assert_eq!(MarketKey::new("Aether", 5), MarketKey::new("aether", 5));
        assert_eq!(MarketKey::new("Aether", 5).to_string(), "aether/5");
    }
}
