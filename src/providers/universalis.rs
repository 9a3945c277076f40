use super::util::{RetryPolicy, with_retry};
use crate::core::market::{FetchError, Listing, ListingsSnapshot, MarketDataProvider};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

const MAX_LISTINGS: u32 = 100;

/// Market board listings from a Universalis-compatible API.
pub struct UniversalisProvider {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl UniversalisProvider {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("procure/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }
}

#[derive(Deserialize, Debug)]
struct UniversalisResponse {
    #[serde(rename = "itemID")]
    item_id: u32,
    #[serde(rename = "worldName")]
    world_name: Option<String>,
    #[serde(rename = "dcName")]
    dc_name: Option<String>,
    #[serde(default)]
    listings: Vec<UniversalisListing>,
    #[serde(rename = "currentAveragePrice", default)]
    current_average_price: f64,
    #[serde(rename = "averagePrice", default)]
    average_price: f64,
    #[serde(rename = "lastUploadTime")]
    last_upload_time: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct UniversalisListing {
    #[serde(rename = "pricePerUnit")]
    price_per_unit: u64,
    quantity: u32,
    #[serde(default)]
    hq: bool,
    #[serde(rename = "retainerName", default)]
    retainer_name: String,
    #[serde(rename = "worldName")]
    world_name: Option<String>,
}

impl UniversalisResponse {
    fn into_snapshot(self, market: &str) -> ListingsSnapshot {
        // Listings of a single-world query carry no world name of their own.
        let default_world = self
            .world_name
            .clone()
            .unwrap_or_else(|| market.to_string());
        let average_price = if self.current_average_price > 0.0 {
            self.current_average_price
        } else {
            self.average_price
        };

        ListingsSnapshot {
            item_id: self.item_id,
            market: self.dc_name.unwrap_or_else(|| market.to_string()),
            listings: self
                .listings
                .into_iter()
                .map(|l| Listing {
                    world_name: l.world_name.unwrap_or_else(|| default_world.clone()),
                    quantity: l.quantity,
                    price_per_unit: l.price_per_unit,
                    retainer_name: l.retainer_name,
                    is_hq: l.hq,
                    region: None,
                })
                .collect(),
            average_price,
            last_upload: self
                .last_upload_time
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }
}

#[async_trait]
impl MarketDataProvider for UniversalisProvider {
    #[instrument(
        name = "UniversalisFetch",
        skip_all,
        fields(market = %market, item_id = item_id)
    )]
    async fn fetch_listings(
        &self,
        market: &str,
        item_id: u32,
        cancel: &CancellationToken,
    ) -> Result<ListingsSnapshot, FetchError> {
        let url = format!(
            "{}/api/v2/{}/{}?listings={}&entries=0",
            self.base_url, market, item_id, MAX_LISTINGS
        );
        debug!("Requesting listings from {}", url);

        let client = &self.client;
        let request_url = url.as_str();
        let body = with_retry(&self.retry, cancel, move || async move {
            let response = client.get(request_url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: request_url.to_string(),
                });
            }
            Ok(response.text().await?)
        })
        .await?;

        if body.trim().is_empty() {
            return Err(FetchError::NoData(format!("{market}/{item_id}")));
        }

        let data: UniversalisResponse = match serde_json::from_str(&body) {
            Ok(data) => data,
            Err(e) => {
                error!(error = ?e, response = %body, "Failed to parse listings response");
                return Err(FetchError::Decode(format!("{market}/{item_id}: {e}")));
            }
        };

        let snapshot = data.into_snapshot(market);
        debug!(
            listings = snapshot.listings.len(),
            average = snapshot.average_price,
            "Received listings"
        );
        Ok(snapshot)
    }
}
