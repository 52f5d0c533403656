//! REST lookup of subscribable markets for a series.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::feed::FeedError;

const DEFAULT_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// Subset of the exchange market object the feed cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct Market {
    pub ticker: String,
    pub event_ticker: String,
    #[serde(default)]
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub yes_bid: i64,
    #[serde(default)]
    pub yes_ask: i64,
    #[serde(default)]
    pub no_bid: i64,
    #[serde(default)]
    pub no_ask: i64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<Market>,
}

pub struct MarketCatalog {
    client: Client,
    base_url: String,
}

impl Default for MarketCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketCatalog {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_BASE.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    /// Open markets for a series ticker, e.g. `KXNBAGAME`.
    pub async fn open_markets(&self, series_ticker: &str) -> Result<Vec<Market>, FeedError> {
        let url = format!(
            "{}/markets?series_ticker={}&status=open",
            self.base_url, series_ticker
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: MarketsResponse = response.json().await?;
        info!(
            series = series_ticker,
            count = body.markets.len(),
            "fetched open markets"
        );
        Ok(body.markets)
    }
}
