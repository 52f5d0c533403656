//! Wire types for the streaming feed.
//!
//! Every inbound frame shares one envelope: `{type, seq?, id?, msg}`.
//! Only `subscribed`, `orderbook_snapshot` and `orderbook_delta` are acted
//! on; anything else is forward-compatible noise.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::engine::types::Side;

pub const TYPE_SUBSCRIBED: &str = "subscribed";
pub const TYPE_SNAPSHOT: &str = "orderbook_snapshot";
pub const TYPE_DELTA: &str = "orderbook_delta";

pub const ORDERBOOK_CHANNEL: &str = "orderbook_delta";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation id echoed on command acknowledgments.
    #[serde(default)]
    pub id: Option<u64>,
    /// Per-market monotonic sequence stamped on book messages.
    #[serde(default)]
    pub seq: Option<i64>,
    #[serde(default)]
    pub msg: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubscribedMsg {
    /// Subscription identifier used for later subscription updates.
    pub sid: u64,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotMsg {
    pub market_ticker: String,
    /// Yes-side interest as `[price_cents, size]` pairs.
    #[serde(default)]
    pub yes: Vec<(i64, i64)>,
    /// No-side interest as `[price_cents, size]` pairs.
    #[serde(default)]
    pub no: Vec<(i64, i64)>,
    /// Exchange timestamp, epoch seconds.
    #[serde(default)]
    pub ts: Option<i64>,
}

impl SnapshotMsg {
    pub fn ts_ms(&self) -> i64 {
        self.ts
            .map(|s| s * 1_000)
            .unwrap_or_else(|| Utc::now().timestamp_millis())
    }
}

#[derive(Debug, Deserialize)]
pub struct DeltaMsg {
    pub market_ticker: String,
    /// Price in integer cents of $1.
    pub price: i64,
    /// Signed size change in contracts.
    pub delta: i64,
    pub side: Side,
    /// Exchange timestamp, RFC 3339.
    #[serde(default)]
    pub ts: Option<String>,
}

impl DeltaMsg {
    /// Exchange timestamp in epoch milliseconds, falling back to receive
    /// time when the field is absent or unparseable.
    pub fn ts_ms(&self) -> i64 {
        self.ts
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis())
    }
}

/// Initial subscribe command for a single market.
pub fn subscribe_cmd(id: u64, ticker: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "cmd": "subscribe",
        "params": {
            "channels": [ORDERBOOK_CHANNEL],
            "market_ticker": ticker,
        }
    })
}

/// Expands an acknowledged subscription with additional markets.
pub fn update_subscription_cmd(id: u64, sid: u64, tickers: &[String]) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "cmd": "update_subscription",
        "params": {
            "sids": [sid],
            "market_tickers": tickers,
            "action": "add_markets",
        }
    })
}
