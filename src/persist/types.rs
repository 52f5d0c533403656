use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::{BookEvent, EventKind};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("day-file codec failure: {0}")]
    Csv(#[from] csv::Error),
}

/// On-disk row form of a [`BookEvent`]. The column set is fixed and
/// versionless; nullable columns serialize as empty fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    /// UTC calendar date derived from `ts`.
    pub date: NaiveDate,
    pub ticker: String,
    pub seq: i64,
    pub msg_type: String,
    pub price_cents: Option<i64>,
    pub price: Option<f64>,
    pub delta: Option<i64>,
    pub side: Option<String>,
    /// Null when no bid exists (in-memory sentinel 0).
    pub best_bid: Option<f64>,
    /// Null when no ask exists (in-memory sentinel 1).
    pub best_ask: Option<f64>,
    pub mid: f64,
    /// Null unless both sides are populated.
    pub spread: Option<f64>,
    pub total_bid_vol: i64,
    pub total_ask_vol: i64,
    /// JSON object with up to N (price, size) levels per side.
    pub top_bids_and_asks: String,
}

impl PersistedRecord {
    pub fn from_event(event: &BookEvent) -> Self {
        let date = DateTime::from_timestamp_millis(event.ts_ms)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive());
        let msg_type = match event.kind {
            EventKind::Snapshot => "orderbook_snapshot",
            EventKind::Delta => "delta",
        };
        let top = serde_json::json!({
            "bids": event.top_bids,
            "asks": event.top_asks,
        });
        Self {
            ts: event.ts_ms,
            date,
            ticker: event.ticker.clone(),
            seq: event.seq,
            msg_type: msg_type.to_string(),
            price_cents: event.delta.map(|d| d.price_cents),
            price: event.delta.map(|d| d.price_cents as f64 / 100.0),
            delta: event.delta.map(|d| d.size_delta),
            side: event.delta.map(|d| d.side.to_string()),
            best_bid: event.best_bid,
            best_ask: event.best_ask,
            mid: event.mid,
            spread: event.spread,
            total_bid_vol: event.total_bid_vol,
            total_ask_vol: event.total_ask_vol,
            top_bids_and_asks: top.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{DeltaDetail, Side};

    fn delta_event() -> BookEvent {
        BookEvent {
            ticker: "T".to_string(),
            ts_ms: 1_700_000_000_000,
            seq: 7,
            kind: EventKind::Delta,
            delta: Some(DeltaDetail {
                price_cents: 60,
                size_delta: -100,
                side: Side::Yes,
            }),
            best_bid: Some(0.55),
            best_ask: Some(0.90),
            mid: 0.725,
            spread: Some(0.35),
            total_bid_vol: 50,
            total_ask_vol: 30,
            top_bids: vec![(0.55, 50)],
            top_asks: vec![(0.90, 30)],
        }
    }

    #[test]
    fn delta_event_maps_to_row() {
        let record = PersistedRecord::from_event(&delta_event());
        assert_eq!(record.msg_type, "delta");
        assert_eq!(record.price_cents, Some(60));
        assert_eq!(record.price, Some(0.60));
        assert_eq!(record.delta, Some(-100));
        assert_eq!(record.side.as_deref(), Some("yes"));
        assert_eq!(record.date.to_string(), "2023-11-14");
        assert!(record.top_bids_and_asks.contains("bids"));
    }

    #[test]
    fn snapshot_event_has_null_delta_columns() {
        let mut event = delta_event();
        event.kind = EventKind::Snapshot;
        event.delta = None;
        let record = PersistedRecord::from_event(&event);
        assert_eq!(record.msg_type, "orderbook_snapshot");
        assert_eq!(record.price_cents, None);
        assert_eq!(record.side, None);
    }

    #[test]
    fn one_sided_book_yields_null_best_and_spread() {
        let mut event = delta_event();
        event.best_ask = None;
        event.spread = None;
        let record = PersistedRecord::from_event(&event);
        assert_eq!(record.best_bid, Some(0.55));
        assert_eq!(record.best_ask, None);
        assert_eq!(record.spread, None);
    }
}
