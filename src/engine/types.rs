use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of an incoming level or delta as named by the exchange.
///
/// "yes" interest is a direct bid on the outcome; "no" interest is a bid on
/// the complementary outcome, economically an ask on "yes" at `1 - price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "yes"),
            Side::No => write!(f, "no"),
        }
    }
}

/// One visible depth level: fractional dollar price in [0,1] and contracts.
pub type Level = (f64, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Snapshot,
    Delta,
}

/// Raw fields of the delta that produced a [`BookEvent`], carried through to
/// the persisted row.
#[derive(Debug, Clone, Copy)]
pub struct DeltaDetail {
    pub price_cents: i64,
    pub size_delta: i64,
    pub side: Side,
}

/// Immutable snapshot of derived book state, composed once per applied feed
/// message and consumed exactly once by the recorder for its ticker.
#[derive(Debug, Clone)]
pub struct BookEvent {
    pub ticker: String,
    /// Event timestamp, milliseconds since the Unix epoch.
    pub ts_ms: i64,
    pub seq: i64,
    pub kind: EventKind,
    pub delta: Option<DeltaDetail>,
    /// None when the bid side is empty.
    pub best_bid: Option<f64>,
    /// None when the ask side is empty.
    pub best_ask: Option<f64>,
    pub mid: f64,
    /// None unless both sides are populated.
    pub spread: Option<f64>,
    pub total_bid_vol: i64,
    pub total_ask_vol: i64,
    /// Best-first depth, bids descending by price.
    pub top_bids: Vec<Level>,
    /// Best-first depth, asks ascending by price.
    pub top_asks: Vec<Level>,
}
