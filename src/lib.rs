//! Market-data recorder for binary-outcome exchange feeds.
//!
//! Three pieces form one pipeline: the [`engine`] reconstructs a per-market
//! order book from snapshot and delta messages, the [`feed`] owns the
//! authenticated session that drives it, and [`persist`] records every
//! derived book state to per-ticker, per-day files without blocking the
//! dispatch path.

pub mod engine;
pub mod feed;
pub mod persist;
pub mod telemetry;

pub use engine::{BookEvent, OrderBook};
pub use feed::{Credentials, FeedError, FeedSupervisor, MarketCatalog};
pub use persist::{EventRecorder, RecorderConfig};
