// Order book reconstruction engine
pub mod book; // per-market book with lazy-deletion price ladders
pub mod types; // sides, depth levels, derived book events

pub use book::{OrderBook, TOP_DEPTH};
pub use types::{BookEvent, DeltaDetail, EventKind, Level, Side};
