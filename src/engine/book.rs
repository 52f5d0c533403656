use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use metrics::counter;
use tracing::{debug, warn};

use crate::engine::types::{BookEvent, DeltaDetail, EventKind, Level, Side};

/// Depth reported in derived events.
pub const TOP_DEPTH: usize = 5;

/// Heap entry carrying the size it was pushed with. An entry is live only
/// while the authoritative size map still agrees with that size; everything
/// else is stale and gets discarded from the top on read.
#[derive(Debug, Clone, Copy)]
struct LadderEntry {
    sort_key: i64,
    price_cents: u32,
    size: i64,
}

impl PartialEq for LadderEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key == other.sort_key
    }
}

impl Eq for LadderEntry {}

impl PartialOrd for LadderEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LadderEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key.cmp(&other.sort_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LadderKind {
    /// Best price is the highest.
    Bid,
    /// Best price is the lowest.
    Ask,
}

/// One side of the book: a price→size map as ground truth plus a lazy
/// max-heap index over it for sub-linear best-price retrieval.
///
/// Size updates mutate the map and push a fresh heap entry instead of
/// removing the old one; reads reconcile by popping entries whose cached
/// size no longer matches the map. The cached total volume is maintained
/// incrementally so volume queries are O(1).
#[derive(Debug)]
pub struct PriceLadder {
    kind: LadderKind,
    heap: BinaryHeap<LadderEntry>,
    sizes: HashMap<u32, i64>,
    total_volume: i64,
}

impl PriceLadder {
    fn new(kind: LadderKind) -> Self {
        Self {
            kind,
            heap: BinaryHeap::new(),
            sizes: HashMap::new(),
            total_volume: 0,
        }
    }

    fn sort_key(&self, price_cents: u32) -> i64 {
        match self.kind {
            LadderKind::Bid => i64::from(price_cents),
            LadderKind::Ask => -i64::from(price_cents),
        }
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.sizes.clear();
        self.total_volume = 0;
    }

    /// Sets the absolute size at a price. Sizes floor at zero; a zero size
    /// removes the level from the map (the heap entry decays lazily).
    fn set(&mut self, price_cents: u32, size: i64) {
        let size = size.max(0);
        let old = self.sizes.get(&price_cents).copied().unwrap_or(0);
        self.total_volume += size - old;

        if size == 0 {
            self.sizes.remove(&price_cents);
            return;
        }
        self.sizes.insert(price_cents, size);
        self.heap.push(LadderEntry {
            sort_key: self.sort_key(price_cents),
            price_cents,
            size,
        });
    }

    fn size_at(&self, price_cents: u32) -> i64 {
        self.sizes.get(&price_cents).copied().unwrap_or(0)
    }

    fn total_volume(&self) -> i64 {
        self.total_volume
    }

    fn is_live(&self, entry: &LadderEntry) -> bool {
        self.sizes.get(&entry.price_cents) == Some(&entry.size)
    }

    /// Pops stale entries until the heap top reflects current state.
    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn best(&mut self) -> Option<(u32, i64)> {
        self.discard_stale();
        self.heap.peek().map(|e| (e.price_cents, e.size))
    }

    /// Up to `n` live levels, best first. Live entries popped along the way
    /// are pushed back; stale ones are dropped for good.
    fn top_n(&mut self, n: usize) -> Vec<(u32, i64)> {
        let mut out: Vec<(u32, i64)> = Vec::with_capacity(n);
        let mut keep: Vec<LadderEntry> = Vec::new();

        while out.len() < n {
            let Some(entry) = self.heap.pop() else { break };
            if !self.is_live(&entry) {
                continue;
            }
            keep.push(entry);
            // Duplicate pushes of the same (price, size) can both look live.
            if !out.iter().any(|&(p, _)| p == entry.price_cents) {
                out.push((entry.price_cents, entry.size));
            }
        }
        for entry in keep {
            self.heap.push(entry);
        }
        out
    }

    #[cfg(test)]
    fn recomputed_volume(&self) -> i64 {
        self.sizes.values().sum()
    }
}

/// Reconstructed order book for one market, fed by snapshot and delta
/// messages under a per-ticker sequence-number discipline.
///
/// Prices travel as integer cents of $1 internally; query surfaces return
/// fractional dollars in [0,1]. An empty bid side reads as 0.0 and an empty
/// ask side as 1.0: sentinels for "no interest", never genuine orders.
#[derive(Debug)]
pub struct OrderBook {
    ticker: String,
    bids: PriceLadder,
    asks: PriceLadder,
    last_applied_seq: i64,
    last_update_ts_ms: i64,
}

impl OrderBook {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            bids: PriceLadder::new(LadderKind::Bid),
            asks: PriceLadder::new(LadderKind::Ask),
            last_applied_seq: 0,
            last_update_ts_ms: 0,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn last_applied_seq(&self) -> i64 {
        self.last_applied_seq
    }

    pub fn last_update_ts_ms(&self) -> i64 {
        self.last_update_ts_ms
    }

    fn accepts(&self, seq: i64) -> bool {
        if seq > self.last_applied_seq {
            return true;
        }
        debug!(
            ticker = %self.ticker,
            seq,
            last_applied_seq = self.last_applied_seq,
            "stale message discarded"
        );
        counter!("book_stale_messages_total", "ticker" => self.ticker.clone()).increment(1);
        false
    }

    fn valid_cents(&self, price_cents: i64) -> bool {
        if (0..=100).contains(&price_cents) {
            return true;
        }
        warn!(ticker = %self.ticker, price_cents, "price outside [0,100] cents, level skipped");
        false
    }

    /// Replaces both ladders wholesale from raw yes/no interest lists.
    ///
    /// Yes levels land on the bid ladder at their stated price; no levels
    /// land on the ask ladder at the complementary price `100 - price`.
    /// Zero-size levels are skipped; a later duplicate price overrides an
    /// earlier one. Returns false (book untouched) for a stale sequence.
    pub fn apply_snapshot(
        &mut self,
        yes: &[(i64, i64)],
        no: &[(i64, i64)],
        ts_ms: i64,
        seq: i64,
    ) -> bool {
        if !self.accepts(seq) {
            return false;
        }
        self.bids.clear();
        self.asks.clear();

        for &(price_cents, size) in yes {
            if size > 0 && self.valid_cents(price_cents) {
                self.bids.set(price_cents as u32, size);
            }
        }
        for &(price_cents, size) in no {
            if size > 0 && self.valid_cents(price_cents) {
                self.asks.set((100 - price_cents) as u32, size);
            }
        }
        self.last_applied_seq = seq;
        self.last_update_ts_ms = ts_ms;
        true
    }

    /// Applies an incremental size change. `yes` updates the bid ladder at
    /// the stated price; `no` updates the ask ladder at `100 - price`. The
    /// new size is the prior recorded size plus `delta`, floored at zero.
    /// Returns false (book untouched) for a stale sequence or bad price.
    pub fn apply_delta(
        &mut self,
        price_cents: i64,
        delta: i64,
        side: Side,
        ts_ms: i64,
        seq: i64,
    ) -> bool {
        if !self.accepts(seq) {
            return false;
        }
        if !self.valid_cents(price_cents) {
            return false;
        }
        match side {
            Side::Yes => {
                let price = price_cents as u32;
                let new_size = self.bids.size_at(price) + delta;
                self.bids.set(price, new_size);
            }
            Side::No => {
                let price = (100 - price_cents) as u32;
                let new_size = self.asks.size_at(price) + delta;
                self.asks.set(price, new_size);
            }
        }
        self.last_applied_seq = seq;
        self.last_update_ts_ms = ts_ms;
        true
    }

    pub fn best_bid_cents(&mut self) -> Option<u32> {
        self.bids.best().map(|(p, _)| p)
    }

    pub fn best_ask_cents(&mut self) -> Option<u32> {
        self.asks.best().map(|(p, _)| p)
    }

    /// Highest live bid in fractional dollars; 0.0 when the side is empty.
    pub fn best_bid(&mut self) -> f64 {
        self.best_bid_cents().map_or(0.0, |p| f64::from(p) / 100.0)
    }

    /// Lowest live ask in fractional dollars; 1.0 when the side is empty.
    pub fn best_ask(&mut self) -> f64 {
        self.best_ask_cents().map_or(1.0, |p| f64::from(p) / 100.0)
    }

    /// Average of best bid and ask; falls back to the populated side when
    /// one is empty and to the uninformative prior 0.5 when both are.
    pub fn mid(&mut self) -> f64 {
        match (self.best_bid_cents(), self.best_ask_cents()) {
            (None, None) => 0.5,
            (Some(bid), None) => f64::from(bid) / 100.0,
            (None, Some(ask)) => f64::from(ask) / 100.0,
            (Some(bid), Some(ask)) => f64::from(bid + ask) / 200.0,
        }
    }

    pub fn bid_volume(&self) -> i64 {
        self.bids.total_volume()
    }

    pub fn ask_volume(&self) -> i64 {
        self.asks.total_volume()
    }

    /// Up to `n` live levels per side: bids descending, asks ascending.
    pub fn top_n(&mut self, n: usize) -> (Vec<Level>, Vec<Level>) {
        let to_levels = |levels: Vec<(u32, i64)>| {
            levels
                .into_iter()
                .map(|(p, s)| (f64::from(p) / 100.0, s))
                .collect()
        };
        let bids = to_levels(self.bids.top_n(n));
        let asks = to_levels(self.asks.top_n(n));
        (bids, asks)
    }

    /// Composes the detached, immutable event handed to the recorder after
    /// a message has been fully applied.
    pub fn derive_event(
        &mut self,
        kind: EventKind,
        delta: Option<DeltaDetail>,
        ts_ms: i64,
    ) -> BookEvent {
        let (top_bids, top_asks) = self.top_n(TOP_DEPTH);
        let best_bid = self.best_bid_cents().map(|p| f64::from(p) / 100.0);
        let best_ask = self.best_ask_cents().map(|p| f64::from(p) / 100.0);
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        };
        BookEvent {
            ticker: self.ticker.clone(),
            ts_ms,
            seq: self.last_applied_seq,
            kind,
            delta,
            best_bid,
            best_ask,
            mid: self.mid(),
            spread,
            total_bid_vol: self.bid_volume(),
            total_ask_vol: self.ask_volume(),
            top_bids,
            top_asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn book_with_snapshot() -> OrderBook {
        let mut book = OrderBook::new("KXNBAGAME-TEST");
        assert!(book.apply_snapshot(&[(60, 100), (55, 50)], &[(10, 30)], 1_000, 1));
        book
    }

    #[test]
    fn snapshot_round_trip() {
        let mut book = book_with_snapshot();
        assert_eq!(book.best_bid(), 0.60);
        assert_eq!(book.best_ask(), 0.90);
        assert_eq!(book.bid_volume(), 150);
        assert_eq!(book.ask_volume(), 30);
    }

    #[test]
    fn delta_consuming_best_bid_uncovers_next_level() {
        let mut book = book_with_snapshot();
        assert!(book.apply_delta(60, -100, Side::Yes, 2_000, 2));
        assert_eq!(book.best_bid(), 0.55);
        assert_eq!(book.bid_volume(), 50);
    }

    #[test]
    fn no_side_delta_lands_on_mirrored_ask() {
        let mut book = book_with_snapshot();
        // No-side interest at 25 cents is an ask on yes at 75 cents.
        assert!(book.apply_delta(25, 40, Side::No, 2_000, 2));
        assert_eq!(book.best_ask(), 0.75);
        assert_eq!(book.ask_volume(), 70);
    }

    #[test]
    fn stale_sequence_leaves_book_unchanged() {
        let mut book = book_with_snapshot();
        let (bids_before, asks_before) = book.top_n(10);

        assert!(!book.apply_delta(60, -100, Side::Yes, 2_000, 1));
        assert!(!book.apply_delta(60, -100, Side::Yes, 2_000, 0));
        assert!(!book.apply_snapshot(&[(1, 1)], &[], 2_000, 1));

        let (bids_after, asks_after) = book.top_n(10);
        assert_eq!(bids_before, bids_after);
        assert_eq!(asks_before, asks_after);
        assert_eq!(book.bid_volume(), 150);
        assert_eq!(book.ask_volume(), 30);
        assert_eq!(book.last_applied_seq(), 1);
    }

    #[test]
    fn zero_size_level_hidden_despite_stale_heap_entry() {
        let mut book = book_with_snapshot();
        assert!(book.apply_delta(60, -100, Side::Yes, 2_000, 2));

        // The heap still physically holds the (60, 100) entry; queries must
        // not surface it.
        assert!(!book.bids.heap.is_empty());
        let (bids, _) = book.top_n(10);
        assert!(bids.iter().all(|&(p, _)| p != 0.60));
        assert_eq!(book.best_bid(), 0.55);
    }

    #[test]
    fn mid_sentinel_cases() {
        let mut empty = OrderBook::new("T");
        assert_eq!(empty.mid(), 0.5);

        let mut bid_only = OrderBook::new("T");
        assert!(bid_only.apply_snapshot(&[(40, 10)], &[], 0, 1));
        assert_eq!(bid_only.mid(), 0.40);

        let mut ask_only = OrderBook::new("T");
        assert!(ask_only.apply_snapshot(&[], &[(30, 10)], 0, 1));
        assert_eq!(ask_only.mid(), 0.70);

        let mut both = book_with_snapshot();
        assert_eq!(both.mid(), 0.75);
    }

    #[test]
    fn top_n_orders_and_caps_levels() {
        let mut book = OrderBook::new("T");
        let yes: Vec<(i64, i64)> = vec![(50, 1), (52, 2), (48, 3), (55, 4)];
        let no: Vec<(i64, i64)> = vec![(30, 1), (20, 2), (40, 3)]; // asks at 70, 80, 60
        assert!(book.apply_snapshot(&yes, &no, 0, 1));

        let (bids, asks) = book.top_n(3);
        assert_eq!(bids, vec![(0.55, 4), (0.52, 2), (0.50, 1)]);
        assert_eq!(asks, vec![(0.60, 3), (0.70, 1), (0.80, 2)]);
    }

    #[test]
    fn duplicate_snapshot_price_last_entry_wins() {
        let mut book = OrderBook::new("T");
        assert!(book.apply_snapshot(&[(60, 100), (60, 25)], &[], 0, 1));
        assert_eq!(book.best_bid(), 0.60);
        assert_eq!(book.bid_volume(), 25);
        let (bids, _) = book.top_n(10);
        assert_eq!(bids, vec![(0.60, 25)]);
    }

    #[test]
    fn snapshot_replaces_prior_state_wholesale() {
        let mut book = book_with_snapshot();
        assert!(book.apply_snapshot(&[(30, 7)], &[(50, 9)], 3_000, 5));
        assert_eq!(book.best_bid(), 0.30);
        assert_eq!(book.best_ask(), 0.50);
        assert_eq!(book.bid_volume(), 7);
        assert_eq!(book.ask_volume(), 9);
        assert_eq!(book.last_applied_seq(), 5);
    }

    #[test]
    fn zero_size_snapshot_levels_are_skipped() {
        let mut book = OrderBook::new("T");
        assert!(book.apply_snapshot(&[(60, 0), (55, 10)], &[(10, 0)], 0, 1));
        assert_eq!(book.best_bid(), 0.55);
        assert_eq!(book.best_ask(), 1.0);
        assert_eq!(book.ask_volume(), 0);
    }

    #[test]
    fn realistic_delta_stream_never_crosses() {
        let mut book = OrderBook::new("T");
        let mut seq = 0;
        let steps: Vec<(i64, i64, Side)> = vec![
            (45, 100, Side::Yes),
            (50, 80, Side::No), // ask at 50
            (47, 20, Side::Yes),
            (48, 60, Side::No), // ask at 52
            (47, -20, Side::Yes),
            (45, -40, Side::Yes),
            (50, -80, Side::No),
        ];
        for (price, delta, side) in steps {
            seq += 1;
            assert!(book.apply_delta(price, delta, side, seq * 10, seq));
            if let (Some(bid), Some(ask)) = (book.best_bid_cents(), book.best_ask_cents()) {
                assert!(bid <= ask, "crossed book: bid {bid} ask {ask}");
            }
        }
    }

    #[test]
    fn derive_event_carries_detached_state() {
        let mut book = book_with_snapshot();
        let detail = DeltaDetail {
            price_cents: 60,
            size_delta: -100,
            side: Side::Yes,
        };
        assert!(book.apply_delta(60, -100, Side::Yes, 2_000, 2));
        let event = book.derive_event(EventKind::Delta, Some(detail), 2_000);

        assert_eq!(event.ticker, "KXNBAGAME-TEST");
        assert_eq!(event.seq, 2);
        assert_eq!(event.best_bid, Some(0.55));
        assert_eq!(event.best_ask, Some(0.90));
        assert_eq!(event.spread, Some(0.90 - 0.55));
        assert_eq!(event.total_bid_vol, 50);
        assert_eq!(event.total_ask_vol, 30);
        assert_eq!(event.top_bids, vec![(0.55, 50)]);
    }

    proptest! {
        /// Cached volumes must always equal a full recompute over the
        /// authoritative size maps, and the lazy heap must never surface a
        /// price the map does not hold.
        #[test]
        fn cached_volume_matches_recompute(
            ops in prop::collection::vec(
                (1i64..=99, -50i64..=50, prop::bool::ANY),
                1..200,
            )
        ) {
            let mut book = OrderBook::new("T");
            let mut seq = 0;
            for (price, delta, is_yes) in ops {
                seq += 1;
                let side = if is_yes { Side::Yes } else { Side::No };
                book.apply_delta(price, delta, side, seq, seq);
            }
            prop_assert_eq!(book.bid_volume(), book.bids.recomputed_volume());
            prop_assert_eq!(book.ask_volume(), book.asks.recomputed_volume());

            if let Some(best) = book.best_bid_cents() {
                let max = book.bids.sizes.keys().max().copied();
                prop_assert_eq!(Some(best), max);
            } else {
                prop_assert!(book.bids.sizes.is_empty());
            }
            if let Some(best) = book.best_ask_cents() {
                let min = book.asks.sizes.keys().min().copied();
                prop_assert_eq!(Some(best), min);
            } else {
                prop_assert!(book.asks.sizes.is_empty());
            }
        }
    }
}
