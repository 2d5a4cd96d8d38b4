//! Shared order book store
//!
//! The single point of shared mutable state. Every mutation and every copy
//! happens under one mutex, so no reader sees bids, asks and bootstrap id
//! from different moments. Callers never get the raw maps, only copies.

use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{BookCopy, DeltaUpdate, OrderBook, PriceLevel, Side};

/// Lock-guarded order book replica for one contract
#[derive(Debug)]
pub struct BookStore {
    contract: String,
    book: Mutex<OrderBook>,
}

/// Top-of-book summary used for status logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookSummary {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub crossed: bool,
}

impl BookStore {
    /// Create an empty, not-yet-bootstrapped store
    pub fn new(contract: &str) -> Self {
        Self {
            contract: contract.to_string(),
            book: Mutex::new(OrderBook::new()),
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Apply one delta under the lock
    pub fn apply_delta(&self, delta: &DeltaUpdate) {
        self.book.lock().apply_delta(delta);
    }

    /// Apply every level of an update message in arrival order, bids first,
    /// under a single lock acquisition. Returns the number of deltas applied.
    pub fn apply_update(&self, bids: &[PriceLevel], asks: &[PriceLevel]) -> usize {
        let mut book = self.book.lock();
        for level in bids {
            book.apply_delta(&DeltaUpdate::new(Side::Bid, *level));
        }
        for level in asks {
            book.apply_delta(&DeltaUpdate::new(Side::Ask, *level));
        }
        bids.len() + asks.len()
    }

    /// Atomically replace the whole book
    ///
    /// The new book is built before the lock is taken; only the swap is
    /// serialized. Everything previously stored is discarded.
    pub fn replace(&self, bids: &[PriceLevel], asks: &[PriceLevel], bootstrap_id: i64) {
        let fresh = OrderBook::from_levels(bids, asks, bootstrap_id);
        *self.book.lock() = fresh;
    }

    /// Copy both sides out, or `None` before the first bootstrap
    pub fn snapshot_read(&self) -> Option<BookCopy> {
        self.book.lock().copy()
    }

    pub fn is_ready(&self) -> bool {
        self.book.lock().is_initialized()
    }

    pub fn last_bootstrap_id(&self) -> Option<i64> {
        self.book.lock().last_bootstrap_id()
    }

    pub fn summary(&self) -> BookSummary {
        let book = self.book.lock();
        BookSummary {
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            bid_levels: book.depth(Side::Bid),
            ask_levels: book.depth(Side::Ask),
            crossed: book.is_crossed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::thread;

    fn levels(prices: &[(i64, i64)]) -> Vec<PriceLevel> {
        prices
            .iter()
            .map(|(p, s)| PriceLevel::new(Decimal::from(*p), Decimal::from(*s)))
            .collect()
    }

    #[test]
    fn test_not_ready_before_bootstrap() {
        let store = BookStore::new("BTC_USDT");
        store.apply_delta(&DeltaUpdate {
            side: Side::Bid,
            price: dec!(100),
            size: dec!(1),
        });
        assert!(!store.is_ready());
        assert!(store.snapshot_read().is_none());
    }

    #[test]
    fn test_replace_then_read_returns_exactly_replaced() {
        let store = BookStore::new("BTC_USDT");
        store.replace(&levels(&[(100, 1), (99, 2)]), &levels(&[(101, 3)]), 7);
        store.apply_delta(&DeltaUpdate {
            side: Side::Bid,
            price: dec!(98),
            size: dec!(5),
        });

        let bids = levels(&[(200, 1)]);
        let asks = levels(&[(202, 4), (201, 2)]);
        store.replace(&bids, &asks, 8);

        let copy = store.snapshot_read().unwrap();
        assert_eq!(copy.bids, bids);
        assert_eq!(copy.asks, levels(&[(201, 2), (202, 4)]));
        assert_eq!(copy.last_bootstrap_id, 8);
    }

    #[test]
    fn test_apply_update_counts_and_orders() {
        let store = BookStore::new("BTC_USDT");
        store.replace(&levels(&[(100, 1)]), &levels(&[(101, 1)]), 1);

        // Same price twice in one message: last write wins
        let applied = store.apply_update(
            &levels(&[(99, 2), (99, 0), (98, 3)]),
            &levels(&[(101, 0)]),
        );
        assert_eq!(applied, 4);

        let copy = store.snapshot_read().unwrap();
        assert_eq!(copy.bids, levels(&[(100, 1), (98, 3)]));
        assert!(copy.asks.is_empty());
    }

    #[test]
    fn test_copy_is_independent() {
        let store = BookStore::new("BTC_USDT");
        store.replace(&levels(&[(100, 1)]), &[], 1);
        let copy = store.snapshot_read().unwrap();
        store.apply_delta(&DeltaUpdate {
            side: Side::Bid,
            price: dec!(100),
            size: dec!(0),
        });
        assert_eq!(copy.bids.len(), 1);
        assert!(store.snapshot_read().unwrap().bids.is_empty());
    }

    #[test]
    fn test_concurrent_deltas_keep_sizes_positive() {
        let store = Arc::new(BookStore::new("BTC_USDT"));
        store.replace(&levels(&[(100, 1)]), &levels(&[(101, 1)]), 1);

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500i64 {
                        let price = Decimal::from(50 + (i % 40));
                        let size = Decimal::from((i + w) % 3);
                        store.apply_update(
                            &[PriceLevel::new(price, size)],
                            &[PriceLevel::new(price + dec!(100), size)],
                        );
                    }
                })
            })
            .collect();

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let copy = store.snapshot_read().unwrap();
                    assert!(copy.bids.iter().all(|l| l.size > Decimal::ZERO));
                    assert!(copy.asks.iter().all(|l| l.size > Decimal::ZERO));
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let copy = store.snapshot_read().unwrap();
        assert!(copy.bids.iter().all(|l| l.size > Decimal::ZERO));
        assert!(copy.asks.iter().all(|l| l.size > Decimal::ZERO));
    }

    #[test]
    fn test_replace_wins_over_earlier_concurrent_deltas() {
        let store = Arc::new(BookStore::new("BTC_USDT"));
        store.replace(&[], &[], 1);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250i64 {
                        store.apply_delta(&DeltaUpdate {
                            side: Side::Ask,
                            price: Decimal::from(1000 + i),
                            size: dec!(1),
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let bids = levels(&[(10, 1)]);
        let asks = levels(&[(11, 1)]);
        store.replace(&bids, &asks, 2);

        let copy = store.snapshot_read().unwrap();
        assert_eq!(copy.bids, bids);
        assert_eq!(copy.asks, asks);
    }

    #[test]
    fn test_summary() {
        let store = BookStore::new("BTC_USDT");
        store.replace(&levels(&[(100, 1), (99, 1)]), &levels(&[(101, 1)]), 1);
        let summary = store.summary();
        assert_eq!(summary.best_bid, Some(dec!(100)));
        assert_eq!(summary.best_ask, Some(dec!(101)));
        assert_eq!(summary.bid_levels, 2);
        assert_eq!(summary.ask_levels, 1);
        assert!(!summary.crossed);
    }
}
