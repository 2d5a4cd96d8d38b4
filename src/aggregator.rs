//! Depth snapshot aggregation
//!
//! Reduces each side of the book to a fixed number of volume-weighted
//! buckets so every snapshot has the same shape regardless of book depth.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RecorderError, Result};
use crate::orderbook::{BookCopy, BookStore, PriceLevel, Side};

/// Buckets per side in every snapshot
pub const BUCKET_COUNT: usize = 5;
/// Ranked levels folded into each bucket
pub const LEVELS_PER_BUCKET: usize = 10;
/// Levels per side that contribute to a snapshot
pub const AGGREGATION_DEPTH: usize = BUCKET_COUNT * LEVELS_PER_BUCKET;

/// One group of consecutive ranked levels
///
/// Both fields are `None` when the group has no levels or no size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthBucket {
    pub weighted_price: Option<Decimal>,
    pub total_size: Option<Decimal>,
}

impl DepthBucket {
    pub const EMPTY: DepthBucket = DepthBucket {
        weighted_price: None,
        total_size: None,
    };

    /// Volume-weighted price and total size of `levels`
    pub fn from_levels(levels: &[PriceLevel]) -> Self {
        let total_size: Decimal = levels.iter().map(|l| l.size).sum();
        if total_size.is_zero() {
            return Self::EMPTY;
        }

        let notional: Decimal = levels.iter().map(|l| l.price * l.size).sum();
        Self {
            weighted_price: Some(notional / total_size),
            total_size: Some(total_size),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_size.is_none()
    }
}

/// Fixed-shape depth snapshot for one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix seconds
    pub timestamp: i64,
    pub bid_buckets: [DepthBucket; BUCKET_COUNT],
    pub ask_buckets: [DepthBucket; BUCKET_COUNT],
}

impl Snapshot {
    /// Aggregate a book copy taken at `timestamp`
    pub fn from_book(book: &BookCopy, timestamp: i64) -> Self {
        Self {
            timestamp,
            bid_buckets: bucketize(book.side(Side::Bid)),
            ask_buckets: bucketize(book.side(Side::Ask)),
        }
    }
}

/// Split the top `AGGREGATION_DEPTH` ranked levels into `BUCKET_COUNT`
/// contiguous groups. `levels` must already be in ranked order.
pub fn bucketize(levels: &[PriceLevel]) -> [DepthBucket; BUCKET_COUNT] {
    let top = &levels[..levels.len().min(AGGREGATION_DEPTH)];
    let mut buckets = [DepthBucket::EMPTY; BUCKET_COUNT];

    for (bucket, group) in buckets.iter_mut().zip(top.chunks(LEVELS_PER_BUCKET)) {
        *bucket = DepthBucket::from_levels(group);
    }

    buckets
}

/// Produces one [`Snapshot`] per driver tick from the shared store
#[derive(Debug, Clone)]
pub struct SnapshotAggregator {
    store: Arc<BookStore>,
}

impl SnapshotAggregator {
    pub fn new(store: Arc<BookStore>) -> Self {
        Self { store }
    }

    /// Copy the book and aggregate it outside the lock
    pub fn aggregate(&self, now: i64) -> Result<Snapshot> {
        let book = self
            .store
            .snapshot_read()
            .ok_or_else(|| RecorderError::NotReady(self.store.contract().to_string()))?;
        Ok(Snapshot::from_book(&book, now))
    }
}
