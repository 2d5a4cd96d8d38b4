//! Core order book implementation
//!
//! Uses BTreeMap for sorted price level management so ranked reads never
//! need an explicit sort.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{BookCopy, DeltaUpdate, PriceLevel, Side};

/// Order book replica for a single contract
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Identifier of the REST snapshot that last seeded the book
    last_bootstrap_id: Option<i64>,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_bootstrap_id: None,
        }
    }

    /// Build a fully seeded book from snapshot levels
    ///
    /// Levels with a non-positive size are skipped.
    pub fn from_levels(bids: &[PriceLevel], asks: &[PriceLevel], bootstrap_id: i64) -> Self {
        let mut book = Self::new();

        for level in bids.iter().filter(|l| l.size > Decimal::ZERO) {
            book.bids.insert(Reverse(level.price), level.size);
        }
        for level in asks.iter().filter(|l| l.size > Decimal::ZERO) {
            book.asks.insert(level.price, level.size);
        }

        book.last_bootstrap_id = Some(bootstrap_id);
        book
    }

    /// Apply a single delta
    ///
    /// Zero removes the level (a no-op when absent). Negative sizes are
    /// treated as removals so no stored level is ever non-positive.
    pub fn apply_delta(&mut self, delta: &DeltaUpdate) {
        let keep = delta.size > Decimal::ZERO;
        match delta.side {
            Side::Bid => {
                if keep {
                    self.bids.insert(Reverse(delta.price), delta.size);
                } else {
                    self.bids.remove(&Reverse(delta.price));
                }
            }
            Side::Ask => {
                if keep {
                    self.asks.insert(delta.price, delta.size);
                } else {
                    self.asks.remove(&delta.price);
                }
            }
        }
    }

    /// Size resting at `price`, if any
    pub fn size_at(&self, side: Side, price: Decimal) -> Option<Decimal> {
        match side {
            Side::Bid => self.bids.get(&Reverse(price)).copied(),
            Side::Ask => self.asks.get(&price).copied(),
        }
    }

    /// Ranked levels of one side, best first
    pub fn levels(&self, side: Side) -> Vec<PriceLevel> {
        match side {
            Side::Bid => self
                .bids
                .iter()
                .map(|(Reverse(p), s)| PriceLevel::new(*p, *s))
                .collect(),
            Side::Ask => self
                .asks
                .iter()
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
        }
    }

    /// Copy both sides out, or `None` before the first bootstrap
    pub fn copy(&self) -> Option<BookCopy> {
        let last_bootstrap_id = self.last_bootstrap_id?;
        Some(BookCopy {
            bids: self.levels(Side::Bid),
            asks: self.levels(Side::Ask),
            last_bootstrap_id,
        })
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    /// Whether best bid is at or above best ask
    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid(), self.best_ask()), (Some(bid), Some(ask)) if bid >= ask)
    }

    pub fn depth(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    /// Check if the book has been seeded by a bootstrap
    pub fn is_initialized(&self) -> bool {
        self.last_bootstrap_id.is_some()
    }

    pub fn last_bootstrap_id(&self) -> Option<i64> {
        self.last_bootstrap_id
    }
}
