//! Order book module
//!
//! Maintains the local replica of a contract's book. [`OrderBook`] holds the
//! price levels; [`BookStore`] wraps it in the single lock every other
//! component goes through.

mod book;
mod store;

pub use book::OrderBook;
pub use store::{BookStore, BookSummary};

pub use crate::parser::PriceLevel;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single incremental change to one price level
///
/// A size of zero removes the level, anything else sets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaUpdate {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

impl DeltaUpdate {
    pub fn new(side: Side, level: PriceLevel) -> Self {
        Self {
            side,
            price: level.price,
            size: level.size,
        }
    }
}

/// Independent copy of both sides, already in ranked order
///
/// Bids are descending and asks ascending by price, so index 0 is the best
/// level on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookCopy {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_bootstrap_id: i64,
}

impl BookCopy {
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }
}
