//! Gate.io futures order book recorder
//!
//! Keeps an in-memory replica of a contract's order book in sync with the
//! exchange (REST bootstrap, streamed deltas, periodic reconciliation) and
//! reduces it once per second into fixed-shape depth snapshots for storage.

use std::sync::Arc;

pub mod aggregator;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod reconcile;
pub mod recorder;
pub mod sink;
pub mod websocket;

pub use aggregator::{DepthBucket, Snapshot, SnapshotAggregator};
pub use bootstrap::{Bootstrapper, RestSnapshotClient, SnapshotSource};
pub use config::Config;
pub use error::{RecorderError, Result};
pub use orderbook::{BookCopy, BookStore, DeltaUpdate, OrderBook, PriceLevel, Side};
pub use parser::{BookUpdate, OrderBookSnapshot, ParsedMessage};
pub use reconcile::{ReconciliationValidator, ValidationOutcome};
pub use recorder::{ContractRecorder, RecorderSettings};
pub use sink::{CsvSink, CsvWriter, SnapshotSink};
pub use websocket::{IngesterState, StreamIngester};

/// Application state shared with the health server
pub struct AppState {
    pub stores: Vec<Arc<BookStore>>,
    pub config: Arc<Config>,
}
