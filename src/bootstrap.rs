//! Book bootstrapping from the REST order book endpoint

use reqwest::header::ACCEPT;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::orderbook::BookStore;
use crate::parser::OrderBookSnapshot;

/// Anything that can produce an authoritative full-book snapshot
pub trait SnapshotSource: Send + Sync {
    fn fetch_snapshot(&self) -> impl Future<Output = Result<OrderBookSnapshot>> + Send;
}

/// REST client for `GET /futures/{settle}/order_book`
#[derive(Debug, Clone)]
pub struct RestSnapshotClient {
    http: reqwest::Client,
    url: String,
    contract: String,
    limit: String,
}

impl RestSnapshotClient {
    /// Build a client whose every request carries the configured timeout
    pub fn new(config: &Config, contract: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.rest_timeout())
            .build()?;

        Ok(Self {
            http,
            url: config.order_book_url(),
            contract: contract.to_string(),
            limit: config.snapshot_limit.to_string(),
        })
    }
}

impl SnapshotSource for RestSnapshotClient {
    async fn fetch_snapshot(&self) -> Result<OrderBookSnapshot> {
        let snapshot = self
            .http
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .query(&[
                ("contract", self.contract.as_str()),
                ("limit", self.limit.as_str()),
                ("with_id", "true"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<OrderBookSnapshot>()
            .await?;

        Ok(snapshot)
    }
}

/// Seeds (and re-seeds) the shared store from a snapshot source
///
/// No retries happen here; callers own the retry policy.
#[derive(Debug)]
pub struct Bootstrapper<S> {
    source: S,
    store: Arc<BookStore>,
}

impl<S: SnapshotSource> Bootstrapper<S> {
    pub fn new(source: S, store: Arc<BookStore>) -> Self {
        Self { source, store }
    }

    /// Fetch a fresh snapshot and replace the whole book with it
    ///
    /// The fetch runs without holding the store lock; only the final
    /// replace takes it. Returns the snapshot's book id.
    pub async fn bootstrap(&self) -> Result<i64> {
        let contract = self.store.contract();

        let snapshot = match self.source.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(contract = %contract, error = %e, "Order book bootstrap failed");
                metrics::record_bootstrap(contract, false);
                return Err(e);
            }
        };

        self.store
            .replace(&snapshot.bids, &snapshot.asks, snapshot.id);
        metrics::record_bootstrap(contract, true);

        info!(
            contract = %contract,
            bootstrap_id = snapshot.id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Order book bootstrapped"
        );

        Ok(snapshot.id)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &Arc<BookStore> {
        &self.store
    }
}
