//! Per-contract recorder
//!
//! Ties the pieces together: seeds the book, keeps a stream ingester alive
//! under a supervisor, and drives aggregation and reconciliation from a
//! ticker re-anchored to wall-clock boundaries every cycle.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::aggregator::SnapshotAggregator;
use crate::bootstrap::{Bootstrapper, SnapshotSource};
use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::orderbook::BookStore;
use crate::reconcile::{ReconciliationValidator, ValidationOutcome};
use crate::sink::SnapshotSink;
use crate::websocket::StreamIngester;

const MINUTE: Duration = Duration::from_secs(60);

/// Timing knobs of the driver loop
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub tick_interval: Duration,
    pub validate_every_ticks: u32,
    pub align_to_minute: bool,
    pub bootstrap_retry_delay: Duration,
    pub ingest_restart_delay: Option<Duration>,
}

impl From<&Config> for RecorderSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            validate_every_ticks: config.validate_every_ticks,
            align_to_minute: config.align_to_minute,
            bootstrap_retry_delay: config.bootstrap_retry_delay(),
            ingest_restart_delay: config.ingest_restart_delay(),
        }
    }
}

/// Time since the unix epoch
pub fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Wait until the next multiple of `period`: `period - (now mod period)`
///
/// Exactly on a boundary this is a full period. Overrun ticks are skipped,
/// never caught up.
pub fn delay_to_next_boundary(now: Duration, period: Duration) -> Duration {
    let period_ns = period.as_nanos();
    if period_ns == 0 {
        return Duration::ZERO;
    }
    let remaining = period_ns - now.as_nanos() % period_ns;
    Duration::from_nanos(remaining as u64)
}

/// Run ingesters back to back for one store
///
/// The ingester never reconnects on its own; restart policy lives here.
pub async fn supervise_ingester(
    endpoint: String,
    store: Arc<BookStore>,
    restart_delay: Option<Duration>,
) {
    loop {
        let mut ingester = StreamIngester::new(&endpoint, Arc::clone(&store));
        let outcome = ingester.run().await;

        let Some(delay) = restart_delay else {
            warn!(
                contract = %store.contract(),
                state = ?ingester.state(),
                "Ingester stopped and restart is disabled; book will only refresh on reconciliation"
            );
            return;
        };

        metrics::inc_ingester_restarts(store.contract());
        warn!(
            contract = %store.contract(),
            failed = outcome.is_err(),
            delay_ms = delay.as_millis() as u64,
            "Restarting ingester"
        );
        sleep(delay).await;
    }
}

/// Drives one contract: bootstrap, ingest, aggregate, reconcile
pub struct ContractRecorder<S, K> {
    store: Arc<BookStore>,
    bootstrapper: Arc<Bootstrapper<S>>,
    validator: ReconciliationValidator<S>,
    aggregator: SnapshotAggregator,
    sink: K,
    settings: RecorderSettings,
    ticks_since_validation: u32,
}

impl<S, K> ContractRecorder<S, K>
where
    S: SnapshotSource + 'static,
    K: SnapshotSink,
{
    pub fn new(store: Arc<BookStore>, source: S, sink: K, settings: RecorderSettings) -> Self {
        let bootstrapper = Arc::new(Bootstrapper::new(source, Arc::clone(&store)));
        Self {
            validator: ReconciliationValidator::new(Arc::clone(&bootstrapper)),
            aggregator: SnapshotAggregator::new(Arc::clone(&store)),
            store,
            bootstrapper,
            sink,
            settings,
            ticks_since_validation: 0,
        }
    }

    pub fn store(&self) -> &Arc<BookStore> {
        &self.store
    }

    /// Retry the initial bootstrap at a fixed delay until it succeeds
    pub async fn bootstrap_until_ready(&self) -> i64 {
        loop {
            match self.bootstrapper.bootstrap().await {
                Ok(id) => return id,
                Err(e) => {
                    warn!(
                        contract = %self.store.contract(),
                        error = %e,
                        retry_ms = self.settings.bootstrap_retry_delay.as_millis() as u64,
                        "Initial bootstrap failed, retrying"
                    );
                    sleep(self.settings.bootstrap_retry_delay).await;
                }
            }
        }
    }

    /// One driver tick: aggregate into the sink, reconcile on cadence
    ///
    /// Only a closed sink is an error; everything else is logged.
    pub async fn tick(&mut self, now: i64) -> Result<Option<ValidationOutcome>> {
        let contract = self.store.contract();

        match self.aggregator.aggregate(now) {
            Ok(snapshot) => {
                self.sink.push(snapshot)?;
                metrics::inc_snapshots(contract);
            }
            Err(e) => warn!(contract = %contract, error = %e, "Skipping snapshot"),
        }

        self.ticks_since_validation += 1;
        if self.ticks_since_validation < self.settings.validate_every_ticks {
            return Ok(None);
        }
        self.ticks_since_validation = 0;

        match self.validator.validate().await {
            Ok(outcome) => {
                match &outcome {
                    ValidationOutcome::InSync => debug!(contract = %contract, "Order book in sync"),
                    ValidationOutcome::DesyncDetected(report) => info!(
                        contract = %contract,
                        rebootstrap_id = ?report.rebootstrap_id,
                        "Reconciliation finished after desync"
                    ),
                }
                Ok(Some(outcome))
            }
            Err(e) => {
                warn!(contract = %contract, error = %e, "Error during order book validation");
                Ok(None)
            }
        }
    }

    /// Run until the sink goes away
    ///
    /// Spawns the ingester supervisor after the first successful bootstrap,
    /// optionally waits for the next full minute, then ticks on wall-clock
    /// boundaries.
    pub async fn run(mut self, ws_endpoint: String) -> Result<()> {
        let contract = self.store.contract().to_string();
        self.bootstrap_until_ready().await;

        let supervisor: JoinHandle<()> = tokio::spawn(supervise_ingester(
            ws_endpoint,
            Arc::clone(&self.store),
            self.settings.ingest_restart_delay,
        ));

        if self.settings.align_to_minute {
            let wait = delay_to_next_boundary(unix_now(), MINUTE);
            info!(contract = %contract, wait_secs = wait.as_secs_f64(), "Waiting for the next full minute");
            sleep(wait).await;
        }

        let result = loop {
            let now = unix_now();
            if let Err(e) = self.tick(now.as_secs() as i64).await {
                break e;
            }
            sleep(delay_to_next_boundary(unix_now(), self.settings.tick_interval)).await;
        };

        supervisor.abort();
        warn!(contract = %contract, error = %result, "Recorder stopped");
        Err(result)
    }
}
