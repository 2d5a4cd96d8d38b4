//! Stream ingester
//!
//! Consumes the order book update channel for one contract and applies every
//! delta to the shared store. It never reconnects: when the connection closes
//! or fails, `run` returns and whoever spawned it decides what happens next.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::client::{Inbound, WebSocketClient};
use crate::error::{RecorderError, Result};
use crate::metrics;
use crate::orderbook::BookStore;
use crate::parser::ParsedMessage;

/// WebSocket keepalive ping period
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Lifecycle of one ingester run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngesterState {
    Connecting,
    Subscribed,
    Receiving,
    Closed,
    Errored,
}

impl IngesterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngesterState::Closed | IngesterState::Errored)
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Number of deltas applied
    Applied(usize),
    /// Update for some other contract
    ForeignContract(String),
    /// Not an update event
    Ignored,
}

/// Applies streamed deltas for a single contract
pub struct StreamIngester {
    client: WebSocketClient,
    contract: String,
    store: Arc<BookStore>,
    state: IngesterState,
}

impl StreamIngester {
    pub fn new(endpoint: &str, store: Arc<BookStore>) -> Self {
        Self {
            client: WebSocketClient::new(endpoint),
            contract: store.contract().to_string(),
            store,
            state: IngesterState::Connecting,
        }
    }

    pub fn state(&self) -> IngesterState {
        self.state
    }

    fn transition(&mut self, next: IngesterState) {
        if self.state != next {
            debug!(contract = %self.contract, from = ?self.state, to = ?next, "Ingester state change");
            self.state = next;
        }
    }

    /// Connect, subscribe and apply updates until the connection ends
    ///
    /// Returns `Ok(())` when the peer closes the stream and the error when
    /// the transport fails. Either way the ingester is finished.
    pub async fn run(&mut self) -> Result<()> {
        self.transition(IngesterState::Connecting);

        let result = self.connect_and_process().await;

        match &result {
            Ok(()) => {
                self.transition(IngesterState::Closed);
                info!(contract = %self.contract, "Order book stream closed");
            }
            Err(e) => {
                self.transition(IngesterState::Errored);
                error!(contract = %self.contract, error = %e, "Order book stream failed");
            }
        }
        self.client.close().await;

        result
    }

    async fn connect_and_process(&mut self) -> Result<()> {
        self.client.connect().await?;
        self.client.subscribe(&self.contract).await?;
        self.transition(IngesterState::Subscribed);

        let mut keepalive = interval(PING_INTERVAL);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        loop {
            tokio::select! {
                inbound = self.client.recv() => match inbound? {
                    Inbound::Text(text) => {
                        self.transition(IngesterState::Receiving);
                        self.handle_text(&text)?;
                    }
                    Inbound::Control => {}
                    Inbound::Closed => return Ok(()),
                },
                _ = keepalive.tick() => {
                    if self.client.is_connected() {
                        self.client.ping().await?;
                    }
                }
            }
        }
    }

    /// Process one text frame; only a rejected subscription is fatal
    fn handle_text(&self, raw: &str) -> Result<()> {
        match self.process_message(raw) {
            Ok(MessageOutcome::Applied(n)) => trace!(contract = %self.contract, deltas = n, "Update applied"),
            Ok(MessageOutcome::ForeignContract(other)) => {
                metrics::inc_message_dropped(&self.contract, "foreign_contract");
                trace!(contract = %self.contract, other = %other, "Dropped update for other contract");
            }
            Ok(MessageOutcome::Ignored) => {}
            Err(RecorderError::WebSocketConnection(reason)) => {
                return Err(RecorderError::WebSocketConnection(reason));
            }
            Err(e) => {
                metrics::inc_message_dropped(&self.contract, "parse");
                warn!(contract = %self.contract, error = %e, "Failed to process message");
            }
        }
        Ok(())
    }

    /// Decode a raw message and apply it if it is an update for our contract
    pub fn process_message(&self, raw: &str) -> Result<MessageOutcome> {
        match ParsedMessage::parse(raw)? {
            ParsedMessage::Update(update) => {
                if update.contract != self.contract {
                    return Ok(MessageOutcome::ForeignContract(update.contract));
                }
                let applied = self.store.apply_update(&update.bids, &update.asks);
                metrics::inc_deltas_applied(&self.contract, applied);
                Ok(MessageOutcome::Applied(applied))
            }
            ParsedMessage::Subscribed { error: Some(reason) } => Err(
                RecorderError::WebSocketConnection(format!("Subscription rejected: {}", reason)),
            ),
            ParsedMessage::Subscribed { error: None } => {
                info!(contract = %self.contract, "Subscription confirmed");
                Ok(MessageOutcome::Ignored)
            }
            ParsedMessage::Unknown(msg) => {
                trace!(msg = %msg, "Unknown message type");
                Ok(MessageOutcome::Ignored)
            }
        }
    }
}
