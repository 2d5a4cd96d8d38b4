//! WebSocket module for the Gate.io order book stream

mod client;
mod ingester;

pub use client::{Inbound, WebSocketClient};
pub use ingester::{IngesterState, MessageOutcome, StreamIngester};
