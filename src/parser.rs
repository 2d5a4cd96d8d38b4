//! Parser module for Gate.io futures order book messages
//!
//! Handles the REST order book snapshot, the `futures.order_book_update`
//! stream envelope and the subscription request.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Channel carrying incremental order book updates
pub const ORDER_BOOK_UPDATE_CHANNEL: &str = "futures.order_book_update";
/// Update interval requested on subscription
pub const UPDATE_INTERVAL: &str = "100ms";
/// Update depth requested on subscription
pub const UPDATE_DEPTH: &str = "100";

/// Price level (price, size pair) as sent by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    #[serde(rename = "s", deserialize_with = "deserialize_decimal")]
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot from `GET /futures/{settle}/order_book?with_id=true`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    /// Book identifier, only present when `with_id=true`
    pub id: i64,

    pub bids: Vec<PriceLevel>,

    pub asks: Vec<PriceLevel>,
}

/// Payload of an `update` event on the order book update channel
#[derive(Debug, Clone, Deserialize)]
pub struct BookUpdate {
    /// Contract
    #[serde(rename = "s")]
    pub contract: String,

    /// First update id in this message
    #[serde(rename = "U", default)]
    pub first_update_id: Option<u64>,

    /// Last update id in this message
    #[serde(rename = "u", default)]
    pub last_update_id: Option<u64>,

    /// Bid deltas
    #[serde(rename = "b", default)]
    pub bids: Vec<PriceLevel>,

    /// Ask deltas
    #[serde(rename = "a", default)]
    pub asks: Vec<PriceLevel>,
}

/// Envelope shared by every message on the futures stream
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub event: String,

    #[serde(default)]
    pub result: Option<serde_json::Value>,

    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Update(BookUpdate),
    /// Subscription acknowledgement or rejection
    Subscribed { error: Option<String> },
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let msg: StreamMessage = serde_json::from_str(raw)?;

        match msg.event.as_str() {
            "update" => {
                let result = msg.result.unwrap_or(serde_json::Value::Null);
                let update: BookUpdate = serde_json::from_value(result)?;
                Ok(ParsedMessage::Update(update))
            }
            "subscribe" => Ok(ParsedMessage::Subscribed {
                error: msg.error.filter(|e| !e.is_null()).map(|e| e.to_string()),
            }),
            _ => Ok(ParsedMessage::Unknown(raw.to_string())),
        }
    }
}

/// Subscription request for the order book update channel
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub time: i64,
    pub channel: &'static str,
    pub event: &'static str,
    pub payload: [String; 3],
}

impl SubscribeRequest {
    pub fn order_book_update(contract: &str, time: i64) -> Self {
        Self {
            time,
            channel: ORDER_BOOK_UPDATE_CHANNEL,
            event: "subscribe",
            payload: [
                contract.to_string(),
                UPDATE_INTERVAL.to_string(),
                UPDATE_DEPTH.to_string(),
            ],
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Number(serde_json::Number),
}

/// Custom deserializer for Decimal from either a JSON string or number
///
/// Futures sizes arrive as integers while prices arrive as strings.
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match RawNumber::deserialize(deserializer)? {
        RawNumber::Text(s) => s,
        RawNumber::Number(n) => n.to_string(),
    };
    Decimal::from_str(text.trim())
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .map_err(serde::de::Error::custom)
}
