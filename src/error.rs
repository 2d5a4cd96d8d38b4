//! Error types for the order book recorder

use thiserror::Error;

/// Recorder errors
///
/// Nothing in here is fatal to the process. Transport and parse failures
/// leave the book stale until the next bootstrap or reconciliation pass.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("REST API error: {0}")]
    RestApiError(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Order book for {0} has not been bootstrapped")]
    NotReady(String),

    #[error("Snapshot sink closed")]
    SinkClosed,
}

impl RecorderError {
    /// Whether the error came from the network rather than from local state
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RecorderError::WebSocketConnection(_)
                | RecorderError::WebSocketMessage(_)
                | RecorderError::RestApiError(_)
                | RecorderError::ConnectionTimeout
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RecorderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RecorderError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for RecorderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RecorderError::ConnectionTimeout
        } else if err.is_decode() {
            RecorderError::ParseError(err.to_string())
        } else {
            RecorderError::RestApiError(err.to_string())
        }
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::StorageError(err.to_string())
    }
}

impl From<csv::Error> for RecorderError {
    fn from(err: csv::Error) -> Self {
        RecorderError::StorageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(RecorderError::ConnectionTimeout.is_transport());
        assert!(RecorderError::RestApiError("503".into()).is_transport());
        assert!(!RecorderError::ParseError("bad".into()).is_transport());
        assert!(!RecorderError::SinkClosed.is_transport());
    }

    #[test]
    fn test_json_error_maps_to_parse_error() {
        let err: RecorderError = serde_json::from_str::<u64>("nope").unwrap_err().into();
        assert!(matches!(err, RecorderError::ParseError(_)));
    }
}
