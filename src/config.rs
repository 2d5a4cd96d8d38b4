//! Configuration module for the order book recorder

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Smallest REST depth that still covers 50-level aggregation with headroom
pub const MIN_SNAPSHOT_LIMIT: usize = 100;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Futures contracts to record (e.g., ["BTC_USDT", "ETH_USDT"])
    pub contracts: Vec<String>,

    /// Settle currency of the futures market
    pub settle: String,

    /// REST API base for order book snapshots
    pub rest_endpoint: String,

    /// WebSocket endpoint for the futures stream
    pub ws_endpoint: String,

    /// Levels per side requested from the REST snapshot
    pub snapshot_limit: usize,

    /// Timeout applied to every REST call
    pub rest_timeout_secs: u64,

    /// Directory the CSV sink writes into
    pub save_dir: PathBuf,

    /// Driver loop period
    pub tick_interval_ms: u64,

    /// Run reconciliation every N ticks
    pub validate_every_ticks: u32,

    /// Flush the sink buffer every N snapshots
    pub flush_every: usize,

    /// Wait for the next full UTC minute before the first tick
    pub align_to_minute: bool,

    /// Fixed delay between failed initial bootstrap attempts
    pub bootstrap_retry_delay_ms: u64,

    /// Delay before restarting a terminated ingester (0 disables restart)
    pub ingest_restart_delay_ms: u64,

    /// Port of the health/metrics server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let contracts: Vec<String> = env::var("CONTRACTS")
            .unwrap_or_else(|_| defaults.contracts.join(","))
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        if contracts.is_empty() {
            anyhow::bail!("CONTRACTS must name at least one contract");
        }

        let snapshot_limit =
            env_or("SNAPSHOT_LIMIT", defaults.snapshot_limit).max(MIN_SNAPSHOT_LIMIT);

        Ok(Self {
            contracts,
            settle: env::var("SETTLE").unwrap_or(defaults.settle),
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            snapshot_limit,
            rest_timeout_secs: env_or("REST_TIMEOUT_SECS", defaults.rest_timeout_secs).max(1),
            save_dir: env::var("SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.save_dir),
            tick_interval_ms: env_or("TICK_INTERVAL_MS", defaults.tick_interval_ms).max(1),
            validate_every_ticks: env_or("VALIDATE_EVERY_TICKS", defaults.validate_every_ticks)
                .max(1),
            flush_every: env_or("FLUSH_EVERY", defaults.flush_every).max(1),
            align_to_minute: env_or("ALIGN_TO_MINUTE", defaults.align_to_minute),
            bootstrap_retry_delay_ms: env_or(
                "BOOTSTRAP_RETRY_DELAY_MS",
                defaults.bootstrap_retry_delay_ms,
            ),
            ingest_restart_delay_ms: env_or(
                "INGEST_RESTART_DELAY_MS",
                defaults.ingest_restart_delay_ms,
            ),
            health_port: env_or("HEALTH_PORT", defaults.health_port),
        })
    }

    /// Full URL of the futures order book endpoint
    pub fn order_book_url(&self) -> String {
        format!(
            "{}/futures/{}/order_book",
            self.rest_endpoint.trim_end_matches('/'),
            self.settle
        )
    }

    /// Never zero; a zero timeout would fail every request
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout_secs.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn bootstrap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bootstrap_retry_delay_ms)
    }

    /// `None` when the supervisor should leave a dead ingester down
    pub fn ingest_restart_delay(&self) -> Option<Duration> {
        (self.ingest_restart_delay_ms > 0).then(|| Duration::from_millis(self.ingest_restart_delay_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contracts: vec!["BTC_USDT".to_string()],
            settle: "usdt".to_string(),
            rest_endpoint: "https://api.gateio.ws/api/v4".to_string(),
            ws_endpoint: "wss://fx-ws.gateio.ws/v4/ws/usdt".to_string(),
            snapshot_limit: MIN_SNAPSHOT_LIMIT,
            rest_timeout_secs: 10,
            save_dir: PathBuf::from("orderbook_data"),
            tick_interval_ms: 1000,
            validate_every_ticks: 60,
            flush_every: 60,
            align_to_minute: true,
            bootstrap_retry_delay_ms: 5000,
            ingest_restart_delay_ms: 5000,
            health_port: 9090,
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recorder_cadence() {
        let config = Config::default();
        assert_eq!(config.snapshot_limit, 100);
        assert_eq!(config.validate_every_ticks, 60);
        assert_eq!(config.flush_every, 60);
        assert_eq!(config.rest_timeout(), Duration::from_secs(10));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_order_book_url() {
        let config = Config {
            rest_endpoint: "https://api.gateio.ws/api/v4/".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.order_book_url(),
            "https://api.gateio.ws/api/v4/futures/usdt/order_book"
        );
    }

    #[test]
    fn test_restart_delay_zero_disables() {
        let config = Config {
            ingest_restart_delay_ms: 0,
            ..Config::default()
        };
        assert!(config.ingest_restart_delay().is_none());
        assert_eq!(
            Config::default().ingest_restart_delay(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_zero_rest_timeout_is_clamped() {
        env::set_var("REST_TIMEOUT_SECS", "0");
        let loaded = Config::load();
        env::remove_var("REST_TIMEOUT_SECS");

        let config = loaded.unwrap();
        assert_eq!(config.rest_timeout_secs, 1);
        assert_eq!(config.rest_timeout(), Duration::from_secs(1));

        let literal = Config {
            rest_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(literal.rest_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or("GATEIO_RECORDER_TEST_UNSET_VAR", 42u64), 42);
    }
}
