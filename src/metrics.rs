//! Prometheus metrics for the recorder
//!
//! Everything registers into the default registry so `/metrics` can simply
//! gather it.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

static DELTAS_APPLIED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "book_deltas_applied_total",
        "Incremental level updates applied to the book",
        &["contract"]
    )
    .expect("book_deltas_applied_total")
});

static MESSAGES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stream_messages_dropped_total",
        "Stream messages ignored or rejected",
        &["contract", "reason"]
    )
    .expect("stream_messages_dropped_total")
});

static BOOTSTRAPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "book_bootstraps_total",
        "REST bootstrap attempts by outcome",
        &["contract", "outcome"]
    )
    .expect("book_bootstraps_total")
});

static VALIDATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "book_validations_total",
        "Reconciliation passes by outcome",
        &["contract", "outcome"]
    )
    .expect("book_validations_total")
});

static SNAPSHOTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "depth_snapshots_total",
        "Depth snapshots handed to the sink",
        &["contract"]
    )
    .expect("depth_snapshots_total")
});

static INGESTER_RESTARTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ingester_restarts_total",
        "Stream ingester restarts by the supervisor",
        &["contract"]
    )
    .expect("ingester_restarts_total")
});

static BOOK_LEVELS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "book_levels",
        "Price levels currently held per side",
        &["contract", "side"]
    )
    .expect("book_levels")
});

pub fn inc_deltas_applied(contract: &str, n: usize) {
    DELTAS_APPLIED
        .with_label_values(&[contract])
        .inc_by(n as u64);
}

pub fn inc_message_dropped(contract: &str, reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[contract, reason]).inc();
}

pub fn record_bootstrap(contract: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    BOOTSTRAPS.with_label_values(&[contract, outcome]).inc();
}

pub fn record_validation(contract: &str, outcome: &str) {
    VALIDATIONS.with_label_values(&[contract, outcome]).inc();
}

pub fn inc_snapshots(contract: &str) {
    SNAPSHOTS.with_label_values(&[contract]).inc();
}

pub fn inc_ingester_restarts(contract: &str) {
    INGESTER_RESTARTS.with_label_values(&[contract]).inc();
}

pub fn set_book_levels(contract: &str, bids: usize, asks: usize) {
    BOOK_LEVELS
        .with_label_values(&[contract, "bid"])
        .set(bids as i64);
    BOOK_LEVELS
        .with_label_values(&[contract, "ask"])
        .set(asks as i64);
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        inc_deltas_applied("TEST_METRICS", 3);
        record_validation("TEST_METRICS", "desync");
        set_book_levels("TEST_METRICS", 12, 7);

        let text = render().unwrap();
        assert!(text.contains("book_deltas_applied_total"));
        assert!(text.contains("book_validations_total"));
        assert!(text.contains(r#"book_levels{contract="TEST_METRICS",side="ask"} 7"#));
    }
}
