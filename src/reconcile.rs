//! Periodic reconciliation against an authoritative snapshot
//!
//! Deltas carry no sequence numbers we act on, so missed or duplicated
//! messages are invisible at the message level. Comparing the top of the
//! local book against a fresh REST snapshot is the only backstop.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bootstrap::{Bootstrapper, SnapshotSource};
use crate::error::Result;
use crate::metrics;
use crate::orderbook::{BookCopy, OrderBook, PriceLevel, Side};
use crate::parser::OrderBookSnapshot;

/// Ranked levels compared per side
pub const RECONCILE_DEPTH: usize = 20;

/// Maximum relative price deviation between paired levels (0.1%)
pub const MAX_PRICE_DEVIATION: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Result of comparing one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideCheck {
    InSync,
    /// Fewer than the required levels locally or remotely
    Starved { local: usize, remote: usize },
    /// First ranked pair whose relative deviation exceeds the tolerance
    Deviated {
        rank: usize,
        local: Decimal,
        remote: Decimal,
        deviation: Decimal,
    },
}

impl SideCheck {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, SideCheck::InSync)
    }
}

/// Details of a detected desync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesyncReport {
    pub bids: SideCheck,
    pub asks: SideCheck,
    /// Book id of the re-bootstrap, `None` if re-seeding failed
    pub rebootstrap_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    InSync,
    DesyncDetected(DesyncReport),
}

/// `|local - remote| / max(local, remote)`
pub fn relative_deviation(local: Decimal, remote: Decimal) -> Decimal {
    if local == remote {
        return Decimal::ZERO;
    }
    (local - remote)
        .abs()
        .checked_div(local.max(remote))
        .unwrap_or(Decimal::MAX)
}

/// Compare the top `depth` ranked levels of one side positionally
///
/// Both slices must be in ranked order.
pub fn check_side(
    local: &[PriceLevel],
    remote: &[PriceLevel],
    depth: usize,
    tolerance: Decimal,
) -> SideCheck {
    if local.len() < depth || remote.len() < depth {
        return SideCheck::Starved {
            local: local.len().min(depth),
            remote: remote.len().min(depth),
        };
    }

    for (rank, (l, r)) in local.iter().zip(remote).take(depth).enumerate() {
        let deviation = relative_deviation(l.price, r.price);
        if deviation > tolerance {
            return SideCheck::Deviated {
                rank,
                local: l.price,
                remote: r.price,
                deviation,
            };
        }
    }

    SideCheck::InSync
}

/// Rank a REST snapshot the same way the local book is ranked
fn rank_snapshot(snapshot: &OrderBookSnapshot) -> BookCopy {
    let book = OrderBook::from_levels(&snapshot.bids, &snapshot.asks, snapshot.id);
    BookCopy {
        bids: book.levels(Side::Bid),
        asks: book.levels(Side::Ask),
        last_bootstrap_id: snapshot.id,
    }
}

/// Compares the local book against fresh snapshots and re-seeds on drift
#[derive(Debug)]
pub struct ReconciliationValidator<S> {
    bootstrapper: Arc<Bootstrapper<S>>,
    depth: usize,
    tolerance: Decimal,
}

impl<S: SnapshotSource> ReconciliationValidator<S> {
    pub fn new(bootstrapper: Arc<Bootstrapper<S>>) -> Self {
        Self {
            bootstrapper,
            depth: RECONCILE_DEPTH,
            tolerance: MAX_PRICE_DEVIATION,
        }
    }

    /// Run one reconciliation pass
    ///
    /// A failed fetch is returned as an error and nothing else happens; the
    /// caller logs it and tries again on the next cadence.
    pub async fn validate(&self) -> Result<ValidationOutcome> {
        let store = self.bootstrapper.store();
        let contract = store.contract();

        let latest = match self.bootstrapper.source().fetch_snapshot().await {
            Ok(latest) => latest,
            Err(e) => {
                metrics::record_validation(contract, "error");
                return Err(e);
            }
        };
        let remote = rank_snapshot(&latest);
        let local = store.snapshot_read();

        let summary = store.summary();
        metrics::set_book_levels(contract, summary.bid_levels, summary.ask_levels);
        info!(
            contract = %contract,
            best_bid = ?summary.best_bid,
            best_ask = ?summary.best_ask,
            bid_levels = summary.bid_levels,
            ask_levels = summary.ask_levels,
            "Order book status"
        );
        if summary.crossed {
            warn!(contract = %contract, "Local book is crossed");
        }

        // A never-bootstrapped book compares as empty, so it reads as starved
        let bids = self.check(local.as_ref(), &remote, Side::Bid);
        let asks = self.check(local.as_ref(), &remote, Side::Ask);

        if bids.is_in_sync() && asks.is_in_sync() {
            metrics::record_validation(contract, "in_sync");
            return Ok(ValidationOutcome::InSync);
        }

        metrics::record_validation(contract, "desync");
        for (side, check) in [(Side::Bid, bids), (Side::Ask, asks)] {
            if !check.is_in_sync() {
                warn!(contract = %contract, side = %side, check = ?check, "Order book desync detected");
            }
        }

        warn!(contract = %contract, "Order book desynced, refetching snapshot");
        let rebootstrap_id = self.bootstrapper.bootstrap().await.ok();

        Ok(ValidationOutcome::DesyncDetected(DesyncReport {
            bids,
            asks,
            rebootstrap_id,
        }))
    }

    fn check(&self, local: Option<&BookCopy>, remote: &BookCopy, side: Side) -> SideCheck {
        check_side(
            local.map_or(&[][..], |local| local.side(side)),
            remote.side(side),
            self.depth,
            self.tolerance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::testing::{ladder, ScriptedSource};
    use crate::error::RecorderError;
    use crate::orderbook::BookStore;
    use rust_decimal_macros::dec;

    fn validator(source: ScriptedSource) -> (Arc<BookStore>, ReconciliationValidator<ScriptedSource>) {
        let store = Arc::new(BookStore::new("BTC_USDT"));
        let bootstrapper = Arc::new(Bootstrapper::new(source, Arc::clone(&store)));
        (store, ReconciliationValidator::new(bootstrapper))
    }

    fn scaled(snapshot: &OrderBookSnapshot, side: Side, rank: usize, factor: Decimal) -> OrderBookSnapshot {
        let mut out = snapshot.clone();
        let levels = match side {
            Side::Bid => &mut out.bids,
            Side::Ask => &mut out.asks,
        };
        levels[rank].price *= factor;
        out
    }

    #[test]
    fn test_tolerance_constant() {
        assert_eq!(MAX_PRICE_DEVIATION, dec!(0.001));
    }

    #[test]
    fn test_relative_deviation() {
        assert_eq!(relative_deviation(dec!(100), dec!(100)), Decimal::ZERO);
        assert_eq!(relative_deviation(dec!(99), dec!(100)), dec!(0.01));
        assert_eq!(relative_deviation(dec!(100), dec!(99)), dec!(0.01));
    }

    #[test]
    fn test_check_side_starved() {
        let local: Vec<_> = (0..19).map(|i| PriceLevel::new(Decimal::from(100 - i), dec!(1))).collect();
        let remote: Vec<_> = (0..25).map(|i| PriceLevel::new(Decimal::from(100 - i), dec!(1))).collect();
        assert_eq!(
            check_side(&local, &remote, 20, MAX_PRICE_DEVIATION),
            SideCheck::Starved { local: 19, remote: 20 }
        );
        assert!(!check_side(&[], &remote, 20, MAX_PRICE_DEVIATION).is_in_sync());
    }

    #[test]
    fn test_check_side_tolerance_is_exclusive() {
        let tail = (1..20).map(|i| PriceLevel::new(Decimal::from(990 - i), dec!(1)));
        let local: Vec<_> = std::iter::once(PriceLevel::new(dec!(1000), dec!(1)))
            .chain(tail.clone())
            .collect();

        // Exactly 0.1% apart
        let at_limit: Vec<_> = std::iter::once(PriceLevel::new(dec!(999), dec!(1)))
            .chain(tail.clone())
            .collect();
        assert_eq!(relative_deviation(dec!(1000), dec!(999)), MAX_PRICE_DEVIATION);
        assert_eq!(
            check_side(&local, &at_limit, 20, MAX_PRICE_DEVIATION),
            SideCheck::InSync
        );

        let past_limit: Vec<_> = std::iter::once(PriceLevel::new(dec!(998.9), dec!(1)))
            .chain(tail)
            .collect();
        assert!(matches!(
            check_side(&local, &past_limit, 20, MAX_PRICE_DEVIATION),
            SideCheck::Deviated { rank: 0, .. }
        ));
    }

    #[test]
    fn test_check_side_compares_last_rank() {
        let local: Vec<_> = (0..20).map(|i| PriceLevel::new(Decimal::from(1000 - i), dec!(1))).collect();
        let mut remote = local.clone();
        remote[19].price = dec!(979);

        match check_side(&local, &remote, 20, MAX_PRICE_DEVIATION) {
            SideCheck::Deviated { rank, local, remote, .. } => {
                assert_eq!(rank, 19);
                assert_eq!(local, dec!(981));
                assert_eq!(remote, dec!(979));
            }
            other => panic!("Expected deviation at rank 19, got {:?}", other),
        }
    }

    #[test]
    fn test_check_side_ignores_ranks_beyond_depth() {
        let local: Vec<_> = (0..30).map(|i| PriceLevel::new(Decimal::from(1000 - i), dec!(1))).collect();
        let mut remote = local.clone();
        remote[25].price = dec!(1);
        assert!(check_side(&local, &remote, 20, MAX_PRICE_DEVIATION).is_in_sync());
    }

    #[tokio::test]
    async fn test_identical_books_in_sync() {
        let source = ScriptedSource::new();
        source.push_ok(ladder(1, 10_000, 30));
        let (store, validator) = validator(source);
        validator.bootstrapper.bootstrap().await.unwrap();

        assert_eq!(validator.validate().await.unwrap(), ValidationOutcome::InSync);
        assert_eq!(store.last_bootstrap_id(), Some(1));
    }

    #[tokio::test]
    async fn test_one_percent_top_bid_gap_desyncs_and_rebootstraps() {
        let base = ladder(1, 10_000, 30);
        let moved = OrderBookSnapshot {
            id: 2,
            ..scaled(&base, Side::Bid, 0, dec!(1.01))
        };

        let source = ScriptedSource::new();
        source.push_ok(base).push_ok(moved.clone()).push_ok(moved);
        let (store, validator) = validator(source);
        validator.bootstrapper.bootstrap().await.unwrap();

        match validator.validate().await.unwrap() {
            ValidationOutcome::DesyncDetected(report) => {
                assert!(matches!(report.bids, SideCheck::Deviated { rank: 0, .. }));
                assert!(report.asks.is_in_sync());
                assert_eq!(report.rebootstrap_id, Some(2));
            }
            other => panic!("Expected desync, got {:?}", other),
        }
        assert_eq!(store.last_bootstrap_id(), Some(2));
    }

    #[tokio::test]
    async fn test_five_bps_gap_stays_in_sync() {
        let base = ladder(1, 10_000, 30);
        let nudged = scaled(&base, Side::Bid, 0, dec!(1.0005));

        let source = ScriptedSource::new();
        source.push_ok(base).push_ok(nudged);
        let (store, validator) = validator(source);
        validator.bootstrapper.bootstrap().await.unwrap();

        assert_eq!(validator.validate().await.unwrap(), ValidationOutcome::InSync);
        assert_eq!(store.last_bootstrap_id(), Some(1));
    }

    #[tokio::test]
    async fn test_shallow_book_counts_as_desync() {
        let source = ScriptedSource::new();
        source.push_ok(ladder(1, 10_000, 10));
        let (_store, validator) = validator(source);
        validator.bootstrapper.bootstrap().await.unwrap();

        match validator.validate().await.unwrap() {
            ValidationOutcome::DesyncDetected(report) => {
                assert_eq!(report.bids, SideCheck::Starved { local: 10, remote: 10 });
                assert_eq!(report.asks, SideCheck::Starved { local: 10, remote: 10 });
            }
            other => panic!("Expected desync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbootstrapped_book_triggers_bootstrap() {
        let source = ScriptedSource::new();
        source.push_ok(ladder(5, 10_000, 30));
        let (store, validator) = validator(source);

        match validator.validate().await.unwrap() {
            ValidationOutcome::DesyncDetected(report) => {
                assert_eq!(report.bids, SideCheck::Starved { local: 0, remote: 20 });
                assert_eq!(report.asks, SideCheck::Starved { local: 0, remote: 20 });
                assert_eq!(report.rebootstrap_id, Some(5));
            }
            other => panic!("Expected desync, got {:?}", other),
        }
        assert_eq!(store.last_bootstrap_id(), Some(5));
    }

    #[tokio::test]
    async fn test_fetch_error_skips_check() {
        let source = ScriptedSource::new();
        source
            .push_ok(ladder(1, 10_000, 30))
            .push_err(RecorderError::ConnectionTimeout);
        let (store, validator) = validator(source);
        validator.bootstrapper.bootstrap().await.unwrap();

        assert!(validator.validate().await.is_err());
        assert_eq!(store.last_bootstrap_id(), Some(1));
        assert_eq!(validator.bootstrapper.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_local_drift_detected_on_asks() {
        let source = ScriptedSource::new();
        source.push_ok(ladder(1, 10_000, 30));
        let (store, validator) = validator(source);
        validator.bootstrapper.bootstrap().await.unwrap();

        // Stale ask the exchange already removed
        store.apply_update(&[], &[PriceLevel::new(dec!(9990), dec!(1))]);

        match validator.validate().await.unwrap() {
            ValidationOutcome::DesyncDetected(report) => {
                assert!(report.bids.is_in_sync());
                assert!(matches!(report.asks, SideCheck::Deviated { rank: 0, .. }));
            }
            other => panic!("Expected desync, got {:?}", other),
        }
    }
}
