//! Market viability: is this market tradeable right now?
//!
//! Inspects the order book and market end date for resolution, imminent
//! close, spread, and depth. BUYs hard-skip on any failure; exits (SELL and
//! MERGE) hard-skip only on spread/depth and proceed with a warning on
//! price/time failures.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::types::OrderBook;
use crate::config::ViabilityConfig;
use crate::models::OrderKind;

/// Condensed order book view used by the checks.
#[derive(Debug, Clone, Default)]
pub struct BookSummary {
    pub best_bid: Option<(Decimal, Decimal)>,
    pub best_ask: Option<(Decimal, Decimal)>,
    pub bid_depth_usd: Decimal,
    pub ask_depth_usd: Decimal,
}

impl BookSummary {
    pub fn from_book(book: &OrderBook) -> Self {
        Self {
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            bid_depth_usd: book.bid_depth_usd(),
            ask_depth_usd: book.ask_depth_usd(),
        }
    }
}

/// Individual check outcomes, reported alongside the verdict.
#[derive(Debug, Clone, Default)]
pub struct ViabilityChecks {
    pub resolved: bool,
    pub too_close_to_end: bool,
    pub spread_bps: Option<Decimal>,
    pub spread_ok: bool,
    pub relevant_depth_usd: Decimal,
    pub depth_ok: bool,
}

/// Verdict of the viability gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Viable,
    /// Execution must not proceed.
    Skip(String),
    /// Failure downgraded to a warning for exit paths.
    Warn(String),
}

/// Evaluate viability against a book summary. Pure so the gate logic is
/// testable without network access.
pub fn evaluate(
    summary: &BookSummary,
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    kind: OrderKind,
    cfg: &ViabilityConfig,
) -> (Verdict, ViabilityChecks) {
    let mut checks = ViabilityChecks::default();

    let (bid, ask) = match (summary.best_bid, summary.best_ask) {
        (Some(b), Some(a)) => (b.0, a.0),
        _ => {
            return (
                Verdict::Skip("order_book_one_sided".to_string()),
                checks,
            );
        }
    };

    // Resolved market: price pinned at either extreme.
    checks.resolved = bid >= cfg.price_limit || ask <= Decimal::ONE - cfg.price_limit;

    // Imminent close.
    if let Some(end) = end_date {
        let minutes_left = (end - now).num_minutes();
        checks.too_close_to_end = minutes_left < cfg.min_time_before_end_minutes;
    }

    // Spread in basis points of the midpoint.
    let mid = (bid + ask) / dec!(2);
    if mid > Decimal::ZERO {
        let spread = (ask - bid) / mid * dec!(10000);
        checks.spread_bps = Some(spread);
        checks.spread_ok = spread <= cfg.max_spread_bps;
    }

    // Depth on the side we would take.
    checks.relevant_depth_usd = match kind {
        OrderKind::Buy => summary.ask_depth_usd,
        OrderKind::Sell | OrderKind::Merge => summary.bid_depth_usd,
    };
    checks.depth_ok = checks.relevant_depth_usd >= cfg.min_depth_usd;

    // Spread/depth failures are hard skips for every side.
    if !checks.spread_ok {
        let spread = checks.spread_bps.unwrap_or_default().round();
        return (
            Verdict::Skip(format!(
                "spread_{}bps_exceeds_max_{}bps",
                spread, cfg.max_spread_bps
            )),
            checks,
        );
    }
    if !checks.depth_ok {
        return (
            Verdict::Skip(format!(
                "depth_{}usd_below_min_{}usd",
                checks.relevant_depth_usd.round_dp(2),
                cfg.min_depth_usd
            )),
            checks,
        );
    }

    // Price/time failures: hard for entries, warnings for exits.
    let price_time_reason = if checks.resolved {
        Some("market_appears_resolved".to_string())
    } else if checks.too_close_to_end {
        Some(format!(
            "market_ends_within_{}min",
            cfg.min_time_before_end_minutes
        ))
    } else {
        None
    };

    match price_time_reason {
        Some(reason) if kind == OrderKind::Buy => (Verdict::Skip(reason), checks),
        Some(reason) => (Verdict::Warn(reason), checks),
        None => (Verdict::Viable, checks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn summary(bid: Decimal, ask: Decimal, depth: Decimal) -> BookSummary {
        BookSummary {
            best_bid: Some((bid, dec!(100))),
            best_ask: Some((ask, dec!(100))),
            bid_depth_usd: depth,
            ask_depth_usd: depth,
        }
    }

    fn cfg() -> ViabilityConfig {
        ViabilityConfig {
            price_limit: dec!(0.95),
            min_time_before_end_minutes: 60,
            max_spread_bps: dec!(500),
            min_depth_usd: dec!(10),
        }
    }

    #[test]
    fn test_healthy_market_is_viable() {
        let (verdict, checks) = evaluate(
            &summary(dec!(0.49), dec!(0.51), dec!(100)),
            Some(Utc::now() + Duration::days(7)),
            Utc::now(),
            OrderKind::Buy,
            &cfg(),
        );
        assert_eq!(verdict, Verdict::Viable);
        assert!(checks.spread_ok);
        assert!(checks.depth_ok);
        assert!(!checks.resolved);
    }

    #[test]
    fn test_resolved_market_detected_both_sides() {
        // Bid pinned high
        let (verdict, checks) = evaluate(
            &summary(dec!(0.96), dec!(0.97), dec!(100)),
            None,
            Utc::now(),
            OrderKind::Buy,
            &cfg(),
        );
        assert!(checks.resolved);
        assert!(matches!(verdict, Verdict::Skip(r) if r == "market_appears_resolved"));

        // Ask pinned low
        let (_, checks) = evaluate(
            &summary(dec!(0.03), dec!(0.04), dec!(100)),
            None,
            Utc::now(),
            OrderKind::Buy,
            &cfg(),
        );
        assert!(checks.resolved);
    }

    #[test]
    fn test_imminent_end_skips_buy_warns_sell() {
        let end = Utc::now() + Duration::minutes(10);

        let (verdict, _) = evaluate(
            &summary(dec!(0.49), dec!(0.51), dec!(100)),
            Some(end),
            Utc::now(),
            OrderKind::Buy,
            &cfg(),
        );
        assert!(matches!(verdict, Verdict::Skip(_)));

        let (verdict, _) = evaluate(
            &summary(dec!(0.49), dec!(0.51), dec!(100)),
            Some(end),
            Utc::now(),
            OrderKind::Sell,
            &cfg(),
        );
        assert!(matches!(verdict, Verdict::Warn(_)));
    }

    #[test]
    fn test_spread_boundary() {
        // mid = 0.50; 500 bps of 0.50 = 0.025 spread exactly
        let (verdict, checks) = evaluate(
            &summary(dec!(0.4875), dec!(0.5125), dec!(100)),
            None,
            Utc::now(),
            OrderKind::Buy,
            &cfg(),
        );
        assert_eq!(checks.spread_bps.map(|s| s.round_dp(4)), Some(dec!(500)));
        assert_eq!(verdict, Verdict::Viable);

        // One basis point over is a hard skip, for exits too.
        let wide = summary(dec!(0.48), dec!(0.52), dec!(100));
        let (verdict, _) = evaluate(&wide, None, Utc::now(), OrderKind::Buy, &cfg());
        assert!(matches!(verdict, Verdict::Skip(_)));
        let (verdict, _) = evaluate(&wide, None, Utc::now(), OrderKind::Sell, &cfg());
        assert!(matches!(verdict, Verdict::Skip(_)));
    }

    #[test]
    fn test_thin_depth_is_hard_skip_for_exits() {
        let (verdict, checks) = evaluate(
            &summary(dec!(0.49), dec!(0.51), dec!(5)),
            None,
            Utc::now(),
            OrderKind::Merge,
            &cfg(),
        );
        assert!(!checks.depth_ok);
        assert!(matches!(verdict, Verdict::Skip(r) if r.starts_with("depth_")));
    }

    #[test]
    fn test_one_sided_book_skips() {
        let empty = BookSummary {
            best_bid: Some((dec!(0.5), dec!(10))),
            best_ask: None,
            bid_depth_usd: dec!(5),
            ask_depth_usd: Decimal::ZERO,
        };
        let (verdict, _) = evaluate(&empty, None, Utc::now(), OrderKind::Buy, &cfg());
        assert_eq!(verdict, Verdict::Skip("order_book_one_sided".to_string()));
    }
}
