//! Reconciliation results: expected-vs-actual position snapshots per token.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// How badly a token's derived position disagrees with the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// A single token whose derived position disagrees with the exchange.
#[derive(Debug, Clone)]
pub struct Discrepancy {
    pub token_id: String,
    pub expected: Decimal,
    pub actual: Decimal,
    pub diff: Decimal,
    /// Percent difference relative to expected; `None` when expected is zero.
    pub pct_diff: Option<Decimal>,
    pub severity: Severity,
    /// False when the follower holds tokens with no executed trade behind them.
    pub known: bool,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationResult {
    pub tokens_checked: usize,
    pub tokens_clean: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationResult {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Tolerance below which expected and actual are considered matching:
/// `max(1% of expected, 0.1 tokens)`.
pub fn tolerance(expected: Decimal) -> Decimal {
    (expected.abs() * dec!(0.01)).max(dec!(0.1))
}

/// Compare one token's derived exposure with the exchange-reported size.
/// Returns `None` when the difference is within tolerance.
pub fn assess(token_id: &str, expected: Decimal, actual: Decimal) -> Option<Discrepancy> {
    let diff = expected - actual;
    if diff.abs() <= tolerance(expected) {
        return None;
    }

    // Holdings with no executed trade behind them are always a warning.
    if expected.is_zero() {
        return Some(Discrepancy {
            token_id: token_id.to_string(),
            expected,
            actual,
            diff,
            pct_diff: None,
            severity: Severity::Warning,
            known: false,
        });
    }

    let pct = diff.abs() / expected.abs() * dec!(100);
    let severity = if pct > dec!(20) {
        Severity::Critical
    } else if pct > dec!(5) {
        Severity::Warning
    } else {
        Severity::Info
    };

    Some(Discrepancy {
        token_id: token_id.to_string(),
        expected,
        actual,
        diff,
        pct_diff: Some(pct),
        severity,
        known: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_tolerance_is_clean() {
        // 1% of 100 = 1.0 tolerance
        assert!(assess("t", dec!(100), dec!(99.5)).is_none());
        assert!(assess("t", dec!(100), dec!(101)).is_none());
        // Small positions fall under the 0.1 token floor
        assert!(assess("t", dec!(0.05), dec!(0)).is_none());
    }

    #[test]
    fn test_severity_bands() {
        let d = assess("t", dec!(100), dec!(97)).unwrap();
        assert_eq!(d.severity, Severity::Info);

        let d = assess("t", dec!(100), dec!(90)).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        let d = assess("t", dec!(100), dec!(70)).unwrap();
        assert_eq!(d.severity, Severity::Critical);
    }

    #[test]
    fn test_unknown_position_is_warning() {
        let d = assess("t", dec!(0), dec!(25)).unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert!(!d.known);
        assert!(d.pct_diff.is_none());
    }
}
