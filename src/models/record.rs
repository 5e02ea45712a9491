//! Trade record model: one row per observed leader trade, carrying the
//! full replication lifecycle from detection through reconciliation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a leader trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// How the executor will act on a record: a straight copy of the leader's
/// side, or a merge (close a losing outcome at the best bid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Buy,
    Sell,
    Merge,
}

impl OrderKind {
    /// Merge executes through the sell path.
    pub fn is_exit(&self) -> bool {
        matches!(self, OrderKind::Sell | OrderKind::Merge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Buy => "BUY",
            OrderKind::Sell => "SELL",
            OrderKind::Merge => "MERGE",
        }
    }
}

/// Lifecycle state of a trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Detected,
    Claimed,
    Executing,
    Executed,
    Skipped,
    Failed,
    Reconciled,
}

impl TradeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeState::Detected => "detected",
            TradeState::Claimed => "claimed",
            TradeState::Executing => "executing",
            TradeState::Executed => "executed",
            TradeState::Skipped => "skipped",
            TradeState::Failed => "failed",
            TradeState::Reconciled => "reconciled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(TradeState::Detected),
            "claimed" => Some(TradeState::Claimed),
            "executing" => Some(TradeState::Executing),
            "executed" => Some(TradeState::Executed),
            "skipped" => Some(TradeState::Skipped),
            "failed" => Some(TradeState::Failed),
            "reconciled" => Some(TradeState::Reconciled),
            _ => None,
        }
    }

    /// Terminal states never cause a fresh order placement.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Executed | TradeState::Skipped | TradeState::Reconciled
        )
    }

    /// Legal lifecycle transitions. `claimed -> detected` is lease-expiry
    /// recovery; `failed -> claimed` is retry re-entry.
    pub fn can_transition(&self, to: TradeState) -> bool {
        use TradeState::*;
        matches!(
            (self, to),
            (Detected, Claimed)
                | (Claimed, Executing)
                | (Claimed, Detected)
                | (Executing, Executed)
                | (Executing, Skipped)
                | (Executing, Failed)
                | (Claimed, Skipped)
                | (Claimed, Failed)
                | (Executed, Reconciled)
                | (Failed, Claimed)
        )
    }
}

/// Persisted trade record. Flat row with nullable columns; fields past the
/// lease block are populated as the record advances through its lifecycle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub leader_address: String,
    pub transaction_hash: String,
    pub token_id: String,
    pub condition_id: String,
    /// Leader trade time, seconds since epoch.
    pub ts: i64,

    // Leader action
    pub side: String,
    pub activity_type: String,
    pub size: f64,
    pub usdc_size: f64,
    pub price: f64,

    // Market metadata
    pub title: String,
    pub slug: String,
    pub outcome: String,
    pub outcome_index: i64,
    pub end_date: Option<String>,

    // Lifecycle
    pub state: String,
    pub retry_count: i64,
    pub retryable: bool,
    pub last_retry_at: Option<i64>,
    pub skip_reason: Option<String>,
    pub failure_reason: Option<String>,

    // Lease
    pub claimed_by: Option<String>,
    /// Epoch milliseconds.
    pub lease_expires_at: Option<i64>,
    pub claimed_at: Option<i64>,

    // Idempotency
    pub idempotency_key: Option<String>,
    pub clob_order_id: Option<String>,

    // Execution results
    pub intended_size: Option<f64>,
    pub filled_size: Option<f64>,
    pub actual_tokens: Option<f64>,
    pub avg_fill_price: Option<f64>,
    pub expected_tokens: Option<f64>,
    pub executed_at: Option<i64>,
    pub needs_manual_review: bool,

    // Follower tracking (BUY only, decremented by later sells)
    pub my_bought_size: Option<f64>,
}

impl TradeRecord {
    pub fn lifecycle_state(&self) -> TradeState {
        TradeState::parse(&self.state).unwrap_or(TradeState::Detected)
    }

    pub fn trade_side(&self) -> Option<Side> {
        Side::parse(&self.side)
    }

    /// Merge activities execute through the sell path; everything else
    /// follows the leader's side.
    pub fn order_kind(&self) -> Option<OrderKind> {
        if self.activity_type.eq_ignore_ascii_case("MERGE") {
            return Some(OrderKind::Merge);
        }
        match self.trade_side()? {
            Side::Buy => Some(OrderKind::Buy),
            Side::Sell => Some(OrderKind::Sell),
        }
    }

    pub fn price_decimal(&self) -> Decimal {
        Decimal::try_from(self.price).unwrap_or(Decimal::ZERO)
    }

    pub fn size_decimal(&self) -> Decimal {
        Decimal::try_from(self.size).unwrap_or(Decimal::ZERO)
    }

    pub fn usdc_size_decimal(&self) -> Decimal {
        Decimal::try_from(self.usdc_size).unwrap_or(Decimal::ZERO)
    }

    /// A record whose idempotency key, order id, or terminal state shows a
    /// prior attempt must never cause a fresh order placement.
    pub fn already_attempted(&self) -> bool {
        self.idempotency_key.is_some()
            || self.clob_order_id.is_some()
            || self.lifecycle_state() == TradeState::Executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for s in [
            TradeState::Detected,
            TradeState::Claimed,
            TradeState::Executing,
            TradeState::Executed,
            TradeState::Skipped,
            TradeState::Failed,
            TradeState::Reconciled,
        ] {
            assert_eq!(TradeState::parse(s.as_str()), Some(s));
        }
        assert_eq!(TradeState::parse("bogus"), None);
    }

    #[test]
    fn test_legal_transitions() {
        use TradeState::*;

        assert!(Detected.can_transition(Claimed));
        assert!(Claimed.can_transition(Executing));
        assert!(Claimed.can_transition(Detected)); // lease expiry recovery
        assert!(Executing.can_transition(Executed));
        assert!(Executed.can_transition(Reconciled));
        assert!(Failed.can_transition(Claimed)); // retry re-entry

        // Terminal states never go back to execution.
        assert!(!Executed.can_transition(Claimed));
        assert!(!Skipped.can_transition(Claimed));
        assert!(!Reconciled.can_transition(Executed));
        // Stuck executing records are never auto-reset.
        assert!(!Executing.can_transition(Detected));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TradeState::Executed.is_terminal());
        assert!(TradeState::Skipped.is_terminal());
        assert!(TradeState::Reconciled.is_terminal());
        assert!(!TradeState::Failed.is_terminal());
        assert!(!TradeState::Executing.is_terminal());
    }

    #[test]
    fn test_order_kind_classification() {
        let mut record = sample_record();
        assert_eq!(record.order_kind(), Some(OrderKind::Buy));

        record.side = "SELL".to_string();
        assert_eq!(record.order_kind(), Some(OrderKind::Sell));

        record.activity_type = "MERGE".to_string();
        assert_eq!(record.order_kind(), Some(OrderKind::Merge));
        assert!(record.order_kind().unwrap().is_exit());
    }

    #[test]
    fn test_already_attempted() {
        let mut record = sample_record();
        assert!(!record.already_attempted());

        record.idempotency_key = Some("k".to_string());
        assert!(record.already_attempted());

        record.idempotency_key = None;
        record.clob_order_id = Some("o".to_string());
        assert!(record.already_attempted());

        record.clob_order_id = None;
        record.state = "executed".to_string();
        assert!(record.already_attempted());
    }

    fn sample_record() -> TradeRecord {
        TradeRecord {
            id: 1,
            leader_address: "0xleader".to_string(),
            transaction_hash: "0xabc".to_string(),
            token_id: "123".to_string(),
            condition_id: "0xcond".to_string(),
            ts: 1_700_000_000,
            side: "BUY".to_string(),
            activity_type: "TRADE".to_string(),
            size: 200.0,
            usdc_size: 100.0,
            price: 0.5,
            title: "Test market".to_string(),
            slug: "test-market".to_string(),
            outcome: "Yes".to_string(),
            outcome_index: 0,
            end_date: None,
            state: "detected".to_string(),
            retry_count: 0,
            retryable: true,
            last_retry_at: None,
            skip_reason: None,
            failure_reason: None,
            claimed_by: None,
            lease_expires_at: None,
            claimed_at: None,
            idempotency_key: None,
            clob_order_id: None,
            intended_size: None,
            filled_size: None,
            actual_tokens: None,
            avg_fill_price: None,
            expected_tokens: None,
            executed_at: None,
            needs_manual_review: false,
            my_bought_size: None,
        }
    }
}
