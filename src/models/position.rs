//! Follower/leader position snapshots, a read-through cache of the
//! exchange's positions endpoint.

use rust_decimal::Decimal;

/// Persisted position snapshot for one `(owner, token)` pair.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionSnapshot {
    pub owner_address: String,
    pub token_id: String,
    pub condition_id: String,
    pub size: f64,
    pub avg_price: f64,
    pub cur_price: f64,
    pub slug: String,
    pub end_date: Option<String>,
    pub redeemable: bool,
    pub mergeable: bool,
    /// Epoch seconds of the last refresh.
    pub fetched_at: i64,
}

impl PositionSnapshot {
    pub fn size_decimal(&self) -> Decimal {
        Decimal::try_from(self.size).unwrap_or(Decimal::ZERO)
    }

    /// Current market value in USDC.
    pub fn value_decimal(&self) -> Decimal {
        let size = Decimal::try_from(self.size).unwrap_or(Decimal::ZERO);
        let price = Decimal::try_from(self.cur_price).unwrap_or(Decimal::ZERO);
        size * price
    }
}
