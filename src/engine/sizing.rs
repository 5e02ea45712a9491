//! Sizing rules: translate a leader trade into a follower order amount.
//!
//! BUY amounts are USD notional; SELL amounts are outcome tokens. Caps are
//! applied in a fixed order: hard max, position-value fraction of equity,
//! 99% of available balance, then the minimum-size floor.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::{SizingMode, StrategyConfig};

/// Follower account state needed to size a BUY.
#[derive(Debug, Clone)]
pub struct BuyContext {
    /// USD notional of the leader trade.
    pub leader_usdc: Decimal,
    /// Follower's available USDC balance.
    pub balance: Decimal,
    /// Follower equity: balance plus open position value.
    pub equity: Decimal,
    /// Current value of the follower position in this market.
    pub position_value: Decimal,
}

/// State needed to size a SELL.
#[derive(Debug, Clone)]
pub struct SellContext {
    /// Tokens still attributable to tracked purchases of this asset.
    pub tracked_tokens: Decimal,
    /// Tokens the leader sold in this trade.
    pub leader_trade_tokens: Decimal,
    /// Leader position in this asset after the trade.
    pub leader_position_after: Decimal,
    /// Follower's current position in this asset.
    pub follower_position: Decimal,
}

/// Sizing calculator for copy trades.
pub struct Sizer {
    cfg: StrategyConfig,
}

impl Sizer {
    pub fn new(cfg: StrategyConfig) -> Self {
        Self { cfg }
    }

    /// USD amount for a BUY, or `None` when every cap leaves less than the
    /// minimum order size.
    pub fn buy_size(&self, ctx: &BuyContext) -> Option<Decimal> {
        let base = self.base_amount(ctx.leader_usdc);
        let mut amount = base * self.multiplier_for(ctx.leader_usdc);

        // (a) hard per-order cap
        amount = amount.min(self.cfg.max_order_size);

        // (b) market position value may not exceed the configured fraction of equity
        let capacity = self.cfg.max_position_fraction * ctx.equity - ctx.position_value;
        if capacity <= Decimal::ZERO {
            return None;
        }
        amount = amount.min(capacity);

        // (c) leave dust for fees
        amount = amount.min(ctx.balance * dec!(0.99));

        // (d) minimum order floor
        if amount < self.cfg.min_order_size_usd {
            return None;
        }
        Some(amount)
    }

    /// Token amount for a SELL, or `None` when below the minimum.
    pub fn sell_size(&self, ctx: &SellContext) -> Option<Decimal> {
        if ctx.follower_position <= Decimal::ZERO {
            return None;
        }

        // Leader fully exited: mirror the exit.
        let tokens = if ctx.leader_position_after <= Decimal::ZERO {
            ctx.follower_position
        } else if ctx.tracked_tokens > Decimal::ZERO {
            let leader_before = ctx.leader_position_after + ctx.leader_trade_tokens;
            if leader_before <= Decimal::ZERO {
                return None;
            }
            ctx.tracked_tokens * (ctx.leader_trade_tokens / leader_before)
        } else {
            ctx.follower_position * self.cfg.sell_ratio
        };

        let tokens = tokens.min(ctx.follower_position);
        if tokens < self.cfg.min_order_size_tokens {
            return None;
        }
        Some(tokens)
    }

    /// A merge closes the whole remaining position.
    pub fn merge_size(&self, follower_position: Decimal) -> Option<Decimal> {
        if follower_position < self.cfg.min_order_size_tokens {
            return None;
        }
        Some(follower_position)
    }

    fn base_amount(&self, leader_usdc: Decimal) -> Decimal {
        match self.cfg.mode {
            SizingMode::Percentage => leader_usdc * self.cfg.copy_percent,
            SizingMode::Fixed => self.cfg.fixed_amount,
            SizingMode::Adaptive => leader_usdc * self.adaptive_factor(leader_usdc),
        }
    }

    /// Piecewise-linear interpolation over the adaptive schedule, clamped at
    /// both ends. An empty schedule behaves like a factor of 1.
    fn adaptive_factor(&self, leader_usdc: Decimal) -> Decimal {
        let schedule = &self.cfg.adaptive_schedule;
        let Some(first) = schedule.first() else {
            return Decimal::ONE;
        };
        if leader_usdc <= first.usdc {
            return first.factor;
        }
        for pair in schedule.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if leader_usdc <= hi.usdc {
                let span = hi.usdc - lo.usdc;
                if span.is_zero() {
                    return hi.factor;
                }
                let t = (leader_usdc - lo.usdc) / span;
                return lo.factor + (hi.factor - lo.factor) * t;
            }
        }
        schedule.last().map(|p| p.factor).unwrap_or(Decimal::ONE)
    }

    /// Highest tier whose threshold the leader trade reaches; the flat
    /// multiplier when no tiers are configured.
    fn multiplier_for(&self, leader_usdc: Decimal) -> Decimal {
        self.cfg
            .tiers
            .iter()
            .filter(|t| leader_usdc >= t.min_usdc)
            .max_by(|a, b| a.min_usdc.cmp(&b.min_usdc))
            .map(|t| t.multiplier)
            .unwrap_or(self.cfg.multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulePoint, SizeTier};

    fn percentage_config() -> StrategyConfig {
        StrategyConfig {
            mode: SizingMode::Percentage,
            copy_percent: dec!(0.2),
            multiplier: Decimal::ONE,
            max_order_size: dec!(250),
            max_position_fraction: dec!(0.25),
            min_order_size_usd: dec!(1.0),
            min_order_size_tokens: dec!(1.0),
            sell_ratio: dec!(0.5),
            ..StrategyConfig::default()
        }
    }

    fn buy_ctx(leader_usdc: Decimal) -> BuyContext {
        BuyContext {
            leader_usdc,
            balance: dec!(500),
            equity: dec!(500),
            position_value: Decimal::ZERO,
        }
    }

    #[test]
    fn test_percentage_sizing() {
        let sizer = Sizer::new(percentage_config());
        // Leader trades $100 at copyPercent 0.2 -> $20
        assert_eq!(sizer.buy_size(&buy_ctx(dec!(100))), Some(dec!(20.0)));
    }

    #[test]
    fn test_fixed_sizing_ignores_leader_size() {
        let cfg = StrategyConfig {
            mode: SizingMode::Fixed,
            fixed_amount: dec!(15),
            ..percentage_config()
        };
        let sizer = Sizer::new(cfg);

        assert_eq!(sizer.buy_size(&buy_ctx(dec!(10))), Some(dec!(15)));
        assert_eq!(sizer.buy_size(&buy_ctx(dec!(10000))), Some(dec!(15)));
    }

    #[test]
    fn test_adaptive_interpolation() {
        let cfg = StrategyConfig {
            mode: SizingMode::Adaptive,
            adaptive_schedule: vec![
                SchedulePoint { usdc: dec!(100), factor: dec!(0.2) },
                SchedulePoint { usdc: dec!(1000), factor: dec!(0.05) },
            ],
            max_order_size: dec!(10000),
            ..percentage_config()
        };
        let sizer = Sizer::new(cfg);

        let roomy = |leader| BuyContext {
            leader_usdc: leader,
            balance: dec!(100000),
            equity: dec!(100000),
            position_value: Decimal::ZERO,
        };

        // Below the first point: clamped to 0.2
        assert_eq!(sizer.buy_size(&roomy(dec!(50))), Some(dec!(10.0)));
        // Midpoint of the schedule: factor 0.125
        assert_eq!(sizer.buy_size(&roomy(dec!(550))), Some(dec!(68.750)));
        // Beyond the last point: clamped to 0.05
        assert_eq!(sizer.buy_size(&roomy(dec!(2000))), Some(dec!(100.00)));
    }

    #[test]
    fn test_tiered_multiplier() {
        let cfg = StrategyConfig {
            tiers: vec![
                SizeTier { min_usdc: dec!(0), multiplier: dec!(1.0) },
                SizeTier { min_usdc: dec!(500), multiplier: dec!(0.5) },
            ],
            ..percentage_config()
        };
        let sizer = Sizer::new(cfg);

        // $100 leader trade stays in tier 0: 100 * 0.2 * 1.0
        assert_eq!(sizer.buy_size(&buy_ctx(dec!(100))), Some(dec!(20.0)));
        // $600 leader trade hits the scaled-down tier: 600 * 0.2 * 0.5
        assert_eq!(sizer.buy_size(&buy_ctx(dec!(600))), Some(dec!(60.00)));
    }

    #[test]
    fn test_hard_max_cap() {
        let sizer = Sizer::new(percentage_config());
        let ctx = BuyContext {
            leader_usdc: dec!(10000),
            balance: dec!(100000),
            equity: dec!(100000),
            position_value: Decimal::ZERO,
        };
        // 10000 * 0.2 = 2000, capped at 250
        assert_eq!(sizer.buy_size(&ctx), Some(dec!(250)));
    }

    #[test]
    fn test_position_value_cap() {
        let sizer = Sizer::new(percentage_config());
        let ctx = BuyContext {
            leader_usdc: dec!(500),
            balance: dec!(500),
            equity: dec!(400),
            position_value: dec!(90),
        };
        // 25% of 400 = 100 cap, 90 already held -> 10 left
        assert_eq!(sizer.buy_size(&ctx), Some(dec!(10)));
    }

    #[test]
    fn test_position_cap_exhausted() {
        let sizer = Sizer::new(percentage_config());
        let ctx = BuyContext {
            leader_usdc: dec!(500),
            balance: dec!(500),
            equity: dec!(400),
            position_value: dec!(150),
        };
        assert_eq!(sizer.buy_size(&ctx), None);
    }

    #[test]
    fn test_balance_cap_leaves_dust() {
        let sizer = Sizer::new(percentage_config());
        let ctx = BuyContext {
            leader_usdc: dec!(1000),
            balance: dec!(100),
            equity: dec!(1000),
            position_value: Decimal::ZERO,
        };
        // 1000 * 0.2 = 200, balance cap 99
        assert_eq!(sizer.buy_size(&ctx), Some(dec!(99.00)));
    }

    #[test]
    fn test_minimum_boundary() {
        let sizer = Sizer::new(percentage_config());
        // Exactly at the $1 minimum passes
        assert_eq!(sizer.buy_size(&buy_ctx(dec!(5))), Some(dec!(1.0)));
        // A cent below is rejected
        assert_eq!(sizer.buy_size(&buy_ctx(dec!(4.95))), None);
    }

    #[test]
    fn test_sell_proportional_to_leader_exit() {
        let sizer = Sizer::new(percentage_config());
        // Leader held 100, sold 25 -> follower sells 25% of 40 tracked
        let ctx = SellContext {
            tracked_tokens: dec!(40),
            leader_trade_tokens: dec!(25),
            leader_position_after: dec!(75),
            follower_position: dec!(40),
        };
        assert_eq!(sizer.sell_size(&ctx), Some(dec!(10)));
    }

    #[test]
    fn test_sell_full_exit_when_leader_flat() {
        let sizer = Sizer::new(percentage_config());
        let ctx = SellContext {
            tracked_tokens: dec!(40),
            leader_trade_tokens: dec!(100),
            leader_position_after: Decimal::ZERO,
            follower_position: dec!(40),
        };
        assert_eq!(sizer.sell_size(&ctx), Some(dec!(40)));
    }

    #[test]
    fn test_sell_fallback_ratio_without_tracking() {
        let sizer = Sizer::new(percentage_config());
        let ctx = SellContext {
            tracked_tokens: Decimal::ZERO,
            leader_trade_tokens: dec!(10),
            leader_position_after: dec!(90),
            follower_position: dec!(40),
        };
        // sell_ratio = 0.5 -> 20 tokens
        assert_eq!(sizer.sell_size(&ctx), Some(dec!(20.0)));
    }

    #[test]
    fn test_sell_capped_at_follower_position() {
        let sizer = Sizer::new(percentage_config());
        let ctx = SellContext {
            tracked_tokens: dec!(100),
            leader_trade_tokens: dec!(90),
            leader_position_after: dec!(10),
            follower_position: dec!(30),
        };
        // 100 * 0.9 = 90 tracked share, capped at 30 held
        assert_eq!(sizer.sell_size(&ctx), Some(dec!(30)));
    }

    #[test]
    fn test_sell_rejects_empty_position() {
        let sizer = Sizer::new(percentage_config());
        let ctx = SellContext {
            tracked_tokens: dec!(40),
            leader_trade_tokens: dec!(10),
            leader_position_after: dec!(90),
            follower_position: Decimal::ZERO,
        };
        assert_eq!(sizer.sell_size(&ctx), None);
    }

    #[test]
    fn test_merge_takes_whole_position() {
        let sizer = Sizer::new(percentage_config());
        assert_eq!(sizer.merge_size(dec!(12.5)), Some(dec!(12.5)));
        assert_eq!(sizer.merge_size(dec!(0.5)), None);
    }
}
