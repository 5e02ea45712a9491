//! Environment-driven configuration.
//!
//! Safety-critical knobs carry non-overridable caps and floors; values
//! outside the allowed range are clamped at load time and logged.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sizing mode for copy trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// `base = leader_usdc * copy_percent`
    Percentage,
    /// `base = fixed_amount` regardless of leader size
    Fixed,
    /// `base = leader_usdc * f(leader_usdc)` with a piecewise-linear schedule
    Adaptive,
}

/// One point of the adaptive schedule: at `usdc` leader notional, scale by
/// `factor`. Interpolated linearly between points, clamped at the ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePoint {
    pub usdc: Decimal,
    pub factor: Decimal,
}

/// One multiplier tier: applies to leader trades of at least `min_usdc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeTier {
    pub min_usdc: Decimal,
    pub multiplier: Decimal,
}

/// Sizing strategy, parsed from the `COPY_STRATEGY_CONFIG` JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategyConfig {
    pub mode: SizingMode,
    pub copy_percent: Decimal,
    pub fixed_amount: Decimal,
    pub adaptive_schedule: Vec<SchedulePoint>,
    /// Single multiplier applied when `tiers` is empty.
    pub multiplier: Decimal,
    /// Tiered multipliers keyed by leader trade size; highest matching tier wins.
    pub tiers: Vec<SizeTier>,
    pub max_order_size: Decimal,
    /// Position value in one market may not exceed this fraction of equity.
    pub max_position_fraction: Decimal,
    pub min_order_size_usd: Decimal,
    pub min_order_size_tokens: Decimal,
    /// Fallback sell fraction when no tracked purchases exist.
    pub sell_ratio: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: SizingMode::Percentage,
            copy_percent: dec!(0.1),
            fixed_amount: dec!(10),
            adaptive_schedule: Vec::new(),
            multiplier: Decimal::ONE,
            tiers: Vec::new(),
            max_order_size: dec!(250),
            max_position_fraction: dec!(0.25),
            min_order_size_usd: dec!(1.0),
            min_order_size_tokens: dec!(1.0),
            sell_ratio: dec!(1.0),
        }
    }
}

impl StrategyConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid COPY_STRATEGY_CONFIG")
    }
}

/// Market viability thresholds. Hard caps are applied by `clamped`.
#[derive(Debug, Clone)]
pub struct ViabilityConfig {
    /// A best bid at or above this (or ask at or below 1 - this) means resolved.
    pub price_limit: Decimal,
    pub min_time_before_end_minutes: i64,
    pub max_spread_bps: Decimal,
    pub min_depth_usd: Decimal,
}

impl Default for ViabilityConfig {
    fn default() -> Self {
        Self {
            price_limit: dec!(0.95),
            min_time_before_end_minutes: 60,
            max_spread_bps: dec!(500),
            min_depth_usd: dec!(10),
        }
    }
}

impl ViabilityConfig {
    /// Enforce the non-overridable caps: `price_limit <= 0.95`,
    /// `min_time >= 5`, `max_spread <= 2000`, `min_depth >= 0.50`.
    pub fn clamped(mut self) -> Self {
        if self.price_limit > dec!(0.95) {
            warn!(configured = %self.price_limit, "VIABILITY_PRICE_LIMIT clamped to 0.95");
            self.price_limit = dec!(0.95);
        }
        if self.min_time_before_end_minutes < 5 {
            warn!(
                configured = self.min_time_before_end_minutes,
                "VIABILITY_MIN_TIME_BEFORE_END_MINUTES clamped to 5"
            );
            self.min_time_before_end_minutes = 5;
        }
        if self.max_spread_bps > dec!(2000) {
            warn!(configured = %self.max_spread_bps, "VIABILITY_MAX_SPREAD_BPS clamped to 2000");
            self.max_spread_bps = dec!(2000);
        }
        if self.min_depth_usd < dec!(0.50) {
            warn!(configured = %self.min_depth_usd, "VIABILITY_MIN_DEPTH_USD clamped to 0.50");
            self.min_depth_usd = dec!(0.50);
        }
        self
    }
}

/// Edge filters: cheap vetoes on low-expectancy copy trades.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub min_position_delta_usd: Decimal,
    pub require_position_for_sell: bool,
    /// Sells mirroring less than this percent of the leader position are skipped.
    pub min_trade_percent_of_position: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_position_delta_usd: dec!(1.0),
            require_position_for_sell: true,
            min_trade_percent_of_position: dec!(2.0),
        }
    }
}

impl EdgeConfig {
    /// Enforce hard floors: `min_position_delta >= 0.50`, `min_trade_percent >= 1.0`.
    pub fn clamped(mut self) -> Self {
        if self.min_position_delta_usd < dec!(0.50) {
            warn!(configured = %self.min_position_delta_usd, "EDGE_MIN_POSITION_DELTA_USD clamped to 0.50");
            self.min_position_delta_usd = dec!(0.50);
        }
        if self.min_trade_percent_of_position < dec!(1.0) {
            warn!(configured = %self.min_trade_percent_of_position, "EDGE_MIN_TRADE_PERCENT_OF_POSITION clamped to 1.0");
            self.min_trade_percent_of_position = dec!(1.0);
        }
        self
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Leader addresses to copy.
    pub leader_addresses: Vec<String>,
    /// Follower proxy wallet holding the funds.
    pub proxy_wallet: String,
    /// Follower signing key.
    pub private_key: String,

    pub database_url: String,
    pub activity_host: String,
    pub data_host: String,
    pub clob_host: String,
    pub chain_id: u64,

    /// Detector polling cadence in seconds.
    pub fetch_interval_secs: u64,
    pub executor_interval_ms: u64,
    pub reconcile_interval_secs: u64,
    pub batch_size: i64,

    /// Freshness window for copying a leader trade.
    pub too_old_timestamp_hours: i64,
    /// Max sub-order retries per record.
    pub retry_limit: u32,
    /// Slippage cap in basis points; hard cap 1000.
    pub max_slippage_bps: Decimal,
    pub lease_timeout_ms: i64,
    pub dry_run: bool,

    pub strategy: StrategyConfig,
    pub viability: ViabilityConfig,
    pub edge: EdgeConfig,
}

impl Config {
    /// Load from environment. Safety caps are clamped, not rejected.
    pub fn from_env() -> Result<Self> {
        let leader_addresses = parse_addresses(
            &std::env::var("USER_ADDRESSES").context("USER_ADDRESSES not set")?,
        );
        if leader_addresses.is_empty() {
            anyhow::bail!("USER_ADDRESSES contains no leader addresses");
        }

        let proxy_wallet = std::env::var("PROXY_WALLET").context("PROXY_WALLET not set")?;
        let private_key = std::env::var("PRIVATE_KEY").context("PRIVATE_KEY not set")?;

        let strategy = match std::env::var("COPY_STRATEGY_CONFIG") {
            Ok(raw) => StrategyConfig::from_json(&raw)?,
            Err(_) => StrategyConfig::default(),
        };

        let viability = ViabilityConfig {
            price_limit: env_decimal("VIABILITY_PRICE_LIMIT", dec!(0.95)),
            min_time_before_end_minutes: env_parse("VIABILITY_MIN_TIME_BEFORE_END_MINUTES", 60),
            max_spread_bps: env_decimal("VIABILITY_MAX_SPREAD_BPS", dec!(500)),
            min_depth_usd: env_decimal("VIABILITY_MIN_DEPTH_USD", dec!(10)),
        }
        .clamped();

        let edge = EdgeConfig {
            min_position_delta_usd: env_decimal("EDGE_MIN_POSITION_DELTA_USD", dec!(1.0)),
            require_position_for_sell: env_bool("EDGE_REQUIRE_POSITION_FOR_SELL", true),
            min_trade_percent_of_position: env_decimal(
                "EDGE_MIN_TRADE_PERCENT_OF_POSITION",
                dec!(2.0),
            ),
        }
        .clamped();

        Ok(Self {
            leader_addresses,
            proxy_wallet,
            private_key,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:polymirror.db?mode=rwc".to_string()),
            activity_host: std::env::var("ACTIVITY_HOST")
                .unwrap_or_else(|_| "https://data-api.polymarket.com".to_string()),
            data_host: std::env::var("DATA_HOST")
                .unwrap_or_else(|_| "https://data-api.polymarket.com".to_string()),
            clob_host: std::env::var("CLOB_HOST")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
            chain_id: env_parse("CHAIN_ID", 137),
            fetch_interval_secs: env_parse("FETCH_INTERVAL", 30),
            executor_interval_ms: env_parse("EXECUTOR_INTERVAL_MS", 300),
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 300),
            batch_size: env_parse("BATCH_SIZE", 10),
            too_old_timestamp_hours: env_parse("TOO_OLD_TIMESTAMP_HOURS", 24),
            retry_limit: env_parse("RETRY_LIMIT", 3),
            max_slippage_bps: clamp_slippage(env_decimal("MAX_SLIPPAGE_BPS", dec!(500))),
            lease_timeout_ms: env_parse("LEASE_TIMEOUT_MS", 30_000),
            dry_run: env_bool("DRY_RUN", false),
            strategy,
            viability,
            edge,
        })
    }
}

/// `MAX_SLIPPAGE_BPS` carries a hard cap of 1000.
pub fn clamp_slippage(configured: Decimal) -> Decimal {
    if configured > dec!(1000) {
        warn!(configured = %configured, "MAX_SLIPPAGE_BPS clamped to 1000");
        return dec!(1000);
    }
    configured
}

/// Split a comma-separated address list, dropping empty segments.
pub fn parse_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        let addrs = parse_addresses("0xabc, 0xdef,,0x123 ");
        assert_eq!(addrs, vec!["0xabc", "0xdef", "0x123"]);
        assert!(parse_addresses("").is_empty());
    }

    #[test]
    fn test_viability_clamps() {
        let v = ViabilityConfig {
            price_limit: dec!(0.99),
            min_time_before_end_minutes: 1,
            max_spread_bps: dec!(5000),
            min_depth_usd: dec!(0.10),
        }
        .clamped();

        assert_eq!(v.price_limit, dec!(0.95));
        assert_eq!(v.min_time_before_end_minutes, 5);
        assert_eq!(v.max_spread_bps, dec!(2000));
        assert_eq!(v.min_depth_usd, dec!(0.50));
    }

    #[test]
    fn test_viability_within_caps_untouched() {
        let v = ViabilityConfig {
            price_limit: dec!(0.90),
            min_time_before_end_minutes: 60,
            max_spread_bps: dec!(300),
            min_depth_usd: dec!(25),
        }
        .clamped();

        assert_eq!(v.price_limit, dec!(0.90));
        assert_eq!(v.min_time_before_end_minutes, 60);
        assert_eq!(v.max_spread_bps, dec!(300));
        assert_eq!(v.min_depth_usd, dec!(25));
    }

    #[test]
    fn test_edge_floors() {
        let e = EdgeConfig {
            min_position_delta_usd: dec!(0.01),
            require_position_for_sell: false,
            min_trade_percent_of_position: dec!(0.1),
        }
        .clamped();

        assert_eq!(e.min_position_delta_usd, dec!(0.50));
        assert_eq!(e.min_trade_percent_of_position, dec!(1.0));
        assert!(!e.require_position_for_sell);
    }

    #[test]
    fn test_slippage_cap() {
        assert_eq!(clamp_slippage(dec!(1500)), dec!(1000));
        assert_eq!(clamp_slippage(dec!(1000)), dec!(1000));
        assert_eq!(clamp_slippage(dec!(200)), dec!(200));
    }

    #[test]
    fn test_strategy_config_json() {
        let raw = r#"{
            "mode": "percentage",
            "copyPercent": "0.2",
            "multiplier": "1.5",
            "tiers": [
                {"minUsdc": "0", "multiplier": "1.0"},
                {"minUsdc": "500", "multiplier": "0.5"}
            ],
            "maxOrderSize": "100"
        }"#;

        let cfg = StrategyConfig::from_json(raw).unwrap();
        assert_eq!(cfg.mode, SizingMode::Percentage);
        assert_eq!(cfg.copy_percent, dec!(0.2));
        assert_eq!(cfg.tiers.len(), 2);
        assert_eq!(cfg.max_order_size, dec!(100));
        // Defaults fill what the blob omits
        assert_eq!(cfg.min_order_size_usd, dec!(1.0));
    }

    #[test]
    fn test_strategy_config_rejects_garbage() {
        assert!(StrategyConfig::from_json("{not json").is_err());
        assert!(StrategyConfig::from_json(r#"{"mode": "martingale"}"#).is_err());
    }
}
