//! Guarded executor: the single site allowed to submit orders.
//!
//! Every order placement in the crate flows through `GuardedExecutor`,
//! which owns the only `ClobClient` instance. Gates run in a fixed order
//! and short-circuit with no side effects; the idempotency reservation and
//! the fill-or-kill sub-order loop only start once every gate has passed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::api::clob_client::{ClobClient, MarketOrderArgs};
use crate::api::types::is_non_retryable;
use crate::config::{Config, EdgeConfig, ViabilityConfig};
use crate::models::{OrderKind, Side};
use crate::store::{ExecutionWriteback, Store};

use super::lease::{LeaseManager, LeaseStatus};
use super::viability::{self, BookSummary, Verdict};

/// A request to place an order on behalf of the follower.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub kind: OrderKind,
    pub token_id: String,
    /// USD notional for BUY; outcome tokens for SELL and MERGE.
    pub amount: Decimal,
    /// Price the leader traded at; anchors the slippage gate.
    pub trader_price: Option<Decimal>,
    pub end_date: Option<DateTime<Utc>>,
    pub my_position_size: Option<Decimal>,
    pub my_position_value: Option<Decimal>,
    /// Backing trade record; absent for direct (non-copy) orders.
    pub trade_id: Option<i64>,
    pub trade_usdc_size: Option<Decimal>,
    pub trade_timestamp: Option<i64>,
    /// For sells: this trade as a percent of the leader's prior position.
    pub trade_percent_of_position: Option<Decimal>,
    pub market_slug: Option<String>,
}

/// Terminal classification of an order run; exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Executed,
    Skipped,
    Failed,
}

/// Result of a guarded execution.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub outcome: Outcome,
    /// USD filled.
    pub filled_size: Decimal,
    pub filled_tokens: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub expected_tokens: Option<Decimal>,
    pub reason: Option<String>,
    pub retryable: bool,
    pub order_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub needs_review: bool,
}

impl OrderResult {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skipped,
            filled_size: Decimal::ZERO,
            filled_tokens: Decimal::ZERO,
            avg_fill_price: None,
            expected_tokens: None,
            reason: Some(reason.into()),
            retryable: false,
            order_id: None,
            idempotency_key: None,
            needs_review: false,
        }
    }

    fn failed(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            outcome: Outcome::Failed,
            retryable,
            ..Self::skipped(reason)
        }
    }
}

/// Accumulated state of one sub-order loop run.
#[derive(Debug, Default)]
struct RunSummary {
    filled_usd: Decimal,
    filled_tokens: Decimal,
    retries: u32,
    hard_abort: bool,
    slippage_block: Option<String>,
    order_id: Option<String>,
}

/// Guard-relevant slice of the runtime configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub too_old_timestamp_hours: i64,
    pub retry_limit: u32,
    pub max_slippage_bps: Decimal,
    pub min_order_size_usd: Decimal,
    pub min_order_size_tokens: Decimal,
    pub viability: ViabilityConfig,
    pub edge: EdgeConfig,
    pub dry_run: bool,
}

impl From<&Config> for GuardConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            too_old_timestamp_hours: cfg.too_old_timestamp_hours,
            retry_limit: cfg.retry_limit,
            max_slippage_bps: cfg.max_slippage_bps,
            min_order_size_usd: cfg.strategy.min_order_size_usd,
            min_order_size_tokens: cfg.strategy.min_order_size_tokens,
            viability: cfg.viability.clone(),
            edge: cfg.edge.clone(),
            dry_run: cfg.dry_run,
        }
    }
}

/// The sole caller of the exchange's order-placement API.
pub struct GuardedExecutor {
    store: Store,
    lease: LeaseManager,
    clob: ClobClient,
    cfg: GuardConfig,
}

impl GuardedExecutor {
    pub fn new(store: Store, lease: LeaseManager, cfg: &Config) -> Result<Self> {
        let clob = ClobClient::new(
            &cfg.clob_host,
            cfg.chain_id,
            &cfg.private_key,
            &cfg.proxy_wallet,
        )?;
        Ok(Self {
            store,
            lease,
            clob,
            cfg: GuardConfig::from(cfg),
        })
    }

    /// Run every safety gate and, if all pass, the fill-or-kill sub-order
    /// loop. Expected rejections come back as `Skipped`/`Failed` results;
    /// `Err` is reserved for store failures, which leave the record in its
    /// prior state for lease-expiry recovery.
    pub async fn execute(&self, req: &OrderRequest) -> Result<OrderResult> {
        // Gate 1: timestamp freshness. Fail closed on a missing timestamp.
        if req.trade_id.is_some() {
            match req.trade_timestamp {
                None => {
                    return self.finish_skipped(req, "missing_trade_timestamp").await;
                }
                Some(ts) => {
                    let now = Utc::now().timestamp();
                    if !fresh_enough(ts, now, self.cfg.too_old_timestamp_hours) {
                        let age_hours = (now - ts) / 3600;
                        return self
                            .finish_skipped(
                                req,
                                format!(
                                    "trade_{}h_older_than_max_{}h",
                                    age_hours, self.cfg.too_old_timestamp_hours
                                ),
                            )
                            .await;
                    }
                }
            }
        }

        // Gate 2: durable idempotency pre-check.
        let mut lease_acquired_here = false;
        if let Some(id) = req.trade_id {
            let record = self
                .store
                .get(id)
                .await?
                .with_context(|| format!("Trade record {} not found", id))?;
            if record.already_attempted() {
                let mut result = OrderResult::skipped("idempotency_already_executed");
                result.order_id = record.clob_order_id.clone();
                result.idempotency_key = record.idempotency_key.clone();
                return Ok(result);
            }

            // Gate 3: hold the lease before anything with side effects.
            if !matches!(
                self.lease.status(id).await?,
                LeaseStatus::HeldBySelf { .. }
            ) {
                if !self.lease.acquire(id).await? {
                    return Ok(OrderResult::failed("lease_acquisition_failed", true));
                }
                lease_acquired_here = true;
            }
        }

        let result = self.execute_gated(req).await;

        if lease_acquired_here {
            if let Some(id) = req.trade_id {
                let _ = self.lease.release(id).await;
            }
        }

        result
    }

    /// Gates 4-7, idempotency reservation, and the sub-order loop. Runs
    /// with the lease held for copy trades.
    async fn execute_gated(&self, req: &OrderRequest) -> Result<OrderResult> {
        // Gate 4: market viability (fetches the order book).
        let book = match self.clob.get_order_book(&req.token_id).await {
            Ok(book) => book,
            Err(e) => {
                warn!(token = %req.token_id, error = %e, "Order book fetch failed");
                return self
                    .finish_failed(req, "order_book_unavailable", true, None)
                    .await;
            }
        };
        let summary = BookSummary::from_book(&book);
        let (verdict, checks) = viability::evaluate(
            &summary,
            req.end_date,
            Utc::now(),
            req.kind,
            &self.cfg.viability,
        );
        match verdict {
            Verdict::Viable => {}
            Verdict::Skip(reason) => {
                return self.finish_skipped(req, format!("not_viable_{}", reason)).await;
            }
            Verdict::Warn(reason) => {
                warn!(
                    token = %req.token_id,
                    slug = ?req.market_slug,
                    reason = %reason,
                    "Viability warning on exit path; proceeding"
                );
            }
        }
        debug!(
            token = %req.token_id,
            spread_bps = ?checks.spread_bps,
            depth = %checks.relevant_depth_usd,
            "Viability checks passed"
        );

        // Gate 5: edge filters for copy trades.
        if let Some(reason) = edge_verdict(req, &self.cfg.edge) {
            return self.finish_skipped(req, reason).await;
        }

        // Gate 6: exits need a position to exit.
        if req.kind.is_exit() && req.my_position_size.unwrap_or_default() <= Decimal::ZERO {
            return self.finish_skipped(req, "no_position_to_sell").await;
        }

        // Gate 7: minimum sizes.
        match req.kind {
            OrderKind::Buy if req.amount < self.cfg.min_order_size_usd => {
                return self.finish_skipped(req, "below_min_order_size_usd").await;
            }
            OrderKind::Sell | OrderKind::Merge
                if req.amount < self.cfg.min_order_size_tokens =>
            {
                return self.finish_skipped(req, "below_min_order_size_tokens").await;
            }
            _ => {}
        }

        if self.cfg.dry_run {
            info!(
                token = %req.token_id,
                kind = req.kind.as_str(),
                amount = %req.amount,
                "[DRY RUN] All gates passed; order not submitted"
            );
            return self.finish_skipped(req, "dry_run").await;
        }

        // Idempotency reservation: exactly one worker ever reaches the
        // sub-order loop for a record.
        let mut idempotency_key = None;
        if let Some(id) = req.trade_id {
            let key = format!(
                "{}:{}:{}:{}",
                id,
                req.kind.as_str(),
                &req.token_id[..req.token_id.len().min(12)],
                uuid::Uuid::new_v4()
            );
            if !self.store.reserve_idempotency(id, &key).await? {
                // Another worker holds the reservation; leave its state alone.
                return Ok(OrderResult::skipped("idempotency_in_progress"));
            }
            idempotency_key = Some(key);
        }

        let run = self.sub_order_loop(req).await?;
        let mut result = classify_run(req, &run, &self.cfg);
        result.idempotency_key = idempotency_key;

        self.write_back(req, &result).await?;
        Ok(result)
    }

    /// Fill-or-kill sub-orders against the best level until the remainder
    /// drops below the minimum or a stop condition fires.
    async fn sub_order_loop(&self, req: &OrderRequest) -> Result<RunSummary> {
        let mut run = RunSummary::default();
        let mut remaining = req.amount;
        let min_remaining = match req.kind {
            OrderKind::Buy => self.cfg.min_order_size_usd,
            _ => self.cfg.min_order_size_tokens,
        };
        let side = match req.kind {
            OrderKind::Buy => Side::Buy,
            _ => Side::Sell,
        };

        while remaining >= min_remaining && run.retries < self.cfg.retry_limit {
            let book = match self.clob.get_order_book(&req.token_id).await {
                Ok(book) => book,
                Err(e) => {
                    warn!(token = %req.token_id, error = %e, "Book fetch failed mid-loop");
                    run.retries += 1;
                    continue;
                }
            };

            let level = match req.kind {
                OrderKind::Buy => book.best_ask(),
                _ => book.best_bid(),
            };
            let Some((price, level_size)) = level else {
                break; // book empty on the relevant side
            };

            if let Some(trader_price) = req.trader_price {
                if let Some(bps) = slippage_bps(price, trader_price, req.kind) {
                    if bps > self.cfg.max_slippage_bps {
                        run.slippage_block = Some(format!(
                            "slippage_{}bps_exceeds_max_{}bps",
                            bps.round(),
                            self.cfg.max_slippage_bps.round()
                        ));
                        break;
                    }
                }
            }

            let (chunk_usd, chunk_tokens) = match req.kind {
                OrderKind::Buy => buy_chunk(remaining, price, level_size),
                _ => {
                    let tokens = floor_tokens(remaining.min(level_size));
                    (tokens * price, tokens)
                }
            };
            if chunk_tokens <= Decimal::ZERO {
                break;
            }

            let args = MarketOrderArgs {
                token_id: req.token_id.clone(),
                side,
                size: chunk_tokens,
                price,
            };
            let response = match self.clob.create_market_order(&args).await {
                Ok(signed) => match self.clob.post_order(&signed).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        warn!(token = %req.token_id, error = %e, "Order submission failed");
                        run.retries += 1;
                        continue;
                    }
                },
                Err(e) => {
                    warn!(token = %req.token_id, error = %e, "Order signing failed");
                    run.retries += 1;
                    continue;
                }
            };

            if response.success {
                if let Some(order_id) = &response.order_id {
                    run.order_id = Some(order_id.clone());
                    if let Some(id) = req.trade_id {
                        self.store.record_order_id(id, order_id).await?;
                    }
                }
                run.filled_tokens += chunk_tokens;
                run.filled_usd += chunk_usd;
                remaining -= match req.kind {
                    OrderKind::Buy => chunk_usd,
                    _ => chunk_tokens,
                };
                run.retries = 0;
                debug!(
                    token = %req.token_id,
                    filled_tokens = %run.filled_tokens,
                    remaining = %remaining,
                    "Sub-order filled"
                );
            } else {
                let message = response.error_message();
                if is_non_retryable(message) {
                    warn!(token = %req.token_id, error = %message, "Non-retryable exchange error");
                    run.hard_abort = true;
                    break;
                }
                warn!(token = %req.token_id, error = %message, "Sub-order rejected; retrying");
                run.retries += 1;
            }
        }

        Ok(run)
    }

    /// Persist the classified outcome onto the backing record.
    async fn write_back(&self, req: &OrderRequest, result: &OrderResult) -> Result<()> {
        let Some(id) = req.trade_id else {
            return Ok(());
        };

        match result.outcome {
            Outcome::Executed => {
                let wb = ExecutionWriteback {
                    intended_size: decimal_to_f64(req.amount),
                    filled_size: decimal_to_f64(result.filled_size),
                    actual_tokens: decimal_to_f64(result.filled_tokens),
                    avg_fill_price: result.avg_fill_price.map(decimal_to_f64),
                    expected_tokens: result.expected_tokens.map(decimal_to_f64),
                    my_bought_size: (req.kind == OrderKind::Buy)
                        .then(|| decimal_to_f64(result.filled_tokens)),
                    order_id: result.order_id.clone(),
                    needs_manual_review: result.needs_review,
                    executed_at: Utc::now().timestamp(),
                };
                self.store.mark_executed(id, &wb).await
            }
            Outcome::Skipped => {
                self.store
                    .mark_skipped(id, result.reason.as_deref().unwrap_or("skipped"))
                    .await
            }
            Outcome::Failed => {
                let fills = (result.filled_tokens > Decimal::ZERO).then(|| {
                    (
                        decimal_to_f64(result.filled_size),
                        decimal_to_f64(result.filled_tokens),
                        result.avg_fill_price.map(decimal_to_f64),
                    )
                });
                self.store
                    .mark_failed(
                        id,
                        result.reason.as_deref().unwrap_or("failed"),
                        result.retryable,
                        fills,
                        super::lease::now_ms(),
                    )
                    .await
            }
        }
    }

    async fn finish_skipped(
        &self,
        req: &OrderRequest,
        reason: impl Into<String>,
    ) -> Result<OrderResult> {
        let result = OrderResult::skipped(reason);
        self.write_back(req, &result).await?;
        info!(
            token = %req.token_id,
            kind = req.kind.as_str(),
            reason = ?result.reason,
            "Order skipped"
        );
        Ok(result)
    }

    async fn finish_failed(
        &self,
        req: &OrderRequest,
        reason: impl Into<String>,
        retryable: bool,
        fills: Option<(Decimal, Decimal)>,
    ) -> Result<OrderResult> {
        let mut result = OrderResult::failed(reason, retryable);
        if let Some((usd, tokens)) = fills {
            result.filled_size = usd;
            result.filled_tokens = tokens;
        }
        self.write_back(req, &result).await?;
        Ok(result)
    }
}

/// A trade at exactly `now - hours` is still fresh; one second older is not.
pub fn fresh_enough(trade_ts: i64, now_ts: i64, hours: i64) -> bool {
    trade_ts >= now_ts - hours * 3600
}

/// Adverse price movement in basis points relative to the leader's price.
/// Negative values mean the quote is favorable.
pub fn slippage_bps(quote: Decimal, trader_price: Decimal, kind: OrderKind) -> Option<Decimal> {
    if trader_price <= Decimal::ZERO {
        return None;
    }
    let adverse = match kind {
        OrderKind::Buy => quote - trader_price,
        OrderKind::Sell | OrderKind::Merge => trader_price - quote,
    };
    Some(adverse / trader_price * dec!(10000))
}

/// Sub-order sizing for a BUY: spend up to the USD resting at the best ask.
/// Token sizes are floored to the exchange's two-decimal granularity.
fn buy_chunk(remaining_usd: Decimal, ask_price: Decimal, ask_size: Decimal) -> (Decimal, Decimal) {
    if ask_price <= Decimal::ZERO {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let level_usd = ask_price * ask_size;
    let chunk_usd = remaining_usd.min(level_usd);
    let tokens = floor_tokens(chunk_usd / ask_price);
    (tokens * ask_price, tokens)
}

fn floor_tokens(tokens: Decimal) -> Decimal {
    tokens.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::ToZero)
}

/// Edge filters: cheap vetoes applied to copy trades with trade context.
fn edge_verdict(req: &OrderRequest, edge: &EdgeConfig) -> Option<String> {
    let delta = req.trade_usdc_size?;

    if delta.abs() < edge.min_position_delta_usd {
        return Some(format!(
            "position_delta_below_min_{}usd",
            edge.min_position_delta_usd
        ));
    }

    if req.kind.is_exit() {
        if edge.require_position_for_sell
            && req.my_position_size.unwrap_or_default() <= Decimal::ZERO
        {
            return Some("sell_without_position".to_string());
        }
        if let Some(pct) = req.trade_percent_of_position {
            if pct < edge.min_trade_percent_of_position {
                return Some(format!(
                    "trade_{}pct_of_position_below_min_{}pct",
                    pct.round_dp(2),
                    edge.min_trade_percent_of_position
                ));
            }
        }
    }

    None
}

/// Classify a finished sub-order run. Precedence: hard abort, retry budget,
/// slippage with nothing filled, then partial or full execution.
fn classify_run(req: &OrderRequest, run: &RunSummary, cfg: &GuardConfig) -> OrderResult {
    if run.hard_abort {
        let mut result = OrderResult::failed("insufficient_funds_or_allowance", false);
        result.filled_size = run.filled_usd;
        result.filled_tokens = run.filled_tokens;
        result.order_id = run.order_id.clone();
        return result;
    }

    if run.retries >= cfg.retry_limit {
        let mut result = OrderResult::failed("max_retries_exceeded", true);
        result.filled_size = run.filled_usd;
        result.filled_tokens = run.filled_tokens;
        result.order_id = run.order_id.clone();
        return result;
    }

    if run.filled_tokens <= Decimal::ZERO {
        if let Some(reason) = &run.slippage_block {
            return OrderResult::skipped(reason.clone());
        }
        return OrderResult::skipped("order_book_exhausted");
    }

    let avg_fill_price = if run.filled_tokens > Decimal::ZERO {
        Some(run.filled_usd / run.filled_tokens)
    } else {
        None
    };

    let expected_tokens = match req.kind {
        OrderKind::Buy => req
            .trader_price
            .filter(|p| *p > Decimal::ZERO)
            .map(|p| req.amount / p),
        _ => Some(req.amount),
    };

    // Fill ratio in intended units: USD for BUY, tokens for exits.
    let filled_intended_units = match req.kind {
        OrderKind::Buy => run.filled_usd,
        _ => run.filled_tokens,
    };
    let ratio = if req.amount > Decimal::ZERO {
        filled_intended_units / req.amount
    } else {
        Decimal::ONE
    };
    let overfilled = filled_intended_units > req.amount + dec!(0.01);
    let needs_review = overfilled || ratio < dec!(0.80) || ratio > dec!(1.20);

    OrderResult {
        outcome: Outcome::Executed,
        filled_size: run.filled_usd,
        filled_tokens: run.filled_tokens,
        avg_fill_price,
        expected_tokens,
        reason: run.slippage_block.clone(),
        retryable: false,
        order_id: run.order_id.clone(),
        idempotency_key: None,
        needs_review,
    }
}

fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_request(amount: Decimal) -> OrderRequest {
        OrderRequest {
            kind: OrderKind::Buy,
            token_id: "token-1".to_string(),
            amount,
            trader_price: Some(dec!(0.50)),
            end_date: None,
            my_position_size: None,
            my_position_value: None,
            trade_id: Some(1),
            trade_usdc_size: Some(dec!(100)),
            trade_timestamp: Some(1_700_000_000),
            trade_percent_of_position: None,
            market_slug: None,
        }
    }

    fn guard_cfg() -> GuardConfig {
        GuardConfig {
            too_old_timestamp_hours: 24,
            retry_limit: 3,
            max_slippage_bps: dec!(500),
            min_order_size_usd: dec!(1),
            min_order_size_tokens: dec!(1),
            viability: ViabilityConfig::default(),
            edge: EdgeConfig::default().clamped(),
            dry_run: false,
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let now = 1_700_000_000;
        let window = 24;
        // Exactly at the window edge passes
        assert!(fresh_enough(now - 24 * 3600, now, window));
        // One second older is rejected
        assert!(!fresh_enough(now - 24 * 3600 - 1, now, window));
    }

    #[test]
    fn test_slippage_bps_buy() {
        // Leader at 0.50, ask at 0.56: 1200 bps adverse
        let bps = slippage_bps(dec!(0.56), dec!(0.50), OrderKind::Buy).unwrap();
        assert_eq!(bps, dec!(1200));

        // Favorable ask comes back negative
        let bps = slippage_bps(dec!(0.48), dec!(0.50), OrderKind::Buy).unwrap();
        assert!(bps < Decimal::ZERO);
    }

    #[test]
    fn test_slippage_bps_sell_symmetric() {
        // Leader sold at 0.50, bid at 0.44: 1200 bps adverse
        let bps = slippage_bps(dec!(0.44), dec!(0.50), OrderKind::Sell).unwrap();
        assert_eq!(bps, dec!(1200));

        assert!(slippage_bps(dec!(0.5), Decimal::ZERO, OrderKind::Buy).is_none());
    }

    #[test]
    fn test_buy_chunk_respects_level_liquidity() {
        // $20 remaining against 200 tokens at 0.50 ($100 resting): full chunk
        let (usd, tokens) = buy_chunk(dec!(20), dec!(0.50), dec!(200));
        assert_eq!(usd, dec!(20));
        assert_eq!(tokens, dec!(40));

        // $80 remaining against only 100 tokens at 0.40 ($40 resting)
        let (usd, tokens) = buy_chunk(dec!(80), dec!(0.40), dec!(100));
        assert_eq!(usd, dec!(40.0));
        assert_eq!(tokens, dec!(100));

        // Uneven division floors tokens to two decimals
        let (usd, tokens) = buy_chunk(dec!(10), dec!(0.30), dec!(1000));
        assert_eq!(tokens, dec!(33.33));
        assert_eq!(usd, dec!(9.999));
    }

    #[test]
    fn test_edge_min_position_delta() {
        let mut req = buy_request(dec!(20));
        req.trade_usdc_size = Some(dec!(0.25));
        let reason = edge_verdict(&req, &guard_cfg().edge).unwrap();
        assert!(reason.starts_with("position_delta_below_min"));

        // No trade context: edge filters do not apply
        req.trade_usdc_size = None;
        assert!(edge_verdict(&req, &guard_cfg().edge).is_none());
    }

    #[test]
    fn test_edge_sell_filters() {
        let mut req = buy_request(dec!(20));
        req.kind = OrderKind::Sell;
        req.my_position_size = Some(Decimal::ZERO);
        assert_eq!(
            edge_verdict(&req, &guard_cfg().edge).as_deref(),
            Some("sell_without_position")
        );

        // Disabled position requirement passes through
        let mut edge = guard_cfg().edge;
        edge.require_position_for_sell = false;
        assert!(edge_verdict(&req, &edge).is_none());

        // Tiny rebalance: 0.5% of the leader position
        req.my_position_size = Some(dec!(40));
        req.trade_percent_of_position = Some(dec!(0.5));
        let reason = edge_verdict(&req, &guard_cfg().edge).unwrap();
        assert!(reason.contains("below_min"));
    }

    #[test]
    fn test_classify_hard_abort() {
        let run = RunSummary {
            hard_abort: true,
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(!result.retryable);
        assert_eq!(
            result.reason.as_deref(),
            Some("insufficient_funds_or_allowance")
        );
    }

    #[test]
    fn test_classify_retry_budget_exhausted() {
        let run = RunSummary {
            retries: 3,
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.retryable);
        assert_eq!(result.reason.as_deref(), Some("max_retries_exceeded"));
    }

    #[test]
    fn test_classify_slippage_with_no_fill_skips() {
        let run = RunSummary {
            slippage_block: Some("slippage_1200bps_exceeds_max_500bps".to_string()),
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Skipped);
        assert_eq!(
            result.reason.as_deref(),
            Some("slippage_1200bps_exceeds_max_500bps")
        );
    }

    #[test]
    fn test_classify_slippage_after_partial_fill_executes() {
        let run = RunSummary {
            filled_usd: dec!(18),
            filled_tokens: dec!(36),
            slippage_block: Some("slippage_600bps_exceeds_max_500bps".to_string()),
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Executed);
        assert_eq!(result.filled_size, dec!(18));
        // 90% fill sits inside the review band
        assert!(!result.needs_review);
    }

    #[test]
    fn test_classify_full_fill() {
        let run = RunSummary {
            filled_usd: dec!(20),
            filled_tokens: dec!(40),
            order_id: Some("0xorder".to_string()),
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Executed);
        assert_eq!(result.avg_fill_price, Some(dec!(0.5)));
        assert_eq!(result.expected_tokens, Some(dec!(40)));
        assert_eq!(result.order_id.as_deref(), Some("0xorder"));
        assert!(!result.needs_review);
    }

    #[test]
    fn test_classify_review_band() {
        // 50% fill falls outside [0.80, 1.20]
        let run = RunSummary {
            filled_usd: dec!(10),
            filled_tokens: dec!(20),
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert!(result.needs_review);

        // Overfill beyond rounding also flags
        let run = RunSummary {
            filled_usd: dec!(20.50),
            filled_tokens: dec!(41),
            ..Default::default()
        };
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert!(result.needs_review);
    }

    #[test]
    fn test_classify_sell_ratio_uses_tokens() {
        let mut req = buy_request(dec!(40));
        req.kind = OrderKind::Sell;
        let run = RunSummary {
            filled_usd: dec!(19.2),
            filled_tokens: dec!(40),
            ..Default::default()
        };
        let result = classify_run(&req, &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Executed);
        assert_eq!(result.expected_tokens, Some(dec!(40)));
        assert!(!result.needs_review);
    }

    #[test]
    fn test_classify_empty_book_with_no_fill() {
        let run = RunSummary::default();
        let result = classify_run(&buy_request(dec!(20)), &run, &guard_cfg());
        assert_eq!(result.outcome, Outcome::Skipped);
        assert_eq!(result.reason.as_deref(), Some("order_book_exhausted"));
    }
}
