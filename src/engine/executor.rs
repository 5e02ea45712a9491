//! Trade executor loop: claims unprocessed records, sizes them, and hands
//! them to the guarded executor.
//!
//! Post-execution SELL accounting lives here because it is bookkeeping,
//! not order placement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::types::PositionEntry;
use crate::api::DataClient;
use crate::config::Config;
use crate::models::{OrderKind, TradeRecord};
use crate::store::Store;

use super::guard::{GuardedExecutor, OrderRequest, Outcome};
use super::lease::LeaseManager;
use super::sizing::{BuyContext, SellContext, Sizer};

/// Fresh market context fetched per record before sizing.
struct TradeContext {
    balance: Decimal,
    equity: Decimal,
    my_position_size: Decimal,
    my_position_value: Decimal,
    leader_position_after: Decimal,
}

/// Long-running loop that drains claimable records for every leader.
pub struct ExecutorLoop {
    store: Store,
    data: DataClient,
    guard: GuardedExecutor,
    lease: LeaseManager,
    sizer: Sizer,
    cfg: Config,
}

impl ExecutorLoop {
    pub fn new(
        store: Store,
        data: DataClient,
        guard: GuardedExecutor,
        lease: LeaseManager,
        cfg: Config,
    ) -> Self {
        let sizer = Sizer::new(cfg.strategy.clone());
        Self {
            store,
            data,
            guard,
            lease,
            sizer,
            cfg,
        }
    }

    /// Run until the shutdown flag is set. In-flight records finish their
    /// full claim-execute-writeback-release sequence before the loop exits.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        let mut tick = interval(Duration::from_millis(self.cfg.executor_interval_ms));

        while !shutdown.load(Ordering::SeqCst) {
            tick.tick().await;
            if let Err(e) = self.tick(&shutdown).await {
                warn!(error = %e, "Executor tick failed");
            }
        }

        info!("Executor loop stopped");
    }

    async fn tick(&self, shutdown: &AtomicBool) -> Result<()> {
        for leader in &self.cfg.leader_addresses {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.lease.clear_expired(leader).await {
                warn!(leader = %leader, error = %e, "Lease recovery failed");
            }

            let batch = self
                .store
                .claimable(leader, self.cfg.retry_limit as i64, self.cfg.batch_size)
                .await?;

            for record in batch {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = self.process_record(&record).await {
                    // The record keeps its state; lease expiry makes it
                    // reclaimable, or surfaces it as stuck.
                    warn!(
                        record_id = record.id,
                        tx = %record.transaction_hash,
                        error = %e,
                        "Record processing failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn process_record(&self, record: &TradeRecord) -> Result<()> {
        if !self.lease.acquire(record.id).await? {
            debug!(record_id = record.id, "Lost the claim race");
            return Ok(());
        }

        let Some(kind) = record.order_kind() else {
            self.store.mark_skipped(record.id, "unrecognized_side").await?;
            self.lease.release(record.id).await?;
            return Ok(());
        };

        let ctx = match self.fetch_context(record).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(
                    record_id = record.id,
                    error = %e,
                    "Context fetch failed; releasing for retry"
                );
                self.lease.release(record.id).await?;
                return Ok(());
            }
        };

        if kind.is_exit() && ctx.my_position_size <= Decimal::ZERO {
            self.store.mark_skipped(record.id, "no_position_to_sell").await?;
            self.lease.release(record.id).await?;
            return Ok(());
        }

        let Some(amount) = self.intended_amount(record, kind, &ctx).await? else {
            self.store.mark_skipped(record.id, "sized_below_minimum").await?;
            self.lease.release(record.id).await?;
            return Ok(());
        };

        let request = self.build_request(record, kind, amount, &ctx);
        info!(
            record_id = record.id,
            leader = %record.leader_address,
            market = %record.slug,
            kind = kind.as_str(),
            leader_usd = record.usdc_size,
            amount = %amount,
            "Submitting copy trade to guarded executor"
        );

        let result = self.guard.execute(&request).await?;

        match result.outcome {
            Outcome::Executed => {
                info!(
                    record_id = record.id,
                    filled_size = %result.filled_size,
                    filled_tokens = %result.filled_tokens,
                    avg_price = ?result.avg_fill_price,
                    order_id = ?result.order_id,
                    "Copy trade executed"
                );
                if kind.is_exit() && result.filled_tokens > Decimal::ZERO {
                    self.settle_sell_accounting(&record.token_id, result.filled_tokens)
                        .await?;
                }
            }
            Outcome::Skipped => {
                info!(record_id = record.id, reason = ?result.reason, "Copy trade skipped");
            }
            Outcome::Failed => {
                warn!(
                    record_id = record.id,
                    reason = ?result.reason,
                    retryable = result.retryable,
                    "Copy trade failed"
                );
            }
        }

        self.lease.release(record.id).await?;
        Ok(())
    }

    /// Fresh balance and positions for both sides of the copy.
    async fn fetch_context(&self, record: &TradeRecord) -> Result<TradeContext> {
        let balance = self.data.get_balance(&self.cfg.proxy_wallet).await?;
        let follower_positions = self.data.get_positions(&self.cfg.proxy_wallet).await?;
        let leader_positions = self.data.get_positions(&record.leader_address).await?;

        let (my_position_size, my_position_value, total_value) =
            position_context(&follower_positions, &record.token_id);
        let leader_position_after = leader_positions
            .iter()
            .find(|p| p.asset == record.token_id)
            .and_then(|p| Decimal::try_from(p.size).ok())
            .unwrap_or(Decimal::ZERO);

        Ok(TradeContext {
            balance,
            equity: balance + total_value,
            my_position_size,
            my_position_value,
            leader_position_after,
        })
    }

    async fn intended_amount(
        &self,
        record: &TradeRecord,
        kind: OrderKind,
        ctx: &TradeContext,
    ) -> Result<Option<Decimal>> {
        let amount = match kind {
            OrderKind::Buy => self.sizer.buy_size(&BuyContext {
                leader_usdc: record.usdc_size_decimal(),
                balance: ctx.balance,
                equity: ctx.equity,
                position_value: ctx.my_position_value,
            }),
            OrderKind::Sell => {
                let tracked = self.store.tracked_bought_total(&record.token_id).await?;
                self.sizer.sell_size(&SellContext {
                    tracked_tokens: Decimal::try_from(tracked).unwrap_or(Decimal::ZERO),
                    leader_trade_tokens: record.size_decimal(),
                    leader_position_after: ctx.leader_position_after,
                    follower_position: ctx.my_position_size,
                })
            }
            OrderKind::Merge => self.sizer.merge_size(ctx.my_position_size),
        };
        Ok(amount)
    }

    fn build_request(
        &self,
        record: &TradeRecord,
        kind: OrderKind,
        amount: Decimal,
        ctx: &TradeContext,
    ) -> OrderRequest {
        let trade_percent_of_position = kind.is_exit().then(|| {
            let leader_before = ctx.leader_position_after + record.size_decimal();
            if leader_before > Decimal::ZERO {
                record.size_decimal() / leader_before * dec!(100)
            } else {
                dec!(100)
            }
        });

        OrderRequest {
            kind,
            token_id: record.token_id.clone(),
            amount,
            trader_price: Some(record.price_decimal()),
            end_date: record
                .end_date
                .as_deref()
                .and_then(parse_end_date),
            my_position_size: Some(ctx.my_position_size),
            my_position_value: Some(ctx.my_position_value),
            trade_id: Some(record.id),
            trade_usdc_size: Some(record.usdc_size_decimal()),
            trade_timestamp: Some(record.ts),
            trade_percent_of_position,
            market_slug: Some(record.slug.clone()),
        }
    }

    /// Reduce tracked purchases proportionally to the sell's share of the
    /// total tracked long exposure.
    async fn settle_sell_accounting(&self, token_id: &str, sold_tokens: Decimal) -> Result<()> {
        let buys = self.store.executed_buys_with_tracking(token_id).await?;
        let holdings: Vec<(i64, Decimal)> = buys
            .iter()
            .map(|b| {
                (
                    b.id,
                    Decimal::try_from(b.my_bought_size.unwrap_or(0.0)).unwrap_or(Decimal::ZERO),
                )
            })
            .collect();

        for (id, new_size) in apportion_sell(&holdings, sold_tokens) {
            self.store
                .set_my_bought_size(id, new_size.to_f64().unwrap_or(0.0))
                .await?;
        }
        Ok(())
    }
}

/// Follower's position in a token plus total portfolio value:
/// `(size, value, total_value)`.
fn position_context(positions: &[PositionEntry], token_id: &str) -> (Decimal, Decimal, Decimal) {
    let mut size = Decimal::ZERO;
    let mut value = Decimal::ZERO;
    let mut total = Decimal::ZERO;

    for p in positions {
        let p_size = Decimal::try_from(p.size).unwrap_or(Decimal::ZERO);
        let p_price = Decimal::try_from(p.cur_price).unwrap_or(Decimal::ZERO);
        let p_value = p_size * p_price;
        total += p_value;
        if p.asset == token_id {
            size = p_size;
            value = p_value;
        }
    }

    (size, value, total)
}

/// New `my_bought_size` values after a sell. A sell closing 99% or more of
/// the tracked exposure clears every purchase to zero.
pub fn apportion_sell(holdings: &[(i64, Decimal)], sold: Decimal) -> Vec<(i64, Decimal)> {
    let total: Decimal = holdings.iter().map(|(_, s)| *s).sum();
    if total <= Decimal::ZERO || sold <= Decimal::ZERO {
        return Vec::new();
    }

    let ratio = (sold / total).min(Decimal::ONE);
    if ratio >= dec!(0.99) {
        return holdings.iter().map(|(id, _)| (*id, Decimal::ZERO)).collect();
    }

    holdings
        .iter()
        .map(|(id, size)| (*id, *size * (Decimal::ONE - ratio)))
        .collect()
}

fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
