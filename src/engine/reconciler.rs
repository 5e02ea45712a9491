//! Reconciler: verifies that the position derived from executed trades
//! matches what the exchange reports for the follower.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::DataClient;
use crate::config::Config;
use crate::models::{assess, ReconciliationResult, Severity};
use crate::store::Store;

/// Periodic expected-vs-actual position check.
pub struct Reconciler {
    store: Store,
    data: DataClient,
    cfg: Config,
}

impl Reconciler {
    pub fn new(store: Store, data: DataClient, cfg: Config) -> Self {
        Self { store, data, cfg }
    }

    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        let mut tick = interval(Duration::from_secs(self.cfg.reconcile_interval_secs));

        while !shutdown.load(Ordering::SeqCst) {
            tick.tick().await;
            match self.reconcile_once().await {
                Ok(result) => log_result(&result),
                Err(e) => warn!(error = %e, "Reconciliation pass failed"),
            }
        }

        info!("Reconciler stopped");
    }

    /// One full pass. Expected exposure per token is the sum of
    /// `actual_tokens` over executed BUYs minus executed SELLs, across all
    /// leaders, compared against the follower's reported positions. Tokens
    /// that match within tolerance promote their executed records to
    /// `reconciled`.
    pub async fn reconcile_once(&self) -> Result<ReconciliationResult> {
        let mut expected: BTreeMap<String, Decimal> = BTreeMap::new();
        for (token_id, tokens) in self.store.expected_positions().await? {
            expected.insert(
                token_id,
                Decimal::try_from(tokens).unwrap_or(Decimal::ZERO),
            );
        }

        let mut actual: BTreeMap<String, Decimal> = BTreeMap::new();
        for position in self.data.get_positions(&self.cfg.proxy_wallet).await? {
            let size = Decimal::try_from(position.size).unwrap_or(Decimal::ZERO);
            if size > Decimal::ZERO {
                actual.insert(position.asset.clone(), size);
            }
        }

        let mut tokens: Vec<String> = expected.keys().cloned().collect();
        for token in actual.keys() {
            if !expected.contains_key(token) {
                tokens.push(token.clone());
            }
        }

        let mut result = ReconciliationResult {
            tokens_checked: tokens.len(),
            ..Default::default()
        };

        for token in tokens {
            let e = expected.get(&token).copied().unwrap_or(Decimal::ZERO);
            let a = actual.get(&token).copied().unwrap_or(Decimal::ZERO);

            match assess(&token, e, a) {
                Some(discrepancy) => result.discrepancies.push(discrepancy),
                None => {
                    result.tokens_clean += 1;
                    if e > Decimal::ZERO {
                        self.store.mark_reconciled(&token).await?;
                    }
                }
            }
        }

        Ok(result)
    }
}

fn log_result(result: &ReconciliationResult) {
    if result.is_clean() {
        info!(
            checked = result.tokens_checked,
            "Reconciliation clean: derived positions match the exchange"
        );
        return;
    }

    for d in &result.discrepancies {
        match d.severity {
            Severity::Critical => error!(
                token = %d.token_id,
                expected = %d.expected,
                actual = %d.actual,
                pct = ?d.pct_diff,
                "Critical position discrepancy"
            ),
            Severity::Warning if !d.known => warn!(
                token = %d.token_id,
                actual = %d.actual,
                "Follower holds tokens with no executed trade behind them"
            ),
            Severity::Warning => warn!(
                token = %d.token_id,
                expected = %d.expected,
                actual = %d.actual,
                pct = ?d.pct_diff,
                "Position discrepancy"
            ),
            Severity::Info => info!(
                token = %d.token_id,
                expected = %d.expected,
                actual = %d.actual,
                "Minor position discrepancy"
            ),
        }
    }
}
