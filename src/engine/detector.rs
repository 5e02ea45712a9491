//! Activity detector: polls the leader activity feed and persists new
//! trades, plus leader/follower position snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::types::ActivityEntry;
use crate::api::DataClient;
use crate::config::Config;
use crate::models::{Side, TradeState};
use crate::store::Store;

const ACTIVITY_FETCH_LIMIT: u32 = 200;

/// Long-running feed poller.
pub struct Detector {
    store: Store,
    data: DataClient,
    cfg: Config,
}

impl Detector {
    pub fn new(store: Store, data: DataClient, cfg: Config) -> Self {
        Self { store, data, cfg }
    }

    /// Poll until the shutdown flag is set. A failed tick logs and waits for
    /// the next interval; nothing is persisted from partial reads.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        let mut tick = interval(Duration::from_secs(self.cfg.fetch_interval_secs));

        while !shutdown.load(Ordering::SeqCst) {
            tick.tick().await;

            for leader in &self.cfg.leader_addresses {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = self.poll_leader(leader).await {
                    warn!(leader = %leader, error = %e, "Activity poll failed");
                }
            }

            if let Err(e) = self.refresh_follower_positions().await {
                warn!(error = %e, "Follower position refresh failed");
            }
        }

        info!("Detector stopped");
    }

    /// One poll of one leader: insert unseen fresh trades, refresh the
    /// leader's position snapshots.
    pub async fn poll_leader(&self, leader: &str) -> Result<()> {
        let entries = self.data.get_activity(leader, ACTIVITY_FETCH_LIMIT).await?;

        // A leader with no stored records at all is a cold start: persist
        // the history as skipped so months of past trades are not replayed.
        let first_run = self.store.count_for_leader(leader).await? == 0;
        let now = Utc::now().timestamp();
        let cutoff = now - self.cfg.too_old_timestamp_hours * 3600;

        let mut inserted = 0usize;
        let mut bootstrapped = 0usize;

        // Oldest first so record ids follow trade order.
        let mut entries = entries;
        entries.sort_by_key(|e| e.timestamp);

        for entry in &entries {
            if !relevant(entry) {
                debug!(tx = %entry.transaction_hash, kind = %entry.activity_type, "Ignoring activity entry");
                continue;
            }

            if first_run {
                if self
                    .store
                    .insert_activity(
                        leader,
                        entry,
                        TradeState::Skipped,
                        Some("historical_bootstrap"),
                    )
                    .await?
                {
                    bootstrapped += 1;
                }
                continue;
            }

            if entry.timestamp < cutoff {
                continue;
            }

            if self
                .store
                .insert_activity(leader, entry, TradeState::Detected, None)
                .await?
            {
                inserted += 1;
            }
        }

        if bootstrapped > 0 {
            info!(
                leader = %leader,
                count = bootstrapped,
                "Cold start: bootstrapped historical trades as skipped"
            );
        }
        if inserted > 0 {
            info!(leader = %leader, count = inserted, "Detected new leader trades");
        }

        let positions = self.data.get_positions(leader).await?;
        let fetched_at = Utc::now().timestamp();
        for position in &positions {
            self.store.upsert_position(leader, position, fetched_at).await?;
        }

        Ok(())
    }

    async fn refresh_follower_positions(&self) -> Result<()> {
        let positions = self.data.get_positions(&self.cfg.proxy_wallet).await?;
        let fetched_at = Utc::now().timestamp();
        for position in &positions {
            self.store
                .upsert_position(&self.cfg.proxy_wallet, position, fetched_at)
                .await?;
        }
        Ok(())
    }
}

/// Entries the replication pipeline acts on: trades with a parseable side,
/// and merges.
fn relevant(entry: &ActivityEntry) -> bool {
    if entry.transaction_hash.is_empty() {
        return false;
    }
    if entry.activity_type.eq_ignore_ascii_case("MERGE") {
        return true;
    }
    entry.activity_type.eq_ignore_ascii_case("TRADE") && Side::parse(&entry.side).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tx: &str, activity_type: &str, side: &str) -> ActivityEntry {
        ActivityEntry {
            timestamp: 100,
            condition_id: "0xcond".to_string(),
            size: 10.0,
            usdc_size: 5.0,
            price: 0.5,
            asset: "token-1".to_string(),
            side: side.to_string(),
            transaction_hash: tx.to_string(),
            outcome_index: 0,
            slug: "m".to_string(),
            title: "m".to_string(),
            outcome: "Yes".to_string(),
            end_date: None,
            activity_type: activity_type.to_string(),
        }
    }

    #[test]
    fn test_relevant_entries() {
        assert!(relevant(&entry("0x1", "TRADE", "BUY")));
        assert!(relevant(&entry("0x1", "TRADE", "sell")));
        assert!(relevant(&entry("0x1", "MERGE", "")));

        // Redemptions, splits, and malformed sides are not copy candidates.
        assert!(!relevant(&entry("0x1", "REDEEM", "")));
        assert!(!relevant(&entry("0x1", "TRADE", "HOLD")));
        assert!(!relevant(&entry("", "TRADE", "BUY")));
    }
}
