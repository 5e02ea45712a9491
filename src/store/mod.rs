//! Durable document store for trade records and position snapshots.
//!
//! All cross-worker coordination happens here through single-statement
//! conditional updates; workers in the same process and workers in
//! different processes behave identically. Records from every leader live
//! in one table with a `leader_address` column and a leader-scoped unique
//! natural key on `(leader_address, transaction_hash)`.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::api::types::{ActivityEntry, PositionEntry};
use crate::models::{PositionSnapshot, TradeRecord, TradeState};

/// Store handle; cheap to clone, shares one pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Execution outcome fields written back when an order run completes.
#[derive(Debug, Clone)]
pub struct ExecutionWriteback {
    pub intended_size: f64,
    pub filled_size: f64,
    pub actual_tokens: f64,
    pub avg_fill_price: Option<f64>,
    pub expected_tokens: Option<f64>,
    /// Tokens attributable to this purchase; set for BUYs only.
    pub my_bought_size: Option<f64>,
    pub order_id: Option<String>,
    pub needs_manual_review: bool,
    pub executed_at: i64,
}

impl Store {
    /// Open (or create) the database and run migrations.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database on a single connection, for tests.
    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                leader_address TEXT NOT NULL,
                transaction_hash TEXT NOT NULL,
                token_id TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                side TEXT NOT NULL,
                activity_type TEXT NOT NULL DEFAULT 'TRADE',
                size REAL NOT NULL DEFAULT 0,
                usdc_size REAL NOT NULL DEFAULT 0,
                price REAL NOT NULL DEFAULT 0,
                title TEXT NOT NULL DEFAULT '',
                slug TEXT NOT NULL DEFAULT '',
                outcome TEXT NOT NULL DEFAULT '',
                outcome_index INTEGER NOT NULL DEFAULT 0,
                end_date TEXT,
                state TEXT NOT NULL DEFAULT 'detected',
                retry_count INTEGER NOT NULL DEFAULT 0,
                retryable INTEGER NOT NULL DEFAULT 1,
                last_retry_at INTEGER,
                skip_reason TEXT,
                failure_reason TEXT,
                claimed_by TEXT,
                lease_expires_at INTEGER,
                claimed_at INTEGER,
                idempotency_key TEXT,
                clob_order_id TEXT,
                intended_size REAL,
                filled_size REAL,
                actual_tokens REAL,
                avg_fill_price REAL,
                expected_tokens REAL,
                executed_at INTEGER,
                needs_manual_review INTEGER NOT NULL DEFAULT 0,
                my_bought_size REAL,
                UNIQUE(leader_address, transaction_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_state_claimed ON trade_records(state, claimed_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_token ON trade_records(token_id, condition_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_idempotency \
             ON trade_records(idempotency_key) WHERE idempotency_key IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_snapshots (
                owner_address TEXT NOT NULL,
                token_id TEXT NOT NULL,
                condition_id TEXT NOT NULL DEFAULT '',
                size REAL NOT NULL DEFAULT 0,
                avg_price REAL NOT NULL DEFAULT 0,
                cur_price REAL NOT NULL DEFAULT 0,
                slug TEXT NOT NULL DEFAULT '',
                end_date TEXT,
                redeemable INTEGER NOT NULL DEFAULT 0,
                mergeable INTEGER NOT NULL DEFAULT 0,
                fetched_at INTEGER NOT NULL,
                PRIMARY KEY (owner_address, token_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Detection ====================

    /// Insert an observed activity entry. Returns false when the natural key
    /// `(leader, transaction_hash)` already exists.
    pub async fn insert_activity(
        &self,
        leader: &str,
        entry: &ActivityEntry,
        state: TradeState,
        skip_reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_records (
                leader_address, transaction_hash, token_id, condition_id, ts,
                side, activity_type, size, usdc_size, price,
                title, slug, outcome, outcome_index, end_date,
                state, skip_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(leader_address, transaction_hash) DO NOTHING
            "#,
        )
        .bind(leader)
        .bind(&entry.transaction_hash)
        .bind(&entry.asset)
        .bind(&entry.condition_id)
        .bind(entry.timestamp)
        .bind(&entry.side)
        .bind(&entry.activity_type)
        .bind(entry.size)
        .bind(entry.usdc_size)
        .bind(entry.price)
        .bind(&entry.title)
        .bind(&entry.slug)
        .bind(&entry.outcome)
        .bind(entry.outcome_index)
        .bind(&entry.end_date)
        .bind(state.as_str())
        .bind(skip_reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of records ever stored for a leader, any state.
    pub async fn count_for_leader(&self, leader: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trade_records WHERE leader_address = ?")
                .bind(leader)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ==================== Claiming ====================

    /// Records eligible for processing: freshly detected, or retryable
    /// failures under the retry limit. Oldest leader trades first.
    pub async fn claimable(
        &self,
        leader: &str,
        retry_limit: i64,
        batch: i64,
    ) -> Result<Vec<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>(
            r#"
            SELECT * FROM trade_records
            WHERE leader_address = ?
              AND (state = 'detected'
                   OR (state = 'failed' AND retryable = 1 AND retry_count < ?))
            ORDER BY ts ASC
            LIMIT ?
            "#,
        )
        .bind(leader)
        .bind(retry_limit)
        .bind(batch)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch claimable records")
    }

    pub async fn get(&self, id: i64) -> Result<Option<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trade_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch record")
    }

    /// Compare-and-set lease acquisition. Succeeds when the record is
    /// unclaimed, its previous lease expired (claimed only), or this worker
    /// already holds it.
    pub async fn acquire_lease(
        &self,
        id: i64,
        worker: &str,
        now_ms: i64,
        timeout_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trade_records SET
                claimed_by = ?1,
                lease_expires_at = ?2,
                claimed_at = ?3,
                state = CASE WHEN state IN ('detected', 'failed') THEN 'claimed' ELSE state END
            WHERE id = ?4
              AND (
                    (claimed_by = ?1 AND state IN ('claimed', 'executing'))
                 OR (state IN ('detected', 'failed', 'claimed')
                     AND (claimed_by IS NULL OR claimed_by = ?1 OR lease_expires_at < ?3))
              )
            "#,
        )
        .bind(worker)
        .bind(now_ms + timeout_ms)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a lease held by this worker. No-op for other holders.
    pub async fn release_lease(&self, id: i64, worker: &str) -> Result<()> {
        sqlx::query(
            "UPDATE trade_records SET claimed_by = NULL, lease_expires_at = NULL \
             WHERE id = ? AND claimed_by = ?",
        )
        .bind(id)
        .bind(worker)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Extend a lease this worker still holds.
    pub async fn extend_lease(
        &self,
        id: i64,
        worker: &str,
        now_ms: i64,
        timeout_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trade_records SET lease_expires_at = ? \
             WHERE id = ? AND claimed_by = ? AND state IN ('claimed', 'executing')",
        )
        .bind(now_ms + timeout_ms)
        .bind(id)
        .bind(worker)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Reset stale `claimed` records to `detected` so they become
    /// re-claimable. Returns the number of records recovered. `executing`
    /// records are never touched here: an order may have been accepted
    /// without the writeback completing.
    pub async fn clear_expired(&self, leader: &str, now_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE trade_records SET
                state = 'detected',
                claimed_by = NULL,
                lease_expires_at = NULL,
                claimed_at = NULL
            WHERE leader_address = ?
              AND state = 'claimed'
              AND (claimed_by IS NULL OR lease_expires_at IS NULL OR lease_expires_at < ?)
            "#,
        )
        .bind(leader)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Records stuck in `executing` with an expired lease; surfaced for
    /// operator inspection, never auto-reset.
    pub async fn stuck_records(&self, now_ms: i64) -> Result<Vec<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trade_records \
             WHERE state = 'executing' AND (lease_expires_at IS NULL OR lease_expires_at < ?) \
             ORDER BY ts ASC",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch stuck records")
    }

    /// Drop every lease held by this worker (clean shutdown).
    pub async fn release_all(&self, worker: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trade_records SET claimed_by = NULL, lease_expires_at = NULL \
             WHERE claimed_by = ?",
        )
        .bind(worker)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ==================== Idempotency ====================

    /// Atomically stamp the idempotency key and move to `executing`, only if
    /// no key was ever assigned. Exactly one worker wins per record.
    pub async fn reserve_idempotency(&self, id: i64, key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trade_records SET idempotency_key = ?, state = 'executing' \
             WHERE id = ? AND idempotency_key IS NULL AND state = 'claimed'",
        )
        .bind(key)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist the exchange order id as soon as a sub-order is accepted, so a
    /// crash before final writeback still leaves evidence of execution.
    pub async fn record_order_id(&self, id: i64, order_id: &str) -> Result<()> {
        sqlx::query("UPDATE trade_records SET clob_order_id = ? WHERE id = ?")
            .bind(order_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Outcome writeback ====================

    pub async fn mark_executed(&self, id: i64, wb: &ExecutionWriteback) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trade_records SET
                state = 'executed',
                intended_size = ?,
                filled_size = ?,
                actual_tokens = ?,
                avg_fill_price = ?,
                expected_tokens = ?,
                my_bought_size = COALESCE(?, my_bought_size),
                clob_order_id = COALESCE(?, clob_order_id),
                needs_manual_review = ?,
                executed_at = ?,
                failure_reason = NULL
            WHERE id = ?
            "#,
        )
        .bind(wb.intended_size)
        .bind(wb.filled_size)
        .bind(wb.actual_tokens)
        .bind(wb.avg_fill_price)
        .bind(wb.expected_tokens)
        .bind(wb.my_bought_size)
        .bind(&wb.order_id)
        .bind(wb.needs_manual_review)
        .bind(wb.executed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(&self, id: i64, reason: &str) -> Result<()> {
        sqlx::query("UPDATE trade_records SET state = 'skipped', skip_reason = ? WHERE id = ?")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a record failed. Retryable failures count against the retry
    /// budget; non-retryable ones are terminal regardless of the counter.
    /// Partial fills accumulated before the failure are preserved.
    pub async fn mark_failed(
        &self,
        id: i64,
        reason: &str,
        retryable: bool,
        fills: Option<(f64, f64, Option<f64>)>,
        now_ms: i64,
    ) -> Result<()> {
        let (filled_size, actual_tokens, avg_fill_price) = match fills {
            Some((size, tokens, avg)) => (Some(size), Some(tokens), avg),
            None => (None, None, None),
        };

        sqlx::query(
            r#"
            UPDATE trade_records SET
                state = 'failed',
                failure_reason = ?,
                retryable = ?,
                retry_count = retry_count + CASE WHEN ? THEN 1 ELSE 0 END,
                last_retry_at = ?,
                filled_size = COALESCE(?, filled_size),
                actual_tokens = COALESCE(?, actual_tokens),
                avg_fill_price = COALESCE(?, avg_fill_price)
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(retryable)
        .bind(retryable)
        .bind(now_ms)
        .bind(filled_size)
        .bind(actual_tokens)
        .bind(avg_fill_price)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Follower tracking ====================

    /// Executed BUYs of a token that still track bought tokens, oldest first.
    pub async fn executed_buys_with_tracking(&self, token_id: &str) -> Result<Vec<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>(
            r#"
            SELECT * FROM trade_records
            WHERE token_id = ? AND side = 'BUY'
              AND state IN ('executed', 'reconciled')
              AND COALESCE(my_bought_size, 0) > 0
            ORDER BY ts ASC
            "#,
        )
        .bind(token_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch tracked buys")
    }

    /// Total tokens still attributable to tracked purchases of this asset.
    pub async fn tracked_bought_total(&self, token_id: &str) -> Result<f64> {
        let (total,): (f64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(my_bought_size), 0.0) FROM trade_records
            WHERE token_id = ? AND side = 'BUY'
              AND state IN ('executed', 'reconciled')
              AND COALESCE(my_bought_size, 0) > 0
            "#,
        )
        .bind(token_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    pub async fn set_my_bought_size(&self, id: i64, value: f64) -> Result<()> {
        sqlx::query("UPDATE trade_records SET my_bought_size = ? WHERE id = ?")
            .bind(value)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Reconciliation ====================

    /// Long exposure per token derived from executed trades: BUY tokens in,
    /// SELL/MERGE tokens out.
    pub async fn expected_positions(&self) -> Result<Vec<(String, f64)>> {
        sqlx::query_as::<_, (String, f64)>(
            r#"
            SELECT token_id,
                   SUM(CASE WHEN side = 'BUY'
                            THEN COALESCE(actual_tokens, my_bought_size, 0.0)
                            ELSE -COALESCE(actual_tokens, 0.0) END) AS expected
            FROM trade_records
            WHERE state IN ('executed', 'reconciled')
            GROUP BY token_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate expected positions")
    }

    /// Promote a cleanly reconciled token's executed records.
    pub async fn mark_reconciled(&self, token_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE trade_records SET state = 'reconciled' \
             WHERE token_id = ? AND state = 'executed'",
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ==================== Position snapshots ====================

    pub async fn upsert_position(
        &self,
        owner: &str,
        entry: &PositionEntry,
        fetched_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO position_snapshots (
                owner_address, token_id, condition_id, size, avg_price, cur_price,
                slug, end_date, redeemable, mergeable, fetched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_address, token_id) DO UPDATE SET
                size = excluded.size,
                avg_price = excluded.avg_price,
                cur_price = excluded.cur_price,
                slug = excluded.slug,
                end_date = excluded.end_date,
                redeemable = excluded.redeemable,
                mergeable = excluded.mergeable,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(owner)
        .bind(&entry.asset)
        .bind(&entry.condition_id)
        .bind(entry.size)
        .bind(entry.avg_price)
        .bind(entry.cur_price)
        .bind(&entry.slug)
        .bind(&entry.end_date)
        .bind(entry.redeemable)
        .bind(entry.mergeable)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn positions_for(&self, owner: &str) -> Result<Vec<PositionSnapshot>> {
        sqlx::query_as::<_, PositionSnapshot>(
            "SELECT * FROM position_snapshots WHERE owner_address = ? AND size > 0",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch position snapshots")
    }

    // ==================== Admin queries ====================

    pub async fn state_counts(&self) -> Result<Vec<(String, i64)>> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM trade_records GROUP BY state ORDER BY state",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count record states")
    }

    pub async fn needs_review_records(&self) -> Result<Vec<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trade_records WHERE needs_manual_review = 1 ORDER BY ts ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch records flagged for review")
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
