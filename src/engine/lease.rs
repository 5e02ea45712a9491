//! Lease manager: timed exclusive claims on trade records.
//!
//! All operations delegate to conditional updates in the store, so leases
//! coordinate workers across processes with no in-process locking. Worker
//! ids are process-unique and never persisted beyond the lease columns.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{TradeRecord, TradeState};
use crate::store::Store;

/// Observed lease state of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    /// No live lease; the record is claimable (subject to state).
    Free,
    HeldBySelf { expires_at: i64 },
    HeldByOther { holder: String, expires_at: i64 },
    /// Executing with an expired lease; requires operator attention.
    Stuck,
}

/// Per-worker lease manager.
#[derive(Clone)]
pub struct LeaseManager {
    store: Store,
    worker_id: String,
    timeout_ms: i64,
}

impl LeaseManager {
    pub fn new(store: Store, timeout_ms: i64) -> Self {
        let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
        Self {
            store,
            worker_id,
            timeout_ms,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim a record. Returns false without side effects when another
    /// worker holds a live lease. Re-acquiring a lease this worker already
    /// holds succeeds and refreshes the expiry.
    pub async fn acquire(&self, record_id: i64) -> Result<bool> {
        let acquired = self
            .store
            .acquire_lease(record_id, &self.worker_id, now_ms(), self.timeout_ms)
            .await?;
        if acquired {
            debug!(record_id, worker = %self.worker_id, "Lease acquired");
        }
        Ok(acquired)
    }

    /// Release a lease held by this worker; no-op for other holders.
    pub async fn release(&self, record_id: i64) -> Result<()> {
        self.store.release_lease(record_id, &self.worker_id).await
    }

    /// Push out the expiry of a lease this worker still holds.
    pub async fn extend(&self, record_id: i64) -> Result<bool> {
        self.store
            .extend_lease(record_id, &self.worker_id, now_ms(), self.timeout_ms)
            .await
    }

    /// Current lease state of a record as seen by this worker.
    pub async fn status(&self, record_id: i64) -> Result<LeaseStatus> {
        let Some(record) = self.store.get(record_id).await? else {
            return Ok(LeaseStatus::Free);
        };
        Ok(self.classify(&record))
    }

    fn classify(&self, record: &TradeRecord) -> LeaseStatus {
        let now = now_ms();
        let live = record.lease_expires_at.map(|at| at > now).unwrap_or(false);

        match (&record.claimed_by, live) {
            (Some(holder), true) if *holder == self.worker_id => LeaseStatus::HeldBySelf {
                expires_at: record.lease_expires_at.unwrap_or_default(),
            },
            (Some(holder), true) => LeaseStatus::HeldByOther {
                holder: holder.clone(),
                expires_at: record.lease_expires_at.unwrap_or_default(),
            },
            _ if record.lifecycle_state() == TradeState::Executing => LeaseStatus::Stuck,
            _ => LeaseStatus::Free,
        }
    }

    /// Recover expired claims for a leader: stale `claimed` rows go back to
    /// `detected`; stale `executing` rows are only reported.
    pub async fn clear_expired(&self, leader: &str) -> Result<u64> {
        let now = now_ms();
        let recovered = self.store.clear_expired(leader, now).await?;
        if recovered > 0 {
            warn!(leader = %leader, recovered, "Recovered records with expired leases");
        }

        for record in self.store.stuck_records(now).await? {
            warn!(
                record_id = record.id,
                tx = %record.transaction_hash,
                holder = ?record.claimed_by,
                "Record stuck in executing with expired lease; manual inspection required"
            );
        }

        Ok(recovered)
    }

    /// Drop every lease this worker holds (clean shutdown).
    pub async fn release_all(&self) -> Result<u64> {
        self.store.release_all(&self.worker_id).await
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
