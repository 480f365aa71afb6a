//! Persistence contract for the sync core.
//!
//! The shared relational store is the only coordination medium between
//! instances: lock rows, epoch checkpoints and backfill cursors all live here.
//!
//! - [`JobLockStore`]: atomic lease acquire / release / renew
//! - [`EpochStore`]: checkpoints plus the per-epoch aggregates they gate
//! - [`DelegationStore`]: current-state table, append-only change log, backfill cursors
//! - [`ProposalSnapshotStore`]: stored proposal ledger snapshots for tallying

mod in_memory;
mod postgres;
mod records;

pub use in_memory::InMemorySyncStore;
pub use postgres::PostgresSyncStore;
pub use records::{
    BackfillCursor, DelegationChangeEvent, DelegationState, DrepDelegatorSummary,
    DrepEpochSnapshot, EpochCheckpoint, EpochStep, EpochTotals,
};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use govsync_core::{Epoch, InstanceId, ProposalId, StakeAddress};
use govsync_tally::ProposalLedgerSnapshot;

use crate::jobs::{JobLockState, JobResult};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Unique-constraint or concurrent-update conflict.
    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Connection loss, pool shutdown, constraint violations and other backend failures.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored value could not be decoded into its domain type.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Lease rows, one per job name.
#[async_trait]
pub trait JobLockStore: Send + Sync {
    /// Reclaim an expired lease, then acquire if not running, as one atomic step.
    async fn try_acquire_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    /// Record the outcome and clear `is_running`.
    ///
    /// When another holder has reclaimed and re-acquired the row in the
    /// meantime, the row is left untouched and `false` is returned.
    async fn release_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        result: JobResult,
        items_processed: Option<u64>,
        error_message: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Push `expires_at` to `now + lease` if `holder` still owns a running lease.
    async fn renew_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    async fn lock_state(&self, job_name: &str) -> Result<Option<JobLockState>, StoreError>;
}

/// Epoch checkpoints and the aggregates each step writes.
#[async_trait]
pub trait EpochStore: Send + Sync {
    async fn checkpoint(&self, epoch: Epoch) -> Result<Option<EpochCheckpoint>, StoreError>;

    /// Every stored checkpoint with `from <= epoch <= to`, in one query.
    async fn checkpoints_in_range(
        &self,
        from: Epoch,
        to: Epoch,
    ) -> Result<Vec<EpochCheckpoint>, StoreError>;

    /// Set a step's timestamp. An already-set timestamp is kept.
    async fn mark_step(
        &self,
        epoch: Epoch,
        step: EpochStep,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn upsert_drep_snapshots(&self, rows: &[DrepEpochSnapshot]) -> Result<(), StoreError>;

    async fn drep_snapshots(&self, epoch: Epoch) -> Result<Vec<DrepEpochSnapshot>, StoreError>;

    async fn upsert_totals(&self, totals: &EpochTotals) -> Result<(), StoreError>;

    async fn totals(&self, epoch: Epoch) -> Result<Option<EpochTotals>, StoreError>;

    async fn upsert_delegator_summaries(
        &self,
        rows: &[DrepDelegatorSummary],
    ) -> Result<(), StoreError>;

    async fn delegator_summaries(
        &self,
        epoch: Epoch,
    ) -> Result<Vec<DrepDelegatorSummary>, StoreError>;
}

/// Current delegation state plus its append-only change log.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    async fn delegation_state_count(&self) -> Result<u64, StoreError>;

    /// Point lookups; addresses without state are absent from the map.
    async fn delegation_states(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<HashMap<StakeAddress, DelegationState>, StoreError>;

    /// Append events and upsert states in one transaction.
    async fn apply_changes(
        &self,
        events: &[DelegationChangeEvent],
        states: &[DelegationState],
    ) -> Result<(), StoreError>;

    /// Commit one address's replayed history, its terminal state and the
    /// advanced cursor atomically.
    async fn apply_backfill(
        &self,
        events: &[DelegationChangeEvent],
        state: Option<&DelegationState>,
        cursor: &BackfillCursor,
    ) -> Result<(), StoreError>;

    /// Change log for one address in append order.
    async fn change_events(
        &self,
        address: &StakeAddress,
    ) -> Result<Vec<DelegationChangeEvent>, StoreError>;

    async fn backfill_cursor(&self, job_name: &str) -> Result<Option<BackfillCursor>, StoreError>;

    async fn clear_backfill_cursor(&self, job_name: &str) -> Result<(), StoreError>;

    async fn is_backfill_done(&self, job_name: &str) -> Result<bool, StoreError>;

    async fn mark_backfill_done(
        &self,
        job_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProposalSnapshotStore: Send + Sync {
    async fn proposal_snapshot(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<ProposalLedgerSnapshot>, StoreError>;

    async fn upsert_proposal_snapshot(
        &self,
        snapshot: &ProposalLedgerSnapshot,
    ) -> Result<(), StoreError>;
}

/// Everything the sync core needs from one backing store.
pub trait SyncStore: JobLockStore + EpochStore + DelegationStore + ProposalSnapshotStore {}

impl<T> SyncStore for T where T: JobLockStore + EpochStore + DelegationStore + ProposalSnapshotStore {}
