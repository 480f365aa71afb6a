use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use govsync_core::{DelegateId, Epoch, InstanceId, ProposalId, StakeAddress};
use govsync_tally::ProposalLedgerSnapshot;

use super::records::{
    BackfillCursor, DelegationChangeEvent, DelegationState, DrepDelegatorSummary,
    DrepEpochSnapshot, EpochCheckpoint, EpochStep, EpochTotals,
};
use super::{
    DelegationStore, EpochStore, JobLockStore, ProposalSnapshotStore, StoreError,
};
use crate::jobs::{JobLockState, JobResult};

#[derive(Debug, Default)]
struct Inner {
    locks: HashMap<String, JobLockState>,
    checkpoints: BTreeMap<Epoch, EpochCheckpoint>,
    drep_snapshots: BTreeMap<(Epoch, DelegateId), DrepEpochSnapshot>,
    totals: HashMap<Epoch, EpochTotals>,
    delegator_summaries: BTreeMap<(Epoch, DelegateId), DrepDelegatorSummary>,
    delegation_states: HashMap<StakeAddress, DelegationState>,
    change_log: Vec<DelegationChangeEvent>,
    cursors: HashMap<String, BackfillCursor>,
    backfills_done: HashSet<String>,
    proposals: HashMap<ProposalId, ProposalLedgerSnapshot>,
}

/// In-memory sync store.
///
/// Intended for tests/dev. One mutex guards every table, so each trait call is
/// atomic in the same way a single transaction is.
#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    inner: Mutex<Inner>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    /// Length of the whole change log across every address.
    pub fn change_log_len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.change_log.len())
    }
}

impl Inner {
    /// A state without an amount keeps the stored amount.
    fn upsert_state(&mut self, state: &DelegationState) {
        let mut next = state.clone();
        if next.amount.is_none() {
            next.amount = self
                .delegation_states
                .get(&state.stake_address)
                .and_then(|s| s.amount.clone());
        }
        self.delegation_states.insert(next.stake_address.clone(), next);
    }
}

fn lease_end(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| StoreError::Storage(format!("lease out of range: {lease:?}")))
}

#[async_trait]
impl JobLockStore for InMemorySyncStore {
    async fn try_acquire_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let expires_at = lease_end(now, lease)?;
        let mut inner = self.lock()?;
        let row = inner
            .locks
            .entry(job_name.to_string())
            .or_insert_with(|| JobLockState::new(job_name));

        if row.is_expired(now) {
            row.is_running = false;
            row.last_result = Some(JobResult::Expired);
        }
        if row.is_running {
            return Ok(false);
        }

        row.is_running = true;
        row.started_at = Some(now);
        row.expires_at = Some(expires_at);
        row.locked_by = Some(holder.clone());
        Ok(true)
    }

    async fn release_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        result: JobResult,
        items_processed: Option<u64>,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let Some(row) = inner.locks.get_mut(job_name) else {
            return Err(StoreError::NotFound(format!("job lock {job_name}")));
        };
        if row.is_running && !row.is_held_by(holder) {
            return Ok(false);
        }
        row.is_running = false;
        row.last_result = Some(result);
        row.items_processed = items_processed;
        row.error_message = error_message;
        Ok(true)
    }

    async fn renew_lease(
        &self,
        job_name: &str,
        holder: &InstanceId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let expires_at = lease_end(now, lease)?;
        let mut inner = self.lock()?;
        match inner.locks.get_mut(job_name) {
            Some(row) if row.is_held_by(holder) => {
                row.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_state(&self, job_name: &str) -> Result<Option<JobLockState>, StoreError> {
        Ok(self.lock()?.locks.get(job_name).cloned())
    }
}

#[async_trait]
impl EpochStore for InMemorySyncStore {
    async fn checkpoint(&self, epoch: Epoch) -> Result<Option<EpochCheckpoint>, StoreError> {
        Ok(self.lock()?.checkpoints.get(&epoch).cloned())
    }

    async fn checkpoints_in_range(
        &self,
        from: Epoch,
        to: Epoch,
    ) -> Result<Vec<EpochCheckpoint>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .lock()?
            .checkpoints
            .range(from..=to)
            .map(|(_, cp)| cp.clone())
            .collect())
    }

    async fn mark_step(
        &self,
        epoch: Epoch,
        step: EpochStep,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.lock()?
            .checkpoints
            .entry(epoch)
            .or_insert_with(|| EpochCheckpoint::empty(epoch))
            .mark(step, at);
        Ok(())
    }

    async fn upsert_drep_snapshots(&self, rows: &[DrepEpochSnapshot]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for row in rows {
            inner
                .drep_snapshots
                .insert((row.epoch, row.drep_id.clone()), row.clone());
        }
        Ok(())
    }

    async fn drep_snapshots(&self, epoch: Epoch) -> Result<Vec<DrepEpochSnapshot>, StoreError> {
        Ok(self
            .lock()?
            .drep_snapshots
            .iter()
            .filter(|((e, _), _)| *e == epoch)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn upsert_totals(&self, totals: &EpochTotals) -> Result<(), StoreError> {
        self.lock()?.totals.insert(totals.epoch, totals.clone());
        Ok(())
    }

    async fn totals(&self, epoch: Epoch) -> Result<Option<EpochTotals>, StoreError> {
        Ok(self.lock()?.totals.get(&epoch).cloned())
    }

    async fn upsert_delegator_summaries(
        &self,
        rows: &[DrepDelegatorSummary],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for row in rows {
            inner
                .delegator_summaries
                .insert((row.epoch, row.drep_id.clone()), row.clone());
        }
        Ok(())
    }

    async fn delegator_summaries(
        &self,
        epoch: Epoch,
    ) -> Result<Vec<DrepDelegatorSummary>, StoreError> {
        Ok(self
            .lock()?
            .delegator_summaries
            .iter()
            .filter(|((e, _), _)| *e == epoch)
            .map(|(_, row)| row.clone())
            .collect())
    }
}

#[async_trait]
impl DelegationStore for InMemorySyncStore {
    async fn delegation_state_count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.delegation_states.len() as u64)
    }

    async fn delegation_states(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<HashMap<StakeAddress, DelegationState>, StoreError> {
        let inner = self.lock()?;
        Ok(addresses
            .iter()
            .filter_map(|a| inner.delegation_states.get(a).map(|s| (a.clone(), s.clone())))
            .collect())
    }

    async fn apply_changes(
        &self,
        events: &[DelegationChangeEvent],
        states: &[DelegationState],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.change_log.extend_from_slice(events);
        for state in states {
            inner.upsert_state(state);
        }
        Ok(())
    }

    async fn apply_backfill(
        &self,
        events: &[DelegationChangeEvent],
        state: Option<&DelegationState>,
        cursor: &BackfillCursor,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.change_log.extend_from_slice(events);
        if let Some(state) = state {
            inner.upsert_state(state);
        }
        inner
            .cursors
            .insert(cursor.job_name.clone(), cursor.clone());
        Ok(())
    }

    async fn change_events(
        &self,
        address: &StakeAddress,
    ) -> Result<Vec<DelegationChangeEvent>, StoreError> {
        Ok(self
            .lock()?
            .change_log
            .iter()
            .filter(|e| &e.stake_address == address)
            .cloned()
            .collect())
    }

    async fn backfill_cursor(&self, job_name: &str) -> Result<Option<BackfillCursor>, StoreError> {
        Ok(self.lock()?.cursors.get(job_name).cloned())
    }

    async fn clear_backfill_cursor(&self, job_name: &str) -> Result<(), StoreError> {
        self.lock()?.cursors.remove(job_name);
        Ok(())
    }

    async fn is_backfill_done(&self, job_name: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.backfills_done.contains(job_name))
    }

    async fn mark_backfill_done(
        &self,
        job_name: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.lock()?.backfills_done.insert(job_name.to_string());
        Ok(())
    }
}

#[async_trait]
impl ProposalSnapshotStore for InMemorySyncStore {
    async fn proposal_snapshot(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<ProposalLedgerSnapshot>, StoreError> {
        Ok(self.lock()?.proposals.get(proposal_id).cloned())
    }

    async fn upsert_proposal_snapshot(
        &self,
        snapshot: &ProposalLedgerSnapshot,
    ) -> Result<(), StoreError> {
        self.lock()?
            .proposals
            .insert(snapshot.proposal_id.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const JOB: &str = "epoch-sync";
    const LEASE: Duration = Duration::from_secs(60);

    fn instance(name: &str) -> InstanceId {
        InstanceId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn second_acquire_without_release_fails() {
        let store = InMemorySyncStore::new();
        let a = instance("a");
        let now = Utc::now();

        assert!(store.try_acquire_lease(JOB, &a, now, LEASE).await.unwrap());
        assert!(!store.try_acquire_lease(JOB, &a, now, LEASE).await.unwrap());
        assert!(!store.try_acquire_lease(JOB, &instance("b"), now, LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        assert!(store.try_acquire_lease(JOB, &instance("a"), now, LEASE).await.unwrap());

        let later = now + ChronoDuration::seconds(61);
        assert!(store.try_acquire_lease(JOB, &instance("b"), later, LEASE).await.unwrap());

        let state = store.lock_state(JOB).await.unwrap().unwrap();
        assert_eq!(state.locked_by, Some(instance("b")));
        assert_eq!(state.last_result, Some(JobResult::Expired));
    }

    #[tokio::test]
    async fn release_by_stale_holder_keeps_new_lease() {
        let store = InMemorySyncStore::new();
        let (a, b) = (instance("a"), instance("b"));
        let now = Utc::now();
        store.try_acquire_lease(JOB, &a, now, LEASE).await.unwrap();
        store
            .try_acquire_lease(JOB, &b, now + ChronoDuration::seconds(120), LEASE)
            .await
            .unwrap();

        let cleared = store
            .release_lease(JOB, &a, JobResult::Success, Some(5), None)
            .await
            .unwrap();
        assert!(!cleared);
        assert!(store.lock_state(JOB).await.unwrap().unwrap().is_held_by(&b));

        assert!(store
            .release_lease(JOB, &b, JobResult::Failed, None, Some("boom".into()))
            .await
            .unwrap());
        let state = store.lock_state(JOB).await.unwrap().unwrap();
        assert!(!state.is_running);
        assert_eq!(state.last_result, Some(JobResult::Failed));
        assert_eq!(state.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn renew_only_for_current_holder() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        store.try_acquire_lease(JOB, &instance("a"), now, LEASE).await.unwrap();

        let later = now + ChronoDuration::seconds(50);
        assert!(store.renew_lease(JOB, &instance("a"), later, LEASE).await.unwrap());
        assert!(!store.renew_lease(JOB, &instance("b"), later, LEASE).await.unwrap());

        // Renewed at +50s for 60s, so still held at +100s.
        let at = now + ChronoDuration::seconds(100);
        assert!(!store.try_acquire_lease(JOB, &instance("b"), at, LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn checkpoint_range_is_inclusive() {
        let store = InMemorySyncStore::new();
        let now = Utc::now();
        for e in [3, 5, 7, 9] {
            store.mark_step(Epoch(e), EpochStep::Dreps, now).await.unwrap();
        }
        let found: Vec<u32> = store
            .checkpoints_in_range(Epoch(5), Epoch(9))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.epoch.number())
            .collect();
        assert_eq!(found, vec![5, 7, 9]);
        assert!(store.checkpoints_in_range(Epoch(9), Epoch(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_without_amount_keeps_the_stored_amount() {
        let store = InMemorySyncStore::new();
        let address = StakeAddress::parse("stake1u1").unwrap();
        let state = |drep: &str, amount: Option<u64>, epoch: u32| DelegationState {
            stake_address: address.clone(),
            drep_id: DelegateId::parse(drep).unwrap(),
            amount: amount.map(govsync_core::Lovelace::from),
            epoch_observed: Epoch(epoch),
        };

        store.apply_changes(&[], &[state("drep1a", Some(40), 520)]).await.unwrap();
        let cursor = BackfillCursor {
            job_name: "delegation-incremental-backfill".to_string(),
            last_address: address.clone(),
            processed: 1,
            total: 1,
        };
        store
            .apply_backfill(&[], Some(&state("drep1b", None, 525)), &cursor)
            .await
            .unwrap();

        let stored = store.delegation_states(&[address.clone()]).await.unwrap();
        let stored = &stored[&address];
        assert_eq!(stored.drep_id.as_str(), "drep1b");
        assert_eq!(stored.epoch_observed, Epoch(525));
        assert_eq!(stored.amount, Some(govsync_core::Lovelace::from(40u64)));

        store.apply_changes(&[], &[state("drep1b", Some(55), 526)]).await.unwrap();
        let stored = store.delegation_states(&[address.clone()]).await.unwrap();
        assert_eq!(stored[&address].amount, Some(govsync_core::Lovelace::from(55u64)));
    }
}
