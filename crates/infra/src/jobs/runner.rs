//! Job entry points: `acquire -> run -> release` around the sync pipelines.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, instrument};

use govsync_core::ProposalId;
use govsync_tally::{FormulaCutover, ProposalTally, ThresholdTable, tally_proposal};

use super::lock::DistributedJobLock;
use super::types::{
    DELEGATION_SYNC_JOB, EPOCH_SYNC_JOB, FULL_SYNC_JOB, JobLockState, JobReport, JobRun,
};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::store::{ProposalSnapshotStore, SyncStore};
use crate::sync::{
    DelegationChangeTracker, DelegationSyncReport, DelegationSyncSettings, EpochBackfillReport,
    EpochCheckpointOrchestrator, EpochSyncSettings, JobCache, LedgerSource,
};
use crate::upstream::LedgerApi;

#[derive(Debug, Clone, Copy)]
pub struct JobLeases {
    pub epoch: Duration,
    pub delegation: Duration,
}

impl JobLeases {
    /// Covers both pipelines run back to back.
    pub fn full(&self) -> Duration {
        self.epoch + self.delegation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullSyncReport {
    pub epochs: JobRun<EpochBackfillReport>,
    pub delegations: JobRun<DelegationSyncReport>,
}

impl JobReport for FullSyncReport {
    fn items_processed(&self) -> u64 {
        let epochs = match &self.epochs {
            JobRun::Completed(r) => r.items_processed(),
            JobRun::AlreadyRunning => 0,
        };
        let delegations = match &self.delegations {
            JobRun::Completed(r) => r.items_processed(),
            JobRun::AlreadyRunning => 0,
        };
        epochs + delegations
    }
}

/// Everything a scheduler or the admin surface can trigger.
pub struct SyncJobs {
    lock: DistributedJobLock,
    epochs: EpochCheckpointOrchestrator,
    delegations: DelegationChangeTracker,
    proposals: Arc<dyn ProposalSnapshotStore>,
    leases: JobLeases,
    thresholds: ThresholdTable,
    cutover: FormulaCutover,
}

impl SyncJobs {
    pub fn new<S>(store: Arc<S>, api: Arc<dyn LedgerApi>, config: &SyncConfig) -> Self
    where
        S: SyncStore + 'static,
    {
        let source = LedgerSource::new(api, config.retry.clone())
            .with_page_size(config.page_size)
            .with_info_batch_size(config.info_batch_size);

        let epochs = EpochCheckpointOrchestrator::new(
            store.clone(),
            source.clone(),
            EpochSyncSettings {
                include_delegator_snapshots: config.include_delegator_snapshots,
                backfill_from_epoch: config.backfill_from_epoch,
                max_epochs_per_run: config.max_epochs_per_run,
                concurrency: config.epoch_concurrency,
            },
        );
        let delegations = DelegationChangeTracker::new(
            store.clone(),
            store.clone(),
            source,
            DelegationSyncSettings {
                concurrency: config.delegation_concurrency,
                history_batch_size: config.history_batch_size,
                write_batch_size: config.write_batch_size,
                min_quota_reserve: config.min_quota_reserve,
            },
        );

        Self {
            lock: DistributedJobLock::new(store.clone(), config.instance_id.clone()),
            epochs,
            delegations,
            proposals: store,
            leases: JobLeases {
                epoch: config.epoch_lease,
                delegation: config.delegation_lease,
            },
            thresholds: ThresholdTable::mainnet(),
            cutover: FormulaCutover::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_cutover(mut self, cutover: FormulaCutover) -> Self {
        self.cutover = cutover;
        self
    }

    pub fn lock(&self) -> &DistributedJobLock {
        &self.lock
    }

    #[instrument(skip(self), fields(job = EPOCH_SYNC_JOB))]
    pub async fn run_epoch_sync(&self) -> Result<JobRun<EpochBackfillReport>, SyncError> {
        let mut cache = JobCache::new();
        self.epoch_sync_with(&mut cache).await
    }

    #[instrument(skip(self), fields(job = DELEGATION_SYNC_JOB))]
    pub async fn run_delegation_sync(&self) -> Result<JobRun<DelegationSyncReport>, SyncError> {
        let mut cache = JobCache::new();
        self.delegation_sync_with(&mut cache).await
    }

    /// Both pipelines in order, sharing one cache. Each still takes its own
    /// lease, so a concurrent single-pipeline trigger is excluded too.
    #[instrument(skip(self), fields(job = FULL_SYNC_JOB))]
    pub async fn run_full_sync(&self) -> Result<JobRun<FullSyncReport>, SyncError> {
        self.lock
            .run_exclusive(FULL_SYNC_JOB, self.leases.full(), move || async move {
                let mut cache = JobCache::new();
                let epochs = self.epoch_sync_with(&mut cache).await?;
                let delegations = self.delegation_sync_with(&mut cache).await?;
                Ok(FullSyncReport {
                    epochs,
                    delegations,
                })
            })
            .await
    }

    async fn epoch_sync_with(&self, cache: &mut JobCache) -> Result<JobRun<EpochBackfillReport>, SyncError> {
        self.lock
            .run_exclusive(EPOCH_SYNC_JOB, self.leases.epoch, move || {
                self.epochs.backfill_missing_epochs(cache)
            })
            .await
    }

    async fn delegation_sync_with(
        &self,
        cache: &mut JobCache,
    ) -> Result<JobRun<DelegationSyncReport>, SyncError> {
        self.lock
            .run_exclusive(DELEGATION_SYNC_JOB, self.leases.delegation, move || {
                self.delegations.sync(cache)
            })
            .await
    }

    pub async fn job_state(&self, job_name: &str) -> Result<Option<JobLockState>, SyncError> {
        Ok(self.lock.state(job_name).await?)
    }

    /// Tally a stored proposal snapshot; `None` when no snapshot is stored.
    pub async fn proposal_tally(&self, proposal_id: &ProposalId) -> Result<Option<ProposalTally>, SyncError> {
        let snapshot = self.proposals.proposal_snapshot(proposal_id).await?;
        Ok(snapshot.map(|s| tally_proposal(&s, &self.thresholds, &self.cutover)))
    }

    /// Trigger a full sync every `every` until the task is dropped.
    pub async fn run_schedule(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.run_full_sync().await {
                Ok(JobRun::Completed(report)) => {
                    info!(items = report.items_processed(), "scheduled sync finished")
                }
                Ok(JobRun::AlreadyRunning) => info!("scheduled sync skipped; already running"),
                Err(err) => error!(error = %err, "scheduled sync failed"),
            }
        }
    }
}
