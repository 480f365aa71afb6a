//! Per-epoch checkpointed sync of the expensive aggregates.
//!
//! Each epoch runs three steps in a fixed order. A step runs only when its
//! checkpoint timestamp is unset, and its timestamp is written right after its
//! data. A failed step leaves its timestamp unset so the next run retries it
//! and nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use govsync_core::{DelegateId, Epoch, Lovelace};

use super::cache::JobCache;
use super::source::LedgerSource;
use crate::error::SyncError;
use crate::jobs::{ConcurrencyLimitedFetcher, JobReport};
use crate::store::{DrepDelegatorSummary, EpochCheckpoint, EpochStep, EpochStore, EpochTotals};
use crate::upstream::UpstreamError;

#[derive(Debug, Clone)]
pub struct EpochSyncSettings {
    /// Run the optional per-entity delegator summary step.
    pub include_delegator_snapshots: bool,
    pub backfill_from_epoch: Epoch,
    /// Optional cap on epochs synced per run; `None` syncs every incomplete epoch.
    pub max_epochs_per_run: Option<usize>,
    /// Fan-out width of the delegator summary step.
    pub concurrency: usize,
}

impl Default for EpochSyncSettings {
    fn default() -> Self {
        Self {
            include_delegator_snapshots: false,
            backfill_from_epoch: Epoch::GENESIS,
            max_epochs_per_run: None,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochSyncReport {
    pub epoch: Epoch,
    /// Steps that ran in this invocation; empty for an already-complete epoch.
    pub steps_run: Vec<EpochStep>,
    pub dreps_written: usize,
    pub delegator_summaries_written: usize,
}

impl EpochSyncReport {
    fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            steps_run: Vec::new(),
            dreps_written: 0,
            delegator_summaries_written: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochFailure {
    pub epoch: Epoch,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochBackfillReport {
    pub tip: Epoch,
    pub scanned: usize,
    pub already_complete: usize,
    pub synced: Vec<Epoch>,
    pub failed: Vec<EpochFailure>,
    /// Incomplete epochs left for a later run by the per-run bound.
    pub deferred: usize,
}

impl JobReport for EpochBackfillReport {
    fn items_processed(&self) -> u64 {
        self.synced.len() as u64
    }
}

pub struct EpochCheckpointOrchestrator {
    store: Arc<dyn EpochStore>,
    source: LedgerSource,
    settings: EpochSyncSettings,
}

impl EpochCheckpointOrchestrator {
    pub fn new(store: Arc<dyn EpochStore>, source: LedgerSource, settings: EpochSyncSettings) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    pub fn settings(&self) -> &EpochSyncSettings {
        &self.settings
    }

    /// Run every unfinished step of `epoch`. A fully checkpointed epoch makes
    /// no upstream call.
    #[instrument(skip(self, cache), err)]
    pub async fn sync_epoch(&self, epoch: Epoch, cache: &mut JobCache) -> Result<EpochSyncReport, SyncError> {
        let checkpoint = self
            .store
            .checkpoint(epoch)
            .await?
            .unwrap_or_else(|| EpochCheckpoint::empty(epoch));
        let mut report = EpochSyncReport::new(epoch);

        if !checkpoint.is_done(EpochStep::Dreps) {
            report.dreps_written = self.sync_dreps(epoch, cache).await?;
            self.mark(epoch, EpochStep::Dreps, &mut report).await?;
        }

        if !checkpoint.is_done(EpochStep::Totals) {
            self.sync_totals(epoch).await?;
            self.mark(epoch, EpochStep::Totals, &mut report).await?;
        }

        if self.settings.include_delegator_snapshots && !checkpoint.is_done(EpochStep::Delegators) {
            report.delegator_summaries_written = self.sync_delegators(epoch, cache).await?;
            self.mark(epoch, EpochStep::Delegators, &mut report).await?;
        }

        if !report.steps_run.is_empty() {
            info!(
                %epoch,
                steps = report.steps_run.len(),
                dreps = report.dreps_written,
                delegator_summaries = report.delegator_summaries_written,
                "epoch synced"
            );
        }
        Ok(report)
    }

    async fn mark(&self, epoch: Epoch, step: EpochStep, report: &mut EpochSyncReport) -> Result<(), SyncError> {
        self.store.mark_step(epoch, step, Utc::now()).await?;
        report.steps_run.push(step);
        Ok(())
    }

    async fn sync_dreps(&self, epoch: Epoch, cache: &mut JobCache) -> Result<usize, SyncError> {
        let rows = self.source.drep_inventory(epoch).await?;
        self.store.upsert_drep_snapshots(&rows).await?;
        let written = rows.len();
        cache.put_inventory(epoch, rows);
        Ok(written)
    }

    async fn sync_totals(&self, epoch: Epoch) -> Result<(), SyncError> {
        let supply = self.source.supply_totals(epoch).await?;
        let drep_summary = self.source.drep_epoch_summary(epoch).await?;
        let pools = self.source.pool_voting_power(epoch).await?;

        let pool_voting_power = if pools.is_empty() {
            None
        } else {
            Some(pools.into_iter().map(|p| p.amount).sum::<Lovelace>())
        };
        let totals = EpochTotals {
            epoch,
            circulation: supply.as_ref().and_then(|s| s.circulation.clone()),
            treasury: supply.and_then(|s| s.treasury),
            drep_voting_power: drep_summary.and_then(|s| s.amount),
            pool_voting_power,
        };

        let missing: Vec<&str> = [
            ("circulation", totals.circulation.is_none()),
            ("treasury", totals.treasury.is_none()),
            ("drep_voting_power", totals.drep_voting_power.is_none()),
            ("pool_voting_power", totals.pool_voting_power.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        if !missing.is_empty() {
            warn!(%epoch, ?missing, "upstream reported no value for some epoch totals");
        }

        self.store.upsert_totals(&totals).await?;
        Ok(())
    }

    /// Fan out over entities with non-zero power. Successful summaries are
    /// written even when some entities fail, but the step then stays unmarked.
    async fn sync_delegators(&self, epoch: Epoch, cache: &mut JobCache) -> Result<usize, SyncError> {
        let inventory = cache
            .inventory(epoch, self.store.as_ref(), &self.source)
            .await?;
        let targets: Vec<DelegateId> = inventory
            .iter()
            .filter(|row| !row.voting_power.is_zero())
            .map(|row| row.drep_id.clone())
            .collect();
        let total = targets.len();

        let source = &self.source;
        let outcome = ConcurrencyLimitedFetcher::new(self.settings.concurrency)
            .run(targets, |drep_id: DelegateId| async move {
                let delegators = source.drep_delegators(&drep_id, Some(epoch)).await?;
                Ok::<_, UpstreamError>(DrepDelegatorSummary {
                    epoch,
                    delegator_count: delegators.len() as u64,
                    delegated_amount: delegators.into_iter().map(|d| d.amount).sum(),
                    drep_id,
                })
            })
            .await;

        self.store
            .upsert_delegator_summaries(&outcome.successful)
            .await?;

        if !outcome.failed.is_empty() {
            for (drep_id, err) in &outcome.failed {
                warn!(%epoch, %drep_id, error = %err, "delegator summary fetch failed");
            }
            return Err(SyncError::StepIncomplete {
                epoch,
                step: EpochStep::Delegators,
                failed: outcome.failed.len(),
                total,
            });
        }
        Ok(outcome.successful.len())
    }

    /// Sync every incomplete epoch in `[backfill_from_epoch, tip - 1]`, oldest
    /// first, up to `max_epochs_per_run` when a cap is set. One epoch failing
    /// does not stop the scan.
    #[instrument(skip(self, cache), err)]
    pub async fn backfill_missing_epochs(&self, cache: &mut JobCache) -> Result<EpochBackfillReport, SyncError> {
        let tip = cache.tip(&self.source).await?;
        let mut report = EpochBackfillReport {
            tip,
            scanned: 0,
            already_complete: 0,
            synced: Vec::new(),
            failed: Vec::new(),
            deferred: 0,
        };

        let Some(last) = tip.prev() else {
            return Ok(report);
        };
        let first = self.settings.backfill_from_epoch;
        if first > last {
            return Ok(report);
        }

        let stored: HashMap<Epoch, EpochCheckpoint> = self
            .store
            .checkpoints_in_range(first, last)
            .await?
            .into_iter()
            .map(|c| (c.epoch, c))
            .collect();

        let include_delegators = self.settings.include_delegator_snapshots;
        let mut pending = Vec::new();
        for epoch in Epoch::range_inclusive(first, last) {
            report.scanned += 1;
            match stored.get(&epoch) {
                Some(c) if c.is_complete(include_delegators) => report.already_complete += 1,
                _ => pending.push(epoch),
            }
        }

        if let Some(bound) = self.settings.max_epochs_per_run.map(|b| b.max(1)) {
            if pending.len() > bound {
                report.deferred = pending.len() - bound;
                pending.truncate(bound);
            }
        }

        for epoch in pending {
            match self.sync_epoch(epoch, cache).await {
                Ok(_) => report.synced.push(epoch),
                Err(err) => {
                    warn!(%epoch, error = %err, "epoch sync failed; continuing with the next epoch");
                    report.failed.push(EpochFailure {
                        epoch,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            %tip,
            scanned = report.scanned,
            already_complete = report.already_complete,
            synced = report.synced.len(),
            failed = report.failed.len(),
            deferred = report.deferred,
            "epoch backfill finished"
        );
        Ok(report)
    }
}
