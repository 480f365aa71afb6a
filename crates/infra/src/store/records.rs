//! Rows persisted by the sync core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use govsync_core::{DelegateId, Epoch, Lovelace, StakeAddress};

/// Steps of the per-epoch pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochStep {
    /// Full voter-entity inventory.
    Dreps,
    /// Epoch-level totals.
    Totals,
    /// Per-entity delegator summary.
    Delegators,
}

impl EpochStep {
    pub const ALL: [EpochStep; 3] = [EpochStep::Dreps, EpochStep::Totals, EpochStep::Delegators];

    pub fn as_str(&self) -> &'static str {
        match self {
            EpochStep::Dreps => "dreps",
            EpochStep::Totals => "totals",
            EpochStep::Delegators => "delegators",
        }
    }
}

/// Per-epoch completion markers. A set timestamp is never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCheckpoint {
    pub epoch: Epoch,
    pub dreps_synced_at: Option<DateTime<Utc>>,
    pub totals_synced_at: Option<DateTime<Utc>>,
    pub delegators_synced_at: Option<DateTime<Utc>>,
}

impl EpochCheckpoint {
    pub fn empty(epoch: Epoch) -> Self {
        Self {
            epoch,
            dreps_synced_at: None,
            totals_synced_at: None,
            delegators_synced_at: None,
        }
    }

    pub fn synced_at(&self, step: EpochStep) -> Option<DateTime<Utc>> {
        match step {
            EpochStep::Dreps => self.dreps_synced_at,
            EpochStep::Totals => self.totals_synced_at,
            EpochStep::Delegators => self.delegators_synced_at,
        }
    }

    pub fn is_done(&self, step: EpochStep) -> bool {
        self.synced_at(step).is_some()
    }

    /// Sets the step's timestamp unless it is already set.
    pub fn mark(&mut self, step: EpochStep, at: DateTime<Utc>) {
        let slot = match step {
            EpochStep::Dreps => &mut self.dreps_synced_at,
            EpochStep::Totals => &mut self.totals_synced_at,
            EpochStep::Delegators => &mut self.delegators_synced_at,
        };
        slot.get_or_insert(at);
    }

    /// Complete when every required step has run; the delegator step is only
    /// required when delegator snapshots are enabled.
    pub fn is_complete(&self, include_delegators: bool) -> bool {
        self.is_done(EpochStep::Dreps)
            && self.is_done(EpochStep::Totals)
            && (!include_delegators || self.is_done(EpochStep::Delegators))
    }
}

/// One voter entity as inventoried for an epoch, including entities that never voted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrepEpochSnapshot {
    pub epoch: Epoch,
    pub drep_id: DelegateId,
    pub registered: bool,
    pub active: bool,
    pub voting_power: Lovelace,
}

/// Epoch-level denominators. Absent upstream values stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochTotals {
    pub epoch: Epoch,
    pub circulation: Option<Lovelace>,
    pub treasury: Option<Lovelace>,
    pub drep_voting_power: Option<Lovelace>,
    pub pool_voting_power: Option<Lovelace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrepDelegatorSummary {
    pub epoch: Epoch,
    pub drep_id: DelegateId,
    pub delegator_count: u64,
    pub delegated_amount: Lovelace,
}

/// Latest known delegate of a stake address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationState {
    pub stake_address: StakeAddress,
    pub drep_id: DelegateId,
    /// Unknown until the address is observed in a fan-out.
    pub amount: Option<Lovelace>,
    pub epoch_observed: Epoch,
}

/// One transition in the append-only change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationChangeEvent {
    pub stake_address: StakeAddress,
    pub from_drep: Option<DelegateId>,
    pub to_drep: DelegateId,
    pub epoch: Epoch,
    pub amount: Option<Lovelace>,
    pub recorded_at: DateTime<Utc>,
}

/// Resume point of a backfill, keyed by job name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillCursor {
    pub job_name: String,
    /// Last address fully processed, in sort order.
    pub last_address: StakeAddress,
    pub processed: u64,
    pub total: u64,
}
