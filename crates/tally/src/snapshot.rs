//! Stored proposal ledger snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use govsync_core::{CommitteeMemberId, Epoch, GovActionType, Lovelace, ProposalId, Vote};

/// Stake-weighted vote buckets for one voter class.
///
/// Not every class uses every bucket: pool operators have no `inactive` bucket,
/// so it defaults to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeBuckets {
    /// Total active stake of the class for the proposal's epoch.
    pub total: Lovelace,
    pub yes: Lovelace,
    pub no: Lovelace,
    pub abstain: Lovelace,
    #[serde(default)]
    pub always_abstain: Lovelace,
    #[serde(default)]
    pub always_no_confidence: Lovelace,
    #[serde(default)]
    pub inactive: Lovelace,
}

impl StakeBuckets {
    /// `total` minus every named bucket, clamped at zero.
    ///
    /// Returns `(residual, clamped)`; `clamped` is `true` when the named buckets
    /// exceeded the total (an upstream data anomaly).
    pub fn not_voted(&self) -> (Lovelace, bool) {
        let named = [
            &self.yes,
            &self.no,
            &self.abstain,
            &self.always_abstain,
            &self.always_no_confidence,
            &self.inactive,
        ]
        .into_iter()
        .sum::<Lovelace>();
        self.total.clamped_sub(&named)
    }
}

/// One committee member vote record as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeVoteRecord {
    pub member: CommitteeMemberId,
    pub vote: Vote,
    /// When the vote was cast on chain, if known.
    #[serde(default)]
    pub voted_at: Option<DateTime<Utc>>,
    /// When the vote row was recorded locally.
    pub recorded_at: DateTime<Utc>,
}

impl CommitteeVoteRecord {
    /// Ordering key: vote time, falling back to record time.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.voted_at.unwrap_or(self.recorded_at)
    }
}

/// Committee roster size plus every recorded vote (including superseded ones).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeSnapshot {
    pub roster_size: u32,
    #[serde(default)]
    pub votes: Vec<CommitteeVoteRecord>,
}

/// Per-proposal bucket breakdown for every participating voter class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalLedgerSnapshot {
    pub proposal_id: ProposalId,
    pub action_type: GovActionType,
    pub submission_epoch: Epoch,
    #[serde(default)]
    pub drep: Option<StakeBuckets>,
    #[serde(default)]
    pub spo: Option<StakeBuckets>,
    #[serde(default)]
    pub committee: Option<CommitteeSnapshot>,
}
