//! Stake-pool-operator tally with a historical formula cutover.
//!
//! The way pool stake that did not vote is counted changed at a fixed point in
//! ledger history. Which formula applies is decided once, by [`SpoFormula::select`],
//! and each formula is a pure mapping from raw buckets to yes / no / abstain.

use serde::{Deserialize, Serialize};

use govsync_core::{Epoch, GovActionType, ProposalId};

use crate::mapping::{BucketMapping, StakeTally};
use crate::snapshot::StakeBuckets;

/// The fixed transition point between the two SPO formulas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaCutover {
    /// Proposals submitted in or after this epoch use the current formula.
    pub transition_epoch: Epoch,
    /// A single proposal submitted before `transition_epoch` that was already
    /// tallied with the current formula.
    #[serde(default)]
    pub transition_proposal: Option<ProposalId>,
}

impl FormulaCutover {
    pub const DEFAULT_TRANSITION_EPOCH: Epoch = Epoch(534);

    pub fn new(transition_epoch: Epoch) -> Self {
        Self {
            transition_epoch,
            transition_proposal: None,
        }
    }

    pub fn with_transition_proposal(mut self, proposal: ProposalId) -> Self {
        self.transition_proposal = Some(proposal);
        self
    }
}

impl Default for FormulaCutover {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TRANSITION_EPOCH)
    }
}

/// SPO tally formula.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoFormula {
    /// Not-voted stake is left out of the denominator.
    Legacy,
    /// Not-voted stake counts as "no"; default-vote stake folds per action type.
    Current,
}

impl SpoFormula {
    /// Either the proposal is the transition proposal, or it was submitted at or
    /// after the transition epoch.
    pub fn select(cutover: &FormulaCutover, proposal: &ProposalId, submission_epoch: Epoch) -> Self {
        let is_transition_proposal = cutover.transition_proposal.as_ref() == Some(proposal);
        if is_transition_proposal || submission_epoch >= cutover.transition_epoch {
            SpoFormula::Current
        } else {
            SpoFormula::Legacy
        }
    }

    /// Map raw buckets to the yes / no / abstain descriptor for this formula.
    ///
    /// Returns the mapping and whether the not-voted residual was clamped.
    pub fn map(self, buckets: &StakeBuckets, action: GovActionType) -> (BucketMapping, bool) {
        let (not_voted, clamped) = buckets.not_voted();
        let b = buckets;

        let mapping = match self {
            SpoFormula::Legacy => {
                let (yes, no) = if action == GovActionType::NoConfidence {
                    (&b.yes + &b.always_no_confidence, b.no.clone())
                } else {
                    (b.yes.clone(), &b.no + &b.always_no_confidence)
                };
                BucketMapping {
                    yes,
                    no,
                    abstain: &b.abstain + &b.always_abstain,
                    not_voted,
                    not_voted_counts: false,
                }
            }
            SpoFormula::Current => {
                let (yes, no, abstain) = match action {
                    GovActionType::NoConfidence => (
                        &b.yes + &b.always_no_confidence,
                        b.no.clone(),
                        &b.abstain + &b.always_abstain,
                    ),
                    GovActionType::HardForkInitiation => (
                        b.yes.clone(),
                        &(&b.no + &b.always_abstain) + &b.always_no_confidence,
                        b.abstain.clone(),
                    ),
                    _ => (
                        b.yes.clone(),
                        &b.no + &b.always_no_confidence,
                        &b.abstain + &b.always_abstain,
                    ),
                };
                BucketMapping {
                    yes,
                    no,
                    abstain,
                    not_voted,
                    not_voted_counts: true,
                }
            }
        };
        (mapping, clamped)
    }
}

/// Tally SPO votes for one proposal.
pub fn tally_spo(
    buckets: &StakeBuckets,
    action: GovActionType,
    proposal: &ProposalId,
    submission_epoch: Epoch,
    cutover: &FormulaCutover,
) -> (SpoFormula, StakeTally) {
    let formula = SpoFormula::select(cutover, proposal, submission_epoch);
    let (mapping, clamped) = formula.map(buckets, action);
    if clamped {
        tracing::warn!(
            proposal_id = %proposal,
            total = %buckets.total,
            "spo buckets exceed total stake; not-voted residual clamped to zero"
        );
    }
    (formula, StakeTally::from_mapping(mapping, clamped))
}
