//! Whole-proposal tally: every voter class plus ratification.

use serde::{Deserialize, Serialize};

use govsync_core::{GovActionType, ProposalId, VoterClass};

use crate::committee::{CommitteeTally, tally_committee};
use crate::drep::tally_drep;
use crate::mapping::StakeTally;
use crate::snapshot::ProposalLedgerSnapshot;
use crate::spo::{FormulaCutover, SpoFormula, tally_spo};
use crate::threshold::{Ratification, ThresholdTable, evaluate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalTally {
    pub proposal_id: ProposalId,
    pub action_type: GovActionType,
    pub drep: Option<StakeTally>,
    pub spo: Option<StakeTally>,
    pub spo_formula: Option<SpoFormula>,
    pub committee: Option<CommitteeTally>,
    pub ratification: Ratification,
}

pub fn tally_proposal(
    snapshot: &ProposalLedgerSnapshot,
    thresholds: &ThresholdTable,
    cutover: &FormulaCutover,
) -> ProposalTally {
    let drep = snapshot
        .drep
        .as_ref()
        .map(|b| tally_drep(b, snapshot.action_type));

    let (spo_formula, spo) = match snapshot.spo.as_ref() {
        Some(b) => {
            let (formula, tally) = tally_spo(
                b,
                snapshot.action_type,
                &snapshot.proposal_id,
                snapshot.submission_epoch,
                cutover,
            );
            (Some(formula), Some(tally))
        }
        None => (None, None),
    };

    let committee = snapshot.committee.as_ref().map(tally_committee);

    let ratification = evaluate(thresholds.get(snapshot.action_type), |class, threshold| {
        match class {
            VoterClass::Drep => drep
                .as_ref()
                .map(|t| (t.yes_pct, t.has_votes() && t.meets(threshold))),
            VoterClass::Spo => spo
                .as_ref()
                .map(|t| (t.yes_pct, t.has_votes() && t.meets(threshold))),
            VoterClass::Committee => committee
                .as_ref()
                .map(|t| (t.yes_pct, t.has_votes() && t.meets(threshold))),
        }
    });

    ProposalTally {
        proposal_id: snapshot.proposal_id.clone(),
        action_type: snapshot.action_type,
        drep,
        spo,
        spo_formula,
        committee,
        ratification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CommitteeSnapshot, CommitteeVoteRecord, StakeBuckets};
    use crate::threshold::RatificationStatus;
    use chrono::Utc;
    use govsync_core::{CommitteeMemberId, Epoch, Lovelace, Vote};

    fn l(v: u64) -> Lovelace {
        Lovelace::from(v)
    }

    fn committee_votes(yes: u32) -> CommitteeSnapshot {
        let now = Utc::now();
        CommitteeSnapshot {
            roster_size: 7,
            votes: (0..yes)
                .map(|n| CommitteeVoteRecord {
                    member: CommitteeMemberId::parse(format!("cc_cold1m{n}")).unwrap(),
                    vote: Vote::Yes,
                    voted_at: None,
                    recorded_at: now,
                })
                .collect(),
        }
    }

    fn snapshot(committee_yes: u32) -> ProposalLedgerSnapshot {
        ProposalLedgerSnapshot {
            proposal_id: ProposalId::parse("gov_action1pc").unwrap(),
            action_type: GovActionType::ParameterChange,
            submission_epoch: Epoch(540),
            drep: Some(StakeBuckets {
                total: l(1000),
                yes: l(800),
                no: l(100),
                ..Default::default()
            }),
            spo: None,
            committee: Some(committee_votes(committee_yes)),
        }
    }

    #[test]
    fn parameter_change_needs_drep_and_committee() {
        let table = ThresholdTable::mainnet();
        let cutover = FormulaCutover::default();

        let passing = tally_proposal(&snapshot(5), &table, &cutover);
        assert_eq!(passing.ratification.status, RatificationStatus::Passed);
        assert!(passing.spo.is_none());

        let failing = tally_proposal(&snapshot(4), &table, &cutover);
        assert_eq!(failing.ratification.status, RatificationStatus::Failed);
    }

    #[test]
    fn participating_class_with_no_votes_fails() {
        let mut snap = snapshot(5);
        snap.action_type = GovActionType::HardForkInitiation;
        snap.spo = Some(StakeBuckets::default());

        let t = tally_proposal(&snap, &ThresholdTable::mainnet(), &FormulaCutover::default());
        let spo = t
            .ratification
            .classes
            .iter()
            .find(|c| c.class == VoterClass::Spo)
            .unwrap();
        assert!(!spo.passed);
        assert_eq!(t.ratification.status, RatificationStatus::Failed);
        assert_eq!(t.spo_formula, Some(SpoFormula::Current));
    }
}
