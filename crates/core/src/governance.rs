//! Governance vocabulary: action types, voter classes, votes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Governance action type of a proposal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovActionType {
    /// Motion of no-confidence in the current constitutional committee.
    NoConfidence,
    UpdateCommittee,
    NewConstitution,
    HardForkInitiation,
    ParameterChange,
    TreasuryWithdrawals,
    InfoAction,
}

impl GovActionType {
    pub const ALL: [GovActionType; 7] = [
        GovActionType::NoConfidence,
        GovActionType::UpdateCommittee,
        GovActionType::NewConstitution,
        GovActionType::HardForkInitiation,
        GovActionType::ParameterChange,
        GovActionType::TreasuryWithdrawals,
        GovActionType::InfoAction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GovActionType::NoConfidence => "no_confidence",
            GovActionType::UpdateCommittee => "update_committee",
            GovActionType::NewConstitution => "new_constitution",
            GovActionType::HardForkInitiation => "hard_fork_initiation",
            GovActionType::ParameterChange => "parameter_change",
            GovActionType::TreasuryWithdrawals => "treasury_withdrawals",
            GovActionType::InfoAction => "info_action",
        }
    }
}

impl FromStr for GovActionType {
    type Err = DomainError;

    /// Accepts both our snake_case names and the ledger's PascalCase names
    /// (`NoConfidence`, `NewCommittee`, `TreasuryWithdrawals`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "noconfidence" => Ok(GovActionType::NoConfidence),
            "updatecommittee" | "newcommittee" => Ok(GovActionType::UpdateCommittee),
            "newconstitution" => Ok(GovActionType::NewConstitution),
            "hardforkinitiation" => Ok(GovActionType::HardForkInitiation),
            "parameterchange" => Ok(GovActionType::ParameterChange),
            "treasurywithdrawals" | "treasurywithdrawal" => Ok(GovActionType::TreasuryWithdrawals),
            "infoaction" | "info" => Ok(GovActionType::InfoAction),
            _ => Err(DomainError::validation(format!(
                "unknown governance action type: {s:?}"
            ))),
        }
    }
}

/// The three tally variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterClass {
    /// Delegated representatives: continuous stake-weighted with an inactive bucket.
    Drep,
    /// Stake pool operators: stake-weighted with a historical formula cutover.
    Spo,
    /// Constitutional committee: fixed-size roster, headcount-based.
    Committee,
}

/// A single cast vote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Yes,
    No,
    Abstain,
}

impl FromStr for Vote {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Ok(Vote::Yes),
            "no" => Ok(Vote::No),
            "abstain" => Ok(Vote::Abstain),
            _ => Err(DomainError::validation(format!("unknown vote: {s:?}"))),
        }
    }
}
