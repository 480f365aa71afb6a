//! Upstream payloads, shaped after the Koios-style JSON the ledger API returns.

use serde::{Deserialize, Serialize};

use govsync_core::{DelegateId, Epoch, Lovelace, StakeAddress};

/// `limit` / `offset` pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

impl Page {
    pub fn first(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            offset: 0,
        }
    }

    pub fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + u64::from(self.limit),
        }
    }

    /// A page shorter than the limit is the last one.
    pub fn is_last(&self, returned: usize) -> bool {
        returned < self.limit as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    #[serde(rename = "epoch_no")]
    pub epoch: Epoch,
    #[serde(default)]
    pub abs_slot: Option<u64>,
    #[serde(default)]
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrepListEntry {
    pub drep_id: DelegateId,
    #[serde(default)]
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrepInfo {
    pub drep_id: DelegateId,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrepVotingPower {
    pub drep_id: DelegateId,
    #[serde(rename = "epoch_no")]
    pub epoch: Epoch,
    pub amount: Lovelace,
}

/// Ada supply figures for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyTotals {
    #[serde(rename = "epoch_no")]
    pub epoch: Epoch,
    #[serde(default)]
    pub circulation: Option<Lovelace>,
    #[serde(default)]
    pub treasury: Option<Lovelace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrepEpochSummary {
    #[serde(rename = "epoch_no")]
    pub epoch: Epoch,
    /// Total stake delegated to DReps in the epoch.
    #[serde(default)]
    pub amount: Option<Lovelace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolVotingPower {
    pub pool_id_bech32: String,
    #[serde(rename = "epoch_no")]
    pub epoch: Epoch,
    pub amount: Lovelace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegator {
    pub stake_address: StakeAddress,
    pub amount: Lovelace,
}

/// One delegation certificate in an account's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationUpdate {
    pub drep_id: DelegateId,
    #[serde(rename = "epoch_no")]
    pub epoch: Epoch,
    #[serde(default)]
    pub epoch_slot: u64,
    #[serde(rename = "absolute_slot", default)]
    pub abs_slot: u64,
    #[serde(default)]
    pub block_time: i64,
}

impl DelegationUpdate {
    /// Chain order: epoch, then slot within the epoch, then absolute slot, then block time.
    pub fn chain_order(&self) -> (Epoch, u64, u64, i64) {
        (self.epoch, self.epoch_slot, self.abs_slot, self.block_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDelegationHistory {
    pub stake_address: StakeAddress,
    #[serde(default)]
    pub delegations: Vec<DelegationUpdate>,
}
