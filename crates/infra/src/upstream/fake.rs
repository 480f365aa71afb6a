use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use govsync_core::{DelegateId, Epoch, Lovelace, StakeAddress};

use super::types::{
    AccountDelegationHistory, DelegationUpdate, Delegator, DrepEpochSummary, DrepInfo,
    DrepListEntry, DrepVotingPower, Page, PoolVotingPower, SupplyTotals, Tip,
};
use super::{LedgerApi, UpstreamError};

#[derive(Debug, Default)]
struct FakeLedger {
    tip: Option<Epoch>,
    dreps: BTreeMap<DelegateId, DrepInfo>,
    voting_power: BTreeMap<(Epoch, DelegateId), Lovelace>,
    supply: HashMap<Epoch, SupplyTotals>,
    drep_summaries: HashMap<Epoch, Lovelace>,
    pool_power: BTreeMap<(Epoch, String), Lovelace>,
    delegators: BTreeMap<DelegateId, Vec<Delegator>>,
    epoch_delegators: HashMap<(Epoch, DelegateId), Vec<Delegator>>,
    histories: BTreeMap<StakeAddress, Vec<DelegationUpdate>>,
    queued_failures: HashMap<&'static str, VecDeque<UpstreamError>>,
    failing_delegators: HashMap<DelegateId, UpstreamError>,
    quota: Option<u64>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory `LedgerApi` for tests and local development.
///
/// Counts calls per endpoint, can inject failures, and can simulate a
/// draining rate-limit quota (each history lookup costs one request).
#[derive(Debug, Default)]
pub struct FakeLedgerApi {
    ledger: Mutex<FakeLedger>,
}

fn paginate<T: Clone>(rows: &[T], page: Page) -> Vec<T> {
    rows.iter()
        .skip(usize::try_from(page.offset).unwrap_or(usize::MAX))
        .take(page.limit as usize)
        .cloned()
        .collect()
}

impl FakeLedgerApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, FakeLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call and pop a queued failure for the endpoint, if any.
    fn enter(&self, endpoint: &'static str) -> Result<MutexGuard<'_, FakeLedger>, UpstreamError> {
        let mut ledger = self.ledger();
        *ledger.calls.entry(endpoint).or_default() += 1;
        if let Some(err) = ledger
            .queued_failures
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(ledger)
    }

    pub fn set_tip(&self, epoch: Epoch) {
        self.ledger().tip = Some(epoch);
    }

    pub fn add_drep(&self, drep: DelegateId, registered: bool, active: bool) {
        self.ledger().dreps.insert(
            drep.clone(),
            DrepInfo {
                drep_id: drep,
                registered,
                active,
            },
        );
    }

    pub fn set_voting_power(&self, epoch: Epoch, drep: DelegateId, amount: Lovelace) {
        self.ledger().voting_power.insert((epoch, drep), amount);
    }

    pub fn set_supply(&self, epoch: Epoch, circulation: Option<Lovelace>, treasury: Option<Lovelace>) {
        self.ledger().supply.insert(
            epoch,
            SupplyTotals {
                epoch,
                circulation,
                treasury,
            },
        );
    }

    pub fn set_drep_summary(&self, epoch: Epoch, amount: Lovelace) {
        self.ledger().drep_summaries.insert(epoch, amount);
    }

    pub fn set_pool_power(&self, epoch: Epoch, pool: &str, amount: Lovelace) {
        self.ledger().pool_power.insert((epoch, pool.to_string()), amount);
    }

    /// Current delegators of a DRep.
    pub fn set_delegators(&self, drep: DelegateId, delegators: Vec<Delegator>) {
        self.ledger().delegators.insert(drep, delegators);
    }

    /// Delegators of a DRep as of an epoch; falls back to the current list.
    pub fn set_epoch_delegators(&self, epoch: Epoch, drep: DelegateId, delegators: Vec<Delegator>) {
        self.ledger().epoch_delegators.insert((epoch, drep), delegators);
    }

    pub fn set_history(&self, address: StakeAddress, updates: Vec<DelegationUpdate>) {
        self.ledger().histories.insert(address, updates);
    }

    /// Fail the next call to `endpoint` with `err`. Failures queue up in order.
    pub fn fail_next(&self, endpoint: &'static str, err: UpstreamError) {
        self.ledger()
            .queued_failures
            .entry(endpoint)
            .or_default()
            .push_back(err);
    }

    /// Every delegator lookup for `drep` fails with `err`.
    pub fn fail_delegators_of(&self, drep: DelegateId, err: UpstreamError) {
        self.ledger().failing_delegators.insert(drep, err);
    }

    pub fn set_quota(&self, quota: Option<u64>) {
        self.ledger().quota = quota;
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.ledger().calls.get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.ledger().calls.values().sum()
    }
}

#[async_trait]
impl LedgerApi for FakeLedgerApi {
    async fn tip(&self) -> Result<Tip, UpstreamError> {
        let ledger = self.enter("tip")?;
        let epoch = ledger
            .tip
            .ok_or_else(|| UpstreamError::Server {
                status: 503,
                message: "tip not set".to_string(),
            })?;
        Ok(Tip {
            epoch,
            abs_slot: None,
            block_time: None,
        })
    }

    async fn drep_list(&self, page: Page) -> Result<Vec<DrepListEntry>, UpstreamError> {
        let ledger = self.enter("drep_list")?;
        let rows: Vec<DrepListEntry> = ledger
            .dreps
            .values()
            .map(|d| DrepListEntry {
                drep_id: d.drep_id.clone(),
                registered: d.registered,
            })
            .collect();
        Ok(paginate(&rows, page))
    }

    async fn drep_info(&self, ids: &[DelegateId]) -> Result<Vec<DrepInfo>, UpstreamError> {
        let ledger = self.enter("drep_info")?;
        Ok(ids.iter().filter_map(|id| ledger.dreps.get(id).cloned()).collect())
    }

    async fn drep_voting_power(
        &self,
        epoch: Epoch,
        page: Page,
    ) -> Result<Vec<DrepVotingPower>, UpstreamError> {
        let ledger = self.enter("drep_voting_power")?;
        let rows: Vec<DrepVotingPower> = ledger
            .voting_power
            .iter()
            .filter(|((e, _), _)| *e == epoch)
            .map(|((e, id), amount)| DrepVotingPower {
                drep_id: id.clone(),
                epoch: *e,
                amount: amount.clone(),
            })
            .collect();
        Ok(paginate(&rows, page))
    }

    async fn supply_totals(&self, epoch: Epoch) -> Result<Option<SupplyTotals>, UpstreamError> {
        let ledger = self.enter("supply_totals")?;
        Ok(ledger.supply.get(&epoch).cloned())
    }

    async fn drep_epoch_summary(
        &self,
        epoch: Epoch,
    ) -> Result<Option<DrepEpochSummary>, UpstreamError> {
        let ledger = self.enter("drep_epoch_summary")?;
        Ok(ledger.drep_summaries.get(&epoch).map(|amount| DrepEpochSummary {
            epoch,
            amount: Some(amount.clone()),
        }))
    }

    async fn pool_voting_power(
        &self,
        epoch: Epoch,
        page: Page,
    ) -> Result<Vec<PoolVotingPower>, UpstreamError> {
        let ledger = self.enter("pool_voting_power")?;
        let rows: Vec<PoolVotingPower> = ledger
            .pool_power
            .iter()
            .filter(|((e, _), _)| *e == epoch)
            .map(|((e, pool), amount)| PoolVotingPower {
                pool_id_bech32: pool.clone(),
                epoch: *e,
                amount: amount.clone(),
            })
            .collect();
        Ok(paginate(&rows, page))
    }

    async fn drep_delegators(
        &self,
        drep: &DelegateId,
        epoch: Option<Epoch>,
        page: Page,
    ) -> Result<Vec<Delegator>, UpstreamError> {
        let ledger = self.enter("drep_delegators")?;
        if let Some(err) = ledger.failing_delegators.get(drep) {
            return Err(err.clone());
        }
        let rows = epoch
            .and_then(|e| ledger.epoch_delegators.get(&(e, drep.clone())))
            .or_else(|| ledger.delegators.get(drep))
            .map(|rows| paginate(rows, page))
            .unwrap_or_default();
        Ok(rows)
    }

    async fn account_delegation_history(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<Vec<AccountDelegationHistory>, UpstreamError> {
        let mut ledger = self.enter("account_delegation_history")?;
        if let Some(q) = ledger.quota.as_mut() {
            *q = q.saturating_sub(1);
        }
        Ok(addresses
            .iter()
            .filter_map(|a| {
                ledger.histories.get(a).map(|h| AccountDelegationHistory {
                    stake_address: a.clone(),
                    delegations: h.clone(),
                })
            })
            .collect())
    }

    fn remaining_quota(&self) -> Option<u64> {
        self.ledger().quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_failures_are_consumed_in_order() {
        let api = FakeLedgerApi::new();
        api.set_tip(Epoch(10));
        api.fail_next("tip", UpstreamError::Timeout("slow".into()));

        assert!(api.tip().await.is_err());
        assert_eq!(api.tip().await.unwrap().epoch, Epoch(10));
        assert_eq!(api.calls("tip"), 2);
    }

    #[tokio::test]
    async fn history_lookups_drain_quota() {
        let api = FakeLedgerApi::new();
        api.set_quota(Some(2));
        api.account_delegation_history(&[]).await.unwrap();
        assert_eq!(api.remaining_quota(), Some(1));
    }
}
