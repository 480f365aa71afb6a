//! Upstream access with pagination, batching and retry applied.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use govsync_core::{DelegateId, Epoch, Lovelace, StakeAddress};

use crate::jobs::{RetryPolicy, retry_with_backoff};
use crate::store::DrepEpochSnapshot;
use crate::upstream::{
    AccountDelegationHistory, Delegator, DrepEpochSummary, DrepInfo, DrepListEntry,
    DrepVotingPower, LedgerApi, Page, PoolVotingPower, SupplyTotals, UpstreamError,
};

/// [`LedgerApi`] wrapped so that every single request is retried and every
/// listing is read to its last page.
#[derive(Clone)]
pub struct LedgerSource {
    api: Arc<dyn LedgerApi>,
    retry: RetryPolicy,
    page_size: u32,
    info_batch_size: usize,
}

impl std::fmt::Debug for LedgerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSource")
            .field("retry", &self.retry)
            .field("page_size", &self.page_size)
            .field("info_batch_size", &self.info_batch_size)
            .finish_non_exhaustive()
    }
}

impl LedgerSource {
    pub fn new(api: Arc<dyn LedgerApi>, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            page_size: 1000,
            info_batch_size: 50,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_info_batch_size(mut self, batch_size: usize) -> Self {
        self.info_batch_size = batch_size.max(1);
        self
    }

    pub fn remaining_quota(&self) -> Option<u64> {
        self.api.remaining_quota()
    }

    async fn all_pages<T, F, Fut>(&self, operation: &str, fetch: F) -> Result<Vec<T>, UpstreamError>
    where
        F: Fn(Page) -> Fut,
        Fut: Future<Output = Result<Vec<T>, UpstreamError>>,
    {
        let mut rows = Vec::new();
        let mut page = Page::first(self.page_size);
        loop {
            let batch = retry_with_backoff(&self.retry, operation, || fetch(page)).await?;
            let last = page.is_last(batch.len());
            rows.extend(batch);
            if last {
                break;
            }
            page = page.next();
        }
        debug!(operation, rows = rows.len(), "read all pages");
        Ok(rows)
    }

    pub async fn tip(&self) -> Result<Epoch, UpstreamError> {
        let tip = retry_with_backoff(&self.retry, "tip", || self.api.tip()).await?;
        Ok(tip.epoch)
    }

    pub async fn drep_list(&self) -> Result<Vec<DrepListEntry>, UpstreamError> {
        self.all_pages("drep_list", |page| self.api.drep_list(page))
            .await
    }

    /// Multi-id lookups, chunked to the configured batch size.
    pub async fn drep_info(&self, ids: &[DelegateId]) -> Result<Vec<DrepInfo>, UpstreamError> {
        let mut infos = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.info_batch_size) {
            let batch = retry_with_backoff(&self.retry, "drep_info", || self.api.drep_info(chunk)).await?;
            infos.extend(batch);
        }
        Ok(infos)
    }

    pub async fn drep_voting_power(&self, epoch: Epoch) -> Result<Vec<DrepVotingPower>, UpstreamError> {
        self.all_pages("drep_voting_power", |page| self.api.drep_voting_power(epoch, page))
            .await
    }

    pub async fn supply_totals(&self, epoch: Epoch) -> Result<Option<SupplyTotals>, UpstreamError> {
        retry_with_backoff(&self.retry, "supply_totals", || self.api.supply_totals(epoch)).await
    }

    pub async fn drep_epoch_summary(
        &self,
        epoch: Epoch,
    ) -> Result<Option<DrepEpochSummary>, UpstreamError> {
        retry_with_backoff(&self.retry, "drep_epoch_summary", || {
            self.api.drep_epoch_summary(epoch)
        })
        .await
    }

    pub async fn pool_voting_power(&self, epoch: Epoch) -> Result<Vec<PoolVotingPower>, UpstreamError> {
        self.all_pages("pool_voting_power", |page| self.api.pool_voting_power(epoch, page))
            .await
    }

    /// Every delegator of `drep`, as of `epoch` or currently when `None`.
    pub async fn drep_delegators(
        &self,
        drep: &DelegateId,
        epoch: Option<Epoch>,
    ) -> Result<Vec<Delegator>, UpstreamError> {
        self.all_pages("drep_delegators", |page| {
            self.api.drep_delegators(drep, epoch, page)
        })
        .await
    }

    /// One batched history lookup; callers chunk the addresses.
    pub async fn account_delegation_history(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<Vec<AccountDelegationHistory>, UpstreamError> {
        retry_with_backoff(&self.retry, "account_delegation_history", || {
            self.api.account_delegation_history(addresses)
        })
        .await
    }

    /// Full voter-entity inventory for `epoch`.
    ///
    /// Listed entities are merged with their info flags and the epoch's voting
    /// power; entities without power are kept with zero. Entities that hold
    /// power but are missing from the listing (the predefined options) are
    /// added as well.
    pub async fn drep_inventory(&self, epoch: Epoch) -> Result<Vec<DrepEpochSnapshot>, UpstreamError> {
        let listed = self.drep_list().await?;
        let ids: Vec<DelegateId> = listed.iter().map(|d| d.drep_id.clone()).collect();
        let infos: HashMap<DelegateId, DrepInfo> = self
            .drep_info(&ids)
            .await?
            .into_iter()
            .map(|info| (info.drep_id.clone(), info))
            .collect();
        let mut power: HashMap<DelegateId, Lovelace> = self
            .drep_voting_power(epoch)
            .await?
            .into_iter()
            .map(|p| (p.drep_id, p.amount))
            .collect();

        let mut rows: Vec<DrepEpochSnapshot> = listed
            .into_iter()
            .map(|entry| {
                let info = infos.get(&entry.drep_id);
                DrepEpochSnapshot {
                    epoch,
                    registered: info.map_or(entry.registered, |i| i.registered),
                    active: info.is_some_and(|i| i.active),
                    voting_power: power.remove(&entry.drep_id).unwrap_or_default(),
                    drep_id: entry.drep_id,
                }
            })
            .collect();

        for (drep_id, voting_power) in power {
            let predefined = drep_id.is_predefined();
            rows.push(DrepEpochSnapshot {
                epoch,
                registered: predefined,
                active: predefined,
                voting_power,
                drep_id,
            });
        }
        rows.sort_by(|a, b| a.drep_id.cmp(&b.drep_id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::FakeLedgerApi;
    use std::time::Duration;

    fn drep(s: &str) -> DelegateId {
        DelegateId::parse(s).unwrap()
    }

    fn source(api: Arc<FakeLedgerApi>) -> LedgerSource {
        LedgerSource::new(api, RetryPolicy::fixed(3, Duration::from_millis(10)))
            .with_page_size(2)
            .with_info_batch_size(2)
    }

    #[tokio::test(start_paused = true)]
    async fn inventory_includes_entities_without_power() {
        let api = Arc::new(FakeLedgerApi::new());
        for (name, active) in [("drep1a", true), ("drep1b", false), ("drep1c", true)] {
            api.add_drep(drep(name), true, active);
        }
        api.set_voting_power(Epoch(500), drep("drep1a"), Lovelace::from(10u64));
        api.set_voting_power(Epoch(500), drep(DelegateId::ALWAYS_ABSTAIN), Lovelace::from(4u64));

        let rows = source(api.clone()).drep_inventory(Epoch(500)).await.unwrap();

        assert_eq!(rows.len(), 4);
        let b = rows.iter().find(|r| r.drep_id == drep("drep1b")).unwrap();
        assert!(b.voting_power.is_zero());
        assert!(!b.active);
        let abstain = rows.iter().find(|r| r.drep_id.is_predefined()).unwrap();
        assert_eq!(abstain.voting_power, Lovelace::from(4u64));
        // three entities at page size two, info chunked in twos
        assert_eq!(api.calls("drep_list"), 2);
        assert_eq!(api.calls("drep_info"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_per_page() {
        let api = Arc::new(FakeLedgerApi::new());
        api.add_drep(drep("drep1a"), true, true);
        api.fail_next("drep_list", UpstreamError::Timeout("slow".into()));

        let listed = source(api.clone()).drep_list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(api.calls("drep_list"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let api = Arc::new(FakeLedgerApi::new());
        api.fail_next(
            "supply_totals",
            UpstreamError::Client {
                status: 400,
                message: "bad epoch".into(),
            },
        );
        assert!(source(api.clone()).supply_totals(Epoch(1)).await.is_err());
        assert_eq!(api.calls("supply_totals"), 1);
    }
}
