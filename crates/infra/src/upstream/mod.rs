//! The upstream ledger API: contract, HTTP adapter and an in-memory fake.
//!
//! Every method is one upstream request. Pagination, batching and retry are the
//! caller's concern (see [`crate::sync::LedgerSource`]).

mod error;
mod fake;
mod http;
mod types;

pub use error::UpstreamError;
pub use fake::FakeLedgerApi;
pub use http::{HttpLedgerApi, HttpLedgerApiConfig};
pub use types::{
    AccountDelegationHistory, DelegationUpdate, Delegator, DrepEpochSummary, DrepInfo,
    DrepListEntry, DrepVotingPower, Page, PoolVotingPower, SupplyTotals, Tip,
};

use async_trait::async_trait;

use govsync_core::{DelegateId, Epoch, StakeAddress};

#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Current chain tip, including the epoch in progress.
    async fn tip(&self) -> Result<Tip, UpstreamError>;

    /// Every registered or retired DRep, paginated.
    async fn drep_list(&self, page: Page) -> Result<Vec<DrepListEntry>, UpstreamError>;

    /// Batched multi-id lookup.
    async fn drep_info(&self, ids: &[DelegateId]) -> Result<Vec<DrepInfo>, UpstreamError>;

    /// Voting power of every DRep with stake in `epoch`, paginated.
    async fn drep_voting_power(
        &self,
        epoch: Epoch,
        page: Page,
    ) -> Result<Vec<DrepVotingPower>, UpstreamError>;

    async fn supply_totals(&self, epoch: Epoch) -> Result<Option<SupplyTotals>, UpstreamError>;

    async fn drep_epoch_summary(
        &self,
        epoch: Epoch,
    ) -> Result<Option<DrepEpochSummary>, UpstreamError>;

    /// Voting power of every pool in `epoch`, paginated.
    async fn pool_voting_power(
        &self,
        epoch: Epoch,
        page: Page,
    ) -> Result<Vec<PoolVotingPower>, UpstreamError>;

    /// Delegators of one DRep, as of `epoch` or currently when `None`, paginated.
    async fn drep_delegators(
        &self,
        drep: &DelegateId,
        epoch: Option<Epoch>,
        page: Page,
    ) -> Result<Vec<Delegator>, UpstreamError>;

    /// Full delegation history of each address. Batched multi-address lookup.
    async fn account_delegation_history(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<Vec<AccountDelegationHistory>, UpstreamError>;

    /// Requests left in the current rate-limit window, when the upstream reports it.
    fn remaining_quota(&self) -> Option<u64>;
}
