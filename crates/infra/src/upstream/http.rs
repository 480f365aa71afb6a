use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

use govsync_core::{DelegateId, Epoch, StakeAddress};

use super::types::{
    AccountDelegationHistory, Delegator, DrepEpochSummary, DrepInfo, DrepListEntry,
    DrepVotingPower, Page, PoolVotingPower, SupplyTotals, Tip,
};
use super::{LedgerApi, UpstreamError};

const QUOTA_HEADER: &str = "x-ratelimit-remaining";
const QUOTA_UNKNOWN: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct HttpLedgerApiConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

/// `LedgerApi` over HTTP.
///
/// Status codes are classified into [`UpstreamError`] so callers can retry
/// transient failures; the remaining-quota header of the latest response is
/// kept for [`LedgerApi::remaining_quota`].
#[derive(Debug)]
pub struct HttpLedgerApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
    remaining_quota: AtomicU64,
}

impl HttpLedgerApi {
    pub fn new(config: HttpLedgerApiConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("govsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token,
            remaining_quota: AtomicU64::new(QUOTA_UNKNOWN),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let request = self.client.get(self.url(path)).query(query);
        self.send(path, request).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, UpstreamError> {
        let request = self.client.post(self.url(path)).json(&body);
        self.send(path, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(quota) = parse_quota(response.headers()) {
            self.remaining_quota.store(quota, Ordering::Relaxed);
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            debug!(path, status = status.as_u16(), "upstream returned error status");
            return Err(status_error(status, body, retry_after));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(format!("{path}: {e}")))
    }
}

fn page_query(page: Page) -> Vec<(&'static str, String)> {
    vec![
        ("limit", page.limit.to_string()),
        ("offset", page.offset.to_string()),
    ]
}

fn epoch_query(epoch: Epoch) -> (&'static str, String) {
    ("_epoch_no", epoch.number().to_string())
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(err.to_string())
    } else if err.is_decode() {
        UpstreamError::Decode(err.to_string())
    } else {
        UpstreamError::Transport(err.to_string())
    }
}

fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> UpstreamError {
    let message: String = body.chars().take(512).collect();
    UpstreamError::from_status(status.as_u16(), message, retry_after)
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_quota(headers: &HeaderMap) -> Option<u64> {
    headers.get(QUOTA_HEADER)?.to_str().ok()?.trim().parse().ok()
}

/// Single-row endpoints return a one-element array.
fn first<T>(mut rows: Vec<T>) -> Option<T> {
    if rows.is_empty() { None } else { Some(rows.swap_remove(0)) }
}

#[async_trait]
impl LedgerApi for HttpLedgerApi {
    #[instrument(skip(self), err)]
    async fn tip(&self) -> Result<Tip, UpstreamError> {
        let rows: Vec<Tip> = self.get("tip", &[]).await?;
        first(rows).ok_or_else(|| UpstreamError::Decode("tip: empty response".to_string()))
    }

    #[instrument(skip(self), err)]
    async fn drep_list(&self, page: Page) -> Result<Vec<DrepListEntry>, UpstreamError> {
        self.get("drep_list", &page_query(page)).await
    }

    #[instrument(skip(self, ids), fields(id_count = ids.len()), err)]
    async fn drep_info(&self, ids: &[DelegateId]) -> Result<Vec<DrepInfo>, UpstreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = ids.iter().map(DelegateId::as_str).collect();
        self.post("drep_info", json!({ "_drep_ids": ids })).await
    }

    #[instrument(skip(self), err)]
    async fn drep_voting_power(
        &self,
        epoch: Epoch,
        page: Page,
    ) -> Result<Vec<DrepVotingPower>, UpstreamError> {
        let mut query = page_query(page);
        query.push(epoch_query(epoch));
        self.get("drep_voting_power_history", &query).await
    }

    #[instrument(skip(self), err)]
    async fn supply_totals(&self, epoch: Epoch) -> Result<Option<SupplyTotals>, UpstreamError> {
        let rows: Vec<SupplyTotals> = self.get("totals", &[epoch_query(epoch)]).await?;
        Ok(first(rows))
    }

    #[instrument(skip(self), err)]
    async fn drep_epoch_summary(
        &self,
        epoch: Epoch,
    ) -> Result<Option<DrepEpochSummary>, UpstreamError> {
        let rows: Vec<DrepEpochSummary> =
            self.get("drep_epoch_summary", &[epoch_query(epoch)]).await?;
        Ok(first(rows))
    }

    #[instrument(skip(self), err)]
    async fn pool_voting_power(
        &self,
        epoch: Epoch,
        page: Page,
    ) -> Result<Vec<PoolVotingPower>, UpstreamError> {
        let mut query = page_query(page);
        query.push(epoch_query(epoch));
        self.get("pool_voting_power_history", &query).await
    }

    #[instrument(skip(self, drep), fields(drep = %drep), err)]
    async fn drep_delegators(
        &self,
        drep: &DelegateId,
        epoch: Option<Epoch>,
        page: Page,
    ) -> Result<Vec<Delegator>, UpstreamError> {
        let mut query = page_query(page);
        query.push(("_drep_id", drep.to_string()));
        if let Some(epoch) = epoch {
            query.push(epoch_query(epoch));
        }
        self.get("drep_delegators", &query).await
    }

    #[instrument(skip(self, addresses), fields(address_count = addresses.len()), err)]
    async fn account_delegation_history(
        &self,
        addresses: &[StakeAddress],
    ) -> Result<Vec<AccountDelegationHistory>, UpstreamError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let addresses: Vec<&str> = addresses.iter().map(StakeAddress::as_str).collect();
        self.post(
            "account_delegation_history",
            json!({ "_stake_addresses": addresses }),
        )
        .await
    }

    fn remaining_quota(&self) -> Option<u64> {
        match self.remaining_quota.load(Ordering::Relaxed) {
            QUOTA_UNKNOWN => None,
            quota => Some(quota),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn quota_header_is_read() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_quota(&headers), None);
        headers.insert(QUOTA_HEADER, HeaderValue::from_static("1234"));
        assert_eq!(parse_quota(&headers), Some(1234));
    }

    #[test]
    fn status_mapping_marks_rate_limits() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            String::new(),
            Some(Duration::from_secs(2)),
        );
        assert_eq!(
            err,
            UpstreamError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "nope".into(), None),
            UpstreamError::Client { status: 404, .. }
        ));
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let api = HttpLedgerApi::new(HttpLedgerApiConfig {
            base_url: "https://ledger.example/api/v1/".into(),
            bearer_token: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(api.url("/tip"), "https://ledger.example/api/v1/tip");
        assert_eq!(api.remaining_quota(), None);
    }
}
