//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use govsync_core::{Epoch, InstanceId};

use crate::jobs::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub upstream_url: String,
    pub upstream_token: Option<String>,
    pub upstream_timeout: Duration,
    pub instance_id: InstanceId,
    pub bind_addr: SocketAddr,

    pub epoch_lease: Duration,
    pub delegation_lease: Duration,
    /// Interval of the built-in scheduler; `None` leaves triggering to an external scheduler.
    pub schedule_interval: Option<Duration>,

    pub page_size: u32,
    pub info_batch_size: usize,
    pub history_batch_size: usize,
    pub write_batch_size: usize,
    pub epoch_concurrency: usize,
    pub delegation_concurrency: usize,
    pub retry: RetryPolicy,

    pub include_delegator_snapshots: bool,
    pub backfill_from_epoch: Epoch,
    pub max_epochs_per_run: Option<usize>,
    pub min_quota_reserve: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            upstream_url: "https://api.koios.rest/api/v1".to_string(),
            upstream_token: None,
            upstream_timeout: Duration::from_secs(30),
            instance_id: InstanceId::generate(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            epoch_lease: Duration::from_secs(30 * 60),
            delegation_lease: Duration::from_secs(60 * 60),
            schedule_interval: None,
            page_size: 1000,
            info_batch_size: 50,
            history_batch_size: 50,
            write_batch_size: 500,
            epoch_concurrency: 4,
            delegation_concurrency: 2,
            retry: RetryPolicy::default(),
            include_delegator_snapshots: false,
            backfill_from_epoch: Epoch::GENESIS,
            max_epochs_per_run: None,
            min_quota_reserve: 100,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let instance_id = match get("GOVSYNC_INSTANCE_ID") {
            Some(id) => InstanceId::parse(id).context("GOVSYNC_INSTANCE_ID")?,
            None => defaults.instance_id,
        };

        let strategy = match get("GOVSYNC_RETRY_STRATEGY").as_deref() {
            None => defaults.retry.strategy,
            Some("exponential") => BackoffStrategy::Exponential,
            Some("fixed") => BackoffStrategy::Fixed,
            Some(other) => bail!("GOVSYNC_RETRY_STRATEGY: invalid value {other:?}"),
        };
        let max_attempts = parse_or(&get, "GOVSYNC_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        let base_delay = millis_or(&get, "GOVSYNC_RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?;
        let max_delay = millis_or(&get, "GOVSYNC_RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?;
        let retry = match (max_attempts, strategy) {
            (0 | 1, _) => RetryPolicy::no_retry(),
            (n, BackoffStrategy::Fixed) => RetryPolicy::fixed(n, base_delay),
            (n, BackoffStrategy::Exponential) => RetryPolicy::exponential(n, base_delay, max_delay),
        };

        let schedule_interval = get("GOVSYNC_SCHEDULE_INTERVAL_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("GOVSYNC_SCHEDULE_INTERVAL_SECS: invalid value {v:?}"))
            })
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            database_url: get("DATABASE_URL"),
            upstream_url: get("GOVSYNC_UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            upstream_token: get("GOVSYNC_UPSTREAM_TOKEN"),
            upstream_timeout: secs_or(&get, "GOVSYNC_UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout)?,
            instance_id,
            bind_addr: parse_or(&get, "GOVSYNC_BIND_ADDR", defaults.bind_addr)?,
            epoch_lease: secs_or(&get, "GOVSYNC_EPOCH_LEASE_SECS", defaults.epoch_lease)?,
            delegation_lease: secs_or(&get, "GOVSYNC_DELEGATION_LEASE_SECS", defaults.delegation_lease)?,
            schedule_interval,
            page_size: parse_or(&get, "GOVSYNC_PAGE_SIZE", defaults.page_size)?,
            info_batch_size: parse_or(&get, "GOVSYNC_INFO_BATCH_SIZE", defaults.info_batch_size)?,
            history_batch_size: parse_or(&get, "GOVSYNC_HISTORY_BATCH_SIZE", defaults.history_batch_size)?,
            write_batch_size: parse_or(&get, "GOVSYNC_WRITE_BATCH_SIZE", defaults.write_batch_size)?,
            epoch_concurrency: parse_or(&get, "GOVSYNC_EPOCH_CONCURRENCY", defaults.epoch_concurrency)?,
            delegation_concurrency: parse_or(
                &get,
                "GOVSYNC_DELEGATION_CONCURRENCY",
                defaults.delegation_concurrency,
            )?,
            retry,
            include_delegator_snapshots: parse_bool_or(
                &get,
                "GOVSYNC_INCLUDE_DELEGATOR_SNAPSHOTS",
                defaults.include_delegator_snapshots,
            )?,
            backfill_from_epoch: Epoch(parse_or(
                &get,
                "GOVSYNC_BACKFILL_FROM_EPOCH",
                defaults.backfill_from_epoch.number(),
            )?),
            // unset or 0: uncapped
            max_epochs_per_run: parse_or(&get, "GOVSYNC_MAX_EPOCHS_PER_RUN", 0usize)
                .map(|cap| Some(cap).filter(|cap| *cap > 0))?,
            min_quota_reserve: parse_or(&get, "GOVSYNC_MIN_QUOTA_RESERVE", defaults.min_quota_reserve)?,
        })
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key}: invalid value {raw:?}")),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{key}: expected a boolean, got {v:?}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.delegation_concurrency, 2);
        assert_eq!(config.backfill_from_epoch, Epoch(0));
        assert!(!config.include_delegator_snapshots);
        assert!(config.schedule_interval.is_none());
        assert!(config.max_epochs_per_run.is_none());
        assert!(config.instance_id.as_str().starts_with("govsync-"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/govsync"),
            ("GOVSYNC_INSTANCE_ID", "worker-7"),
            ("GOVSYNC_EPOCH_LEASE_SECS", "120"),
            ("GOVSYNC_INCLUDE_DELEGATOR_SNAPSHOTS", "true"),
            ("GOVSYNC_BACKFILL_FROM_EPOCH", "507"),
            ("GOVSYNC_RETRY_BASE_DELAY_MS", "250"),
            ("GOVSYNC_SCHEDULE_INTERVAL_SECS", "600"),
            ("GOVSYNC_BIND_ADDR", "127.0.0.1:9000"),
            ("GOVSYNC_MAX_EPOCHS_PER_RUN", "25"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/govsync"));
        assert_eq!(config.instance_id.as_str(), "worker-7");
        assert_eq!(config.epoch_lease, Duration::from_secs(120));
        assert!(config.include_delegator_snapshots);
        assert_eq!(config.backfill_from_epoch, Epoch(507));
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.schedule_interval, Some(Duration::from_secs(600)));
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_epochs_per_run, Some(25));
    }

    #[test]
    fn retry_strategy_selects_the_policy() {
        let fixed = SyncConfig::from_lookup(lookup(&[
            ("GOVSYNC_RETRY_STRATEGY", "fixed"),
            ("GOVSYNC_RETRY_MAX_ATTEMPTS", "3"),
            ("GOVSYNC_RETRY_BASE_DELAY_MS", "200"),
        ]))
        .unwrap();
        assert_eq!(fixed.retry, RetryPolicy::fixed(3, Duration::from_millis(200)));
        assert_eq!(fixed.retry.delay_for_attempt(3), Duration::from_millis(200));

        let single = SyncConfig::from_lookup(lookup(&[("GOVSYNC_RETRY_MAX_ATTEMPTS", "1")])).unwrap();
        assert_eq!(single.retry, RetryPolicy::no_retry());

        let err = SyncConfig::from_lookup(lookup(&[("GOVSYNC_RETRY_STRATEGY", "linear")])).unwrap_err();
        assert!(err.to_string().contains("GOVSYNC_RETRY_STRATEGY"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[("DATABASE_URL", "  "), ("GOVSYNC_PAGE_SIZE", "")])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = SyncConfig::from_lookup(lookup(&[("GOVSYNC_MAX_EPOCHS_PER_RUN", "lots")])).unwrap_err();
        assert!(err.to_string().contains("GOVSYNC_MAX_EPOCHS_PER_RUN"));

        let err = SyncConfig::from_lookup(lookup(&[("GOVSYNC_INCLUDE_DELEGATOR_SNAPSHOTS", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("GOVSYNC_INCLUDE_DELEGATOR_SNAPSHOTS"));
    }
}
