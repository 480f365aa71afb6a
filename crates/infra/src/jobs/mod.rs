//! Job coordination: lease lock, retry, bounded fan-out and job entry points.
//!
//! ## Components
//!
//! - `DistributedJobLock`: lease row per job name, reclaimable after expiry
//! - `retry_with_backoff`: bounded exponential backoff for one outbound call
//! - `ConcurrencyLimitedFetcher`: fan-out with at most N units in flight
//! - `SyncJobs`: `acquire -> run -> release` entry points for the sync pipelines

pub mod fetcher;
pub mod lock;
pub mod retry;
pub mod runner;
pub mod types;

pub use fetcher::{BatchOutcome, ConcurrencyLimitedFetcher};
pub use lock::DistributedJobLock;
pub use retry::{BackoffStrategy, RetryPolicy, Retryable, retry_with_backoff};
pub use runner::{FullSyncReport, JobLeases, SyncJobs};
pub use types::{
    DELEGATION_SYNC_JOB, EPOCH_SYNC_JOB, FULL_SYNC_JOB, JOB_NAMES, JobLockState, JobReport,
    JobResult, JobRun,
};
