//! Job names, lock state and run outcomes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use govsync_core::InstanceId;

/// Backfill of every epoch whose checkpoint is incomplete.
pub const EPOCH_SYNC_JOB: &str = "epoch-sync";
/// Delegation fan-out, backfill and diff.
pub const DELEGATION_SYNC_JOB: &str = "delegation-sync";
/// Epoch backfill followed by delegation sync, sharing one job cache.
pub const FULL_SYNC_JOB: &str = "full-sync";

/// Every job name the lock is taken for.
pub const JOB_NAMES: [&str; 3] = [EPOCH_SYNC_JOB, DELEGATION_SYNC_JOB, FULL_SYNC_JOB];

/// Outcome recorded on a lock row when it is released or reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Success,
    Failed,
    /// The lease ran out before the holder released it.
    Expired,
}

impl JobResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResult::Success => "success",
            JobResult::Failed => "failed",
            JobResult::Expired => "expired",
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(JobResult::Success),
            "failed" => Ok(JobResult::Failed),
            "expired" => Ok(JobResult::Expired),
            other => Err(format!("unknown job result: {other}")),
        }
    }
}

/// One row of the job lock table.
///
/// Created on the first acquire attempt for a job name and never deleted.
/// `is_running` implies `expires_at` is set; once it has passed the row is
/// reclaimable by any instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLockState {
    pub job_name: String,
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub locked_by: Option<InstanceId>,
    pub last_result: Option<JobResult>,
    pub error_message: Option<String>,
    pub items_processed: Option<u64>,
}

impl JobLockState {
    /// A fresh, never-acquired row.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            is_running: false,
            started_at: None,
            expires_at: None,
            locked_by: None,
            last_result: None,
            error_message: None,
            items_processed: None,
        }
    }

    /// Running with a lease that ran out before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_running && self.expires_at.is_some_and(|at| at < now)
    }

    pub fn is_held_by(&self, holder: &InstanceId) -> bool {
        self.is_running && self.locked_by.as_ref() == Some(holder)
    }
}

/// Result of [`DistributedJobLock::run_exclusive`](super::DistributedJobLock::run_exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum JobRun<T> {
    Completed(T),
    /// Another holder (this instance or another one) has a live lease.
    AlreadyRunning,
}

impl<T> JobRun<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            JobRun::Completed(v) => Some(v),
            JobRun::AlreadyRunning => None,
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, JobRun::AlreadyRunning)
    }
}

/// Implemented by job reports so the lock row can record how much work a run did.
pub trait JobReport {
    fn items_processed(&self) -> u64;
}

impl JobReport for () {
    fn items_processed(&self) -> u64 {
        0
    }
}
