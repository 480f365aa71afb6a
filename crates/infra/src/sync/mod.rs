//! Sync pipelines that keep the local store consistent with the upstream ledger.
//!
//! - [`EpochCheckpointOrchestrator`]: per-epoch aggregates, computed exactly once
//! - [`DelegationChangeTracker`]: delegation state plus change log, with resumable backfill
//!
//! Both read upstream through [`LedgerSource`] and share a per-invocation [`JobCache`].

mod cache;
mod delegation;
mod epoch;
mod source;

pub use cache::JobCache;
pub use delegation::{
    DelegationChangeTracker, DelegationSyncReport, DelegationSyncSettings, EntityFailure,
    FULL_BACKFILL_JOB, INCREMENTAL_BACKFILL_JOB,
};
pub use epoch::{
    EpochBackfillReport, EpochCheckpointOrchestrator, EpochFailure, EpochSyncReport,
    EpochSyncSettings,
};
pub use source::LedgerSource;
