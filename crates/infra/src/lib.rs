//! `govsync-infra`: the synchronization and consistency core.
//!
//! - [`jobs`]: lease-based job lock, retry with backoff, bounded fan-out, job entry points
//! - [`upstream`]: the ledger API contract and its HTTP adapter
//! - [`store`]: persistence traits with in-memory and Postgres implementations
//! - [`sync`]: the per-epoch checkpoint orchestrator and the delegation change tracker
//! - [`config`]: environment-driven configuration

pub mod config;
pub mod error;
pub mod jobs;
pub mod store;
pub mod sync;
pub mod upstream;

pub use config::SyncConfig;
pub use error::SyncError;
pub use jobs::SyncJobs;
