//! `govsync-tally`: vote-tally engine.
//!
//! Pure functions, no I/O: stored proposal ledger snapshots go in, ratification
//! percentages come out. Sums stay in arbitrary-precision integers; percentages
//! are truncated (never rounded) to two decimals so that results are identical
//! across implementations.
//!
//! ## Voter classes
//!
//! - [`tally_drep`]: continuous stake-weighted with an inactive bucket
//! - [`tally_spo`]: stake-weighted, with a formula that changed at a fixed cutover
//! - [`tally_committee`]: fixed-size roster, headcount-based
//!
//! [`tally_proposal`] runs all three over one snapshot and evaluates thresholds.

pub mod committee;
pub mod drep;
pub mod mapping;
pub mod percent;
pub mod proposal;
pub mod snapshot;
pub mod spo;
pub mod threshold;

pub use committee::{CommitteeTally, tally_committee};
pub use drep::tally_drep;
pub use mapping::{BucketMapping, StakeTally};
pub use percent::Percent;
pub use proposal::{ProposalTally, tally_proposal};
pub use snapshot::{CommitteeSnapshot, CommitteeVoteRecord, ProposalLedgerSnapshot, StakeBuckets};
pub use spo::{FormulaCutover, SpoFormula, tally_spo};
pub use threshold::{
    ClassThresholds, ClassVerdict, Ratification, RatificationStatus, ThresholdTable, evaluate,
};
