//! `govsync-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, arbitrary-precision ledger amounts, epochs and governance enums.

pub mod amount;
pub mod epoch;
pub mod error;
pub mod governance;
pub mod id;

pub use amount::Lovelace;
pub use epoch::Epoch;
pub use error::{DomainError, DomainResult};
pub use governance::{GovActionType, Vote, VoterClass};
pub use id::{CommitteeMemberId, DelegateId, InstanceId, ProposalId, StakeAddress};
