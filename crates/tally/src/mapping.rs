//! Bucket → denominator mapping shared by the stake-weighted tallies.

use serde::{Deserialize, Serialize};

use govsync_core::Lovelace;

use crate::percent::Percent;

/// Pure descriptor of how raw buckets were folded into yes / no / abstain.
///
/// `denominator = yes + no + (not_voted if not_voted_counts)`. Abstain is
/// reported but never part of the denominator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMapping {
    pub yes: Lovelace,
    pub no: Lovelace,
    pub abstain: Lovelace,
    pub not_voted: Lovelace,
    pub not_voted_counts: bool,
}

impl BucketMapping {
    pub fn denominator(&self) -> Lovelace {
        let base = &self.yes + &self.no;
        if self.not_voted_counts {
            &base + &self.not_voted
        } else {
            base
        }
    }
}

/// Result of one stake-weighted tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTally {
    pub yes: Lovelace,
    pub no: Lovelace,
    pub abstain: Lovelace,
    pub not_voted: Lovelace,
    pub denominator: Lovelace,
    pub yes_pct: Percent,
    pub no_pct: Percent,
    /// Share of the denominator taken by the not-voted residual; zero when the
    /// residual is excluded from the denominator.
    pub not_voted_pct: Percent,
    /// `true` when the not-voted residual was clamped at zero.
    pub not_voted_clamped: bool,
}

impl StakeTally {
    pub fn from_mapping(mapping: BucketMapping, not_voted_clamped: bool) -> Self {
        let denominator = mapping.denominator();
        let den = denominator.as_biguint();
        let not_voted_pct = if mapping.not_voted_counts {
            Percent::of(mapping.not_voted.as_biguint(), den)
        } else {
            Percent::ZERO
        };
        Self {
            yes_pct: Percent::of(mapping.yes.as_biguint(), den),
            no_pct: Percent::of(mapping.no.as_biguint(), den),
            not_voted_pct,
            yes: mapping.yes,
            no: mapping.no,
            abstain: mapping.abstain,
            not_voted: mapping.not_voted,
            denominator,
            not_voted_clamped,
        }
    }

    /// Whether anything at all was counted.
    pub fn has_votes(&self) -> bool {
        !self.denominator.is_zero()
    }

    /// Exact threshold check of `yes / denominator`.
    pub fn meets(&self, threshold: Percent) -> bool {
        threshold.is_met_by(self.yes.as_biguint(), self.denominator.as_biguint())
    }
}
