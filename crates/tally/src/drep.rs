//! Delegated-representative tally: continuous stake-weighted with an inactive bucket.

use govsync_core::GovActionType;

use crate::mapping::{BucketMapping, StakeTally};
use crate::snapshot::StakeBuckets;

/// Fold DRep buckets.
///
/// `not_voted = max(0, total - yes - no - abstain - always_abstain -
/// always_no_confidence - inactive)` and the denominator is
/// `yes + no + always_no_confidence + not_voted`. On a no-confidence motion the
/// always-no-confidence stake supports the motion and is counted as yes.
pub fn drep_mapping(buckets: &StakeBuckets, action: GovActionType) -> (BucketMapping, bool) {
    let (not_voted, clamped) = buckets.not_voted();
    let abstain = &buckets.abstain + &buckets.always_abstain;

    let (yes, no) = if action == GovActionType::NoConfidence {
        (&buckets.yes + &buckets.always_no_confidence, buckets.no.clone())
    } else {
        (buckets.yes.clone(), &buckets.no + &buckets.always_no_confidence)
    };

    let mapping = BucketMapping {
        yes,
        no,
        abstain,
        not_voted,
        not_voted_counts: true,
    };
    (mapping, clamped)
}

pub fn tally_drep(buckets: &StakeBuckets, action: GovActionType) -> StakeTally {
    let (mapping, clamped) = drep_mapping(buckets, action);
    if clamped {
        tracing::warn!(
            total = %buckets.total,
            "drep buckets exceed total stake; not-voted residual clamped to zero"
        );
    }
    StakeTally::from_mapping(mapping, clamped)
}
