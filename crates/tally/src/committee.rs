//! Constitutional committee tally: fixed-size roster, headcount-based.

use std::collections::HashMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use govsync_core::{CommitteeMemberId, Vote};

use crate::percent::Percent;
use crate::snapshot::{CommitteeSnapshot, CommitteeVoteRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeTally {
    pub roster_size: u32,
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    /// Members who did not vote. Reported separately, but since the denominator is
    /// `roster_size - abstain` they weigh against approval exactly like "no".
    pub not_voted: u32,
    pub denominator: u32,
    pub yes_pct: Percent,
    pub no_pct: Percent,
    pub not_voted_pct: Percent,
    /// `true` when counted votes exceeded the roster and the residual was clamped.
    pub not_voted_clamped: bool,
    /// Earlier votes dropped because the same member voted again later.
    pub superseded_votes: usize,
}

impl CommitteeTally {
    pub fn has_votes(&self) -> bool {
        self.denominator > 0
    }

    pub fn meets(&self, threshold: Percent) -> bool {
        threshold.is_met_by(&BigUint::from(self.yes), &BigUint::from(self.denominator))
    }
}

/// Keep only each member's most recent vote.
///
/// Recency is vote time, falling back to record time; on an exact tie the record
/// that appears later wins.
pub fn latest_votes(votes: &[CommitteeVoteRecord]) -> Vec<&CommitteeVoteRecord> {
    let mut latest: HashMap<&CommitteeMemberId, &CommitteeVoteRecord> = HashMap::new();
    for v in votes {
        match latest.get(&v.member) {
            Some(existing) if existing.effective_time() > v.effective_time() => {}
            _ => {
                latest.insert(&v.member, v);
            }
        }
    }
    let mut out: Vec<_> = latest.into_values().collect();
    out.sort_by(|a, b| a.member.cmp(&b.member));
    out
}

pub fn tally_committee(snapshot: &CommitteeSnapshot) -> CommitteeTally {
    let counted = latest_votes(&snapshot.votes);
    let superseded_votes = snapshot.votes.len() - counted.len();

    let (mut yes, mut no, mut abstain) = (0u32, 0u32, 0u32);
    for v in &counted {
        match v.vote {
            Vote::Yes => yes += 1,
            Vote::No => no += 1,
            Vote::Abstain => abstain += 1,
        }
    }

    let roster = snapshot.roster_size;
    let cast = yes + no + abstain;
    let not_voted_clamped = cast > roster;
    if not_voted_clamped {
        tracing::warn!(
            roster_size = roster,
            votes = cast,
            "committee votes exceed roster size; not-voted residual clamped to zero"
        );
    }
    let not_voted = roster.saturating_sub(cast);
    let denominator = roster.saturating_sub(abstain);

    let pct = |n: u32| Percent::of_counts(u64::from(n), u64::from(denominator));

    CommitteeTally {
        roster_size: roster,
        yes,
        no,
        abstain,
        not_voted,
        denominator,
        yes_pct: pct(yes),
        no_pct: pct(no),
        not_voted_pct: pct(not_voted),
        not_voted_clamped,
        superseded_votes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn member(n: u32) -> CommitteeMemberId {
        CommitteeMemberId::parse(format!("cc_cold1member{n}")).unwrap()
    }

    fn vote(n: u32, v: Vote, minute: i64) -> CommitteeVoteRecord {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        CommitteeVoteRecord {
            member: member(n),
            vote: v,
            voted_at: Some(base + Duration::minutes(minute)),
            recorded_at: base + Duration::minutes(minute + 1),
        }
    }

    fn snapshot(votes: Vec<CommitteeVoteRecord>) -> CommitteeSnapshot {
        CommitteeSnapshot {
            roster_size: 7,
            votes,
        }
    }

    #[test]
    fn five_of_seven_passes_constitutional_threshold() {
        let mut votes: Vec<_> = (0..5).map(|n| vote(n, Vote::Yes, 0)).collect();
        votes.push(vote(5, Vote::No, 0));
        let t = tally_committee(&snapshot(votes));

        assert_eq!(t.denominator, 7);
        assert_eq!(t.yes_pct.to_string(), "71.42");
        assert_eq!(t.not_voted, 1);
        assert!(t.meets(Percent::from_whole(67)));
    }

    #[test]
    fn non_voters_weigh_like_no() {
        let votes: Vec<_> = (0..4).map(|n| vote(n, Vote::Yes, 0)).collect();
        let t = tally_committee(&snapshot(votes));

        assert_eq!(t.not_voted, 3);
        assert_eq!(t.denominator, 7);
        assert_eq!(t.yes_pct.to_string(), "57.14");
        assert!(!t.meets(Percent::from_whole(67)));
    }

    #[test]
    fn abstentions_shrink_the_denominator() {
        let votes = vec![
            vote(0, Vote::Yes, 0),
            vote(1, Vote::Yes, 0),
            vote(2, Vote::Yes, 0),
            vote(3, Vote::Yes, 0),
            vote(4, Vote::Abstain, 0),
            vote(5, Vote::Abstain, 0),
        ];
        let t = tally_committee(&snapshot(votes));
        assert_eq!(t.denominator, 5);
        assert_eq!(t.yes_pct.to_string(), "80.00");
    }

    #[test]
    fn only_latest_vote_per_member_counts() {
        let votes = vec![
            vote(0, Vote::No, 10),
            vote(0, Vote::Yes, 20),
            vote(1, Vote::Yes, 30),
            vote(1, Vote::Abstain, 5),
        ];
        let t = tally_committee(&snapshot(votes));
        assert_eq!(t.yes, 2);
        assert_eq!(t.no, 0);
        assert_eq!(t.abstain, 0);
        assert_eq!(t.superseded_votes, 2);
    }

    #[test]
    fn record_time_breaks_missing_vote_time() {
        let mut early = vote(0, Vote::No, 0);
        early.voted_at = None; // recorded at minute 1
        let late = vote(0, Vote::Yes, 3);
        let t = tally_committee(&snapshot(vec![late, early]));
        assert_eq!(t.yes, 1);
        assert_eq!(t.no, 0);
    }

    #[test]
    fn empty_roster_has_no_votes() {
        let t = tally_committee(&CommitteeSnapshot {
            roster_size: 0,
            votes: vec![],
        });
        assert!(!t.has_votes());
        assert_eq!(t.yes_pct, Percent::ZERO);
        assert!(!t.meets(Percent::from_whole(67)));
    }
}
