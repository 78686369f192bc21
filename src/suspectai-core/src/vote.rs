//! Ballot collection and elimination resolution.
//!
//! One ballot per eligible voter. Ties never eliminate the human: the human
//! is dropped from a tied set, and an emptied set falls back to a random
//! remaining AI.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::VoteRejection;
use crate::participant::ParticipantId;

/// How the eliminated participant was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// A single participant had the most votes.
    Majority,
    /// Several tied; one was drawn at random (never the human).
    TieBreak,
    /// Nobody eligible was left after protecting the human, or no ballots
    /// were cast; a random remaining AI was drawn.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyEntry {
    pub target: ParticipantId,
    pub votes: usize,
}

/// Published result of a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub eliminated: ParticipantId,
    pub tally: Vec<TallyEntry>,
    pub resolution: Resolution,
    /// The eliminated participant is the human: the game is lost.
    pub human_identified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub voter: ParticipantId,
    pub target: ParticipantId,
}

/// Whether the ballot is complete after a vote was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteProgress {
    Pending { cast: usize, needed: usize },
    Complete,
}

#[derive(Debug, Default)]
pub struct VoteResolver {
    open: bool,
    eligible: BTreeSet<ParticipantId>,
    candidates: BTreeSet<ParticipantId>,
    ballots: BTreeMap<ParticipantId, ParticipantId>,
    outcome: Option<VoteOutcome>,
}

impl VoteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh ballot. Any previous votes are discarded.
    pub fn open(&mut self, voters: &[ParticipantId], candidates: &[ParticipantId]) {
        self.clear();
        self.open = true;
        self.eligible = voters.iter().copied().collect();
        self.candidates = candidates.iter().copied().collect();
    }

    /// Close the ballot and forget every vote.
    pub fn clear(&mut self) {
        self.open = false;
        self.eligible.clear();
        self.candidates.clear();
        self.ballots.clear();
        self.outcome = None;
    }

    pub fn is_open(&self) -> bool {
        self.open && self.outcome.is_none()
    }

    pub fn register_vote(
        &mut self,
        voter: ParticipantId,
        target: ParticipantId,
    ) -> Result<VoteProgress, VoteRejection> {
        if !self.is_open() {
            return Err(VoteRejection::Closed);
        }
        if !self.eligible.contains(&voter) {
            return Err(VoteRejection::NotEligible);
        }
        if self.ballots.contains_key(&voter) {
            return Err(VoteRejection::AlreadyVoted);
        }
        if voter == target {
            return Err(VoteRejection::SelfVote);
        }
        if !self.candidates.contains(&target) {
            return Err(VoteRejection::InvalidTarget);
        }
        self.ballots.insert(voter, target);
        Ok(self.progress())
    }

    /// A voter left (disconnected); they no longer hold up the ballot.
    pub fn remove_voter(&mut self, voter: ParticipantId) -> VoteProgress {
        if self.eligible.remove(&voter) {
            self.ballots.remove(&voter);
        }
        self.progress()
    }

    pub fn progress(&self) -> VoteProgress {
        let needed = self.eligible.len();
        let cast = self.ballots.len();
        if cast >= needed {
            VoteProgress::Complete
        } else {
            VoteProgress::Pending { cast, needed }
        }
    }

    pub fn ballots(&self) -> Vec<Ballot> {
        self.ballots
            .iter()
            .map(|(voter, target)| Ballot {
                voter: *voter,
                target: *target,
            })
            .collect()
    }

    /// Votes per target, highest first, ties by slot order.
    pub fn tally(&self) -> Vec<TallyEntry> {
        let mut counts: BTreeMap<ParticipantId, usize> = BTreeMap::new();
        for target in self.ballots.values() {
            *counts.entry(*target).or_default() += 1;
        }
        let mut tally: Vec<TallyEntry> = counts
            .into_iter()
            .map(|(target, votes)| TallyEntry { target, votes })
            .collect();
        tally.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.target.cmp(&b.target)));
        tally
    }

    /// Decide who is eliminated and close the ballot.
    ///
    /// `remaining_ais` is the fallback pool; `human` is protected from ties.
    /// Returns `None` only if there is nobody at all to eliminate.
    pub fn resolve<R: Rng + ?Sized>(
        &mut self,
        remaining_ais: &[ParticipantId],
        human: Option<ParticipantId>,
        rng: &mut R,
    ) -> Option<VoteOutcome> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.clone());
        }

        let tally = self.tally();
        let max = tally.first().map(|t| t.votes).unwrap_or(0);
        let mut leaders: Vec<ParticipantId> = tally
            .iter()
            .filter(|t| t.votes == max && max > 0)
            .map(|t| t.target)
            .collect();

        let (eliminated, resolution) = match leaders.len() {
            1 => (leaders[0], Resolution::Majority),
            0 => (*remaining_ais.choose(rng)?, Resolution::Fallback),
            _ => {
                if let Some(human) = human {
                    leaders.retain(|id| *id != human);
                }
                match leaders.choose(rng) {
                    Some(id) => (*id, Resolution::TieBreak),
                    None => (*remaining_ais.choose(rng)?, Resolution::Fallback),
                }
            }
        };

        let outcome = VoteOutcome {
            eliminated,
            tally,
            resolution,
            human_identified: human == Some(eliminated),
        };
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    pub fn outcome(&self) -> Option<&VoteOutcome> {
        self.outcome.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const HUMAN: ParticipantId = ParticipantId(0);
    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);
    const C: ParticipantId = ParticipantId(3);
    const D: ParticipantId = ParticipantId(4);

    fn players() -> Vec<ParticipantId> {
        vec![HUMAN, A, B, C, D]
    }

    #[test]
    fn test_rejects_invalid_ballots() {
        let mut v = VoteResolver::new();
        assert_eq!(v.register_vote(A, B), Err(VoteRejection::Closed));
        v.open(&[HUMAN, A, B], &[HUMAN, A, B]);
        assert_eq!(v.register_vote(A, A), Err(VoteRejection::SelfVote));
        assert_eq!(v.register_vote(C, A), Err(VoteRejection::NotEligible));
        assert_eq!(v.register_vote(A, C), Err(VoteRejection::InvalidTarget));
        assert!(v.register_vote(A, B).is_ok());
        assert_eq!(v.register_vote(A, HUMAN), Err(VoteRejection::AlreadyVoted));
        assert_eq!(v.ballots().len(), 1);
    }

    #[test]
    fn test_completes_when_everyone_voted() {
        let mut v = VoteResolver::new();
        v.open(&[HUMAN, A, B], &[HUMAN, A, B]);
        assert_eq!(
            v.register_vote(A, B),
            Ok(VoteProgress::Pending { cast: 1, needed: 3 })
        );
        v.register_vote(B, A).unwrap();
        assert_eq!(v.register_vote(HUMAN, A), Ok(VoteProgress::Complete));
    }

    #[test]
    fn test_clear_discards_votes() {
        let mut v = VoteResolver::new();
        v.open(&[A, B], &[A, B]);
        v.register_vote(A, B).unwrap();
        v.clear();
        assert!(!v.is_open());
        assert!(v.ballots().is_empty());
        v.open(&[A, B], &[A, B]);
        assert!(v.register_vote(A, B).is_ok());
    }

    #[test]
    fn test_removed_voter_can_complete_ballot() {
        let mut v = VoteResolver::new();
        v.open(&[A, B, C], &[A, B, C]);
        v.register_vote(A, B).unwrap();
        v.register_vote(B, A).unwrap();
        assert_eq!(v.remove_voter(C), VoteProgress::Complete);
    }

    #[test]
    fn test_clear_majority() {
        // {A:3, B:1, C:1}
        let mut v = VoteResolver::new();
        v.open(&players(), &players());
        v.register_vote(HUMAN, A).unwrap();
        v.register_vote(B, A).unwrap();
        v.register_vote(C, A).unwrap();
        v.register_vote(A, B).unwrap();
        v.register_vote(D, C).unwrap();
        for seed in 0..10 {
            let mut fresh = VoteResolver::new();
            fresh.open(&players(), &players());
            for b in v.ballots() {
                fresh.register_vote(b.voter, b.target).unwrap();
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = fresh.resolve(&[A, B, C, D], Some(HUMAN), &mut rng).unwrap();
            assert_eq!(outcome.eliminated, A);
            assert_eq!(outcome.resolution, Resolution::Majority);
            assert!(!outcome.human_identified);
        }
    }

    #[test]
    fn test_human_protected_in_two_way_tie() {
        // {HUMAN:2, A:2}
        for seed in 0..25 {
            let mut v = VoteResolver::new();
            v.open(&players(), &players());
            v.register_vote(A, HUMAN).unwrap();
            v.register_vote(B, HUMAN).unwrap();
            v.register_vote(C, A).unwrap();
            v.register_vote(HUMAN, A).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = v.resolve(&[A, B, C, D], Some(HUMAN), &mut rng).unwrap();
            assert_eq!(outcome.eliminated, A);
            assert_eq!(outcome.resolution, Resolution::TieBreak);
            assert!(!outcome.human_identified);
        }
    }

    #[test]
    fn test_tie_among_ais_picks_a_tied_member() {
        for seed in 0..25 {
            let mut v = VoteResolver::new();
            v.open(&players(), &players());
            v.register_vote(HUMAN, A).unwrap();
            v.register_vote(C, A).unwrap();
            v.register_vote(A, B).unwrap();
            v.register_vote(D, B).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = v.resolve(&[A, B, C, D], Some(HUMAN), &mut rng).unwrap();
            assert!(outcome.eliminated == A || outcome.eliminated == B);
        }
    }

    #[test]
    fn test_everyone_votes_human() {
        let mut v = VoteResolver::new();
        v.open(&[HUMAN, A, B, C], &[HUMAN, A, B, C]);
        v.register_vote(A, HUMAN).unwrap();
        v.register_vote(B, HUMAN).unwrap();
        v.register_vote(C, HUMAN).unwrap();
        v.register_vote(HUMAN, A).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = v.resolve(&[A, B, C], Some(HUMAN), &mut rng).unwrap();
        assert_eq!(outcome.eliminated, HUMAN);
        assert!(outcome.human_identified);
        assert_eq!(outcome.tally[0], TallyEntry { target: HUMAN, votes: 3 });
    }

    #[test]
    fn test_no_ballots_falls_back_to_random_ai() {
        let mut v = VoteResolver::new();
        v.open(&[HUMAN, A, B], &[HUMAN, A, B]);
        let mut rng = StdRng::seed_from_u64(9);
        let outcome = v.resolve(&[A, B], Some(HUMAN), &mut rng).unwrap();
        assert!(outcome.eliminated == A || outcome.eliminated == B);
        assert_eq!(outcome.resolution, Resolution::Fallback);
        assert!(!v.is_open());
    }

    #[test]
    fn test_resolve_is_stable_once_decided() {
        let mut v = VoteResolver::new();
        v.open(&[A, B, C], &[A, B, C]);
        v.register_vote(A, B).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let first = v.resolve(&[A, B, C], None, &mut rng).unwrap();
        let second = v.resolve(&[A, B, C], None, &mut rng).unwrap();
        assert_eq!(first, second);
        assert_eq!(v.register_vote(C, A), Err(VoteRejection::Closed));
    }
}
