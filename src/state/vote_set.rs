// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Vote tallies.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::types::{BlockId, Commit, CommitSig, ValidatorId, ValidatorSet, Vote, VoteType};

/// Votes of one type from one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteSet {
    height: u64,
    round: u32,
    vote_type: VoteType,
    votes: BTreeMap<ValidatorId, Vote>,
    power_by_block: BTreeMap<Option<BlockId>, u64>,
    sum: u64,
    quorum: u64,
}

impl VoteSet {
    pub fn new(height: u64, round: u32, vote_type: VoteType, validators: &ValidatorSet) -> Self {
        Self {
            height,
            round,
            vote_type,
            votes: BTreeMap::new(),
            power_by_block: BTreeMap::new(),
            sum: 0,
            quorum: validators.quorum(),
        }
    }

    pub fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    /// Returns `Ok(false)` for an exact duplicate.
    pub fn add_vote(&mut self, vote: Vote, validators: &ValidatorSet) -> KernelResult<bool> {
        if vote.height != self.height {
            return Err(KernelError::WrongHeight {
                expected: self.height,
                got: vote.height,
            });
        }
        if vote.round != self.round {
            return Err(KernelError::WrongRound {
                expected: self.round,
                got: vote.round,
            });
        }
        let power = validators
            .get(vote.validator)
            .ok_or(KernelError::UnknownValidator(vote.validator))?
            .voting_power;

        if let Some(existing) = self.votes.get(&vote.validator) {
            if existing.block_id == vote.block_id {
                return Ok(false);
            }
            return Err(KernelError::ConflictingVote {
                validator: vote.validator,
                round: vote.round,
            });
        }

        *self.power_by_block.entry(vote.block_id).or_insert(0) += power;
        self.sum += power;
        self.votes.insert(vote.validator, vote);
        Ok(true)
    }

    pub fn get(&self, validator: ValidatorId) -> Option<&Vote> {
        self.votes.get(&validator)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn has_two_thirds_any(&self) -> bool {
        self.sum >= self.quorum
    }

    /// `Some(None)` is a quorum for nil.
    pub fn two_thirds_majority(&self) -> Option<Option<BlockId>> {
        self.power_by_block
            .iter()
            .find(|(_, power)| **power >= self.quorum)
            .map(|(id, _)| *id)
    }

    /// Commit built from the precommits backing the majority block.
    pub fn make_commit(&self) -> Option<Commit> {
        if self.vote_type != VoteType::Precommit {
            return None;
        }
        let block_id = self.two_thirds_majority()??;
        let signatures: Vec<CommitSig> = self
            .votes
            .values()
            .filter(|v| v.block_id == Some(block_id))
            .map(|v| CommitSig {
                validator: v.validator,
                signature: v.signature,
            })
            .collect();
        Some(Commit {
            height: self.height,
            round: self.round,
            block_id,
            signatures,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RoundVotes {
    prevotes: VoteSet,
    precommits: VoteSet,
}

/// Every vote seen at one height, keyed by round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeightVoteSet {
    height: u64,
    validators: ValidatorSet,
    rounds: BTreeMap<u32, RoundVotes>,
}

impl HeightVoteSet {
    pub fn new(height: u64, validators: ValidatorSet) -> Self {
        Self {
            height,
            validators,
            rounds: BTreeMap::new(),
        }
    }

    pub fn add_vote(&mut self, vote: Vote) -> KernelResult<bool> {
        let height = self.height;
        let validators = &self.validators;
        let round = self.rounds.entry(vote.round).or_insert_with(|| RoundVotes {
            prevotes: VoteSet::new(height, vote.round, VoteType::Prevote, validators),
            precommits: VoteSet::new(height, vote.round, VoteType::Precommit, validators),
        });
        match vote.vote_type {
            VoteType::Prevote => round.prevotes.add_vote(vote, validators),
            VoteType::Precommit => round.precommits.add_vote(vote, validators),
        }
    }

    pub fn prevotes(&self, round: u32) -> Option<&VoteSet> {
        self.rounds.get(&round).map(|r| &r.prevotes)
    }

    pub fn precommits(&self, round: u32) -> Option<&VoteSet> {
        self.rounds.get(&round).map(|r| &r.precommits)
    }

    pub fn has_vote(&self, validator: ValidatorId, round: u32, vote_type: VoteType) -> bool {
        let set = match vote_type {
            VoteType::Prevote => self.prevotes(round),
            VoteType::Precommit => self.precommits(round),
        };
        set.map_or(false, |s| s.get(validator).is_some())
    }
}
