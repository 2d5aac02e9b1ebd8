// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory state of the height being decided.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::state::vote_set::HeightVoteSet;
use crate::types::{Block, Commit, PartSet, Proposal, ValidatorSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    NewHeight,
    NewRound,
    Propose,
    Prevote,
    PrevoteWait,
    Precommit,
    PrecommitWait,
    Commit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::NewHeight => "NewHeight",
            Step::NewRound => "NewRound",
            Step::Propose => "Propose",
            Step::Prevote => "Prevote",
            Step::PrevoteWait => "PrevoteWait",
            Step::Precommit => "Precommit",
            Step::PrecommitWait => "PrecommitWait",
            Step::Commit => "Commit",
        };
        f.write_str(s)
    }
}

/// Pure fold over the messages of one height. Two instances that saw the
/// same messages in the same order compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundState {
    pub height: u64,
    pub round: u32,
    pub step: Step,
    pub proposal: Option<Proposal>,
    pub proposal_block: Option<Block>,
    pub proposal_block_parts: Option<PartSet>,
    pub locked_round: Option<u32>,
    pub locked_block: Option<Block>,
    pub votes: HeightVoteSet,
    pub commit_round: Option<u32>,
    /// Commit for the previous height, carried into the next proposal.
    pub last_commit: Option<Commit>,
}

impl RoundState {
    pub fn new(height: u64, validators: ValidatorSet, last_commit: Option<Commit>) -> Self {
        Self {
            height,
            round: 0,
            step: Step::NewHeight,
            proposal: None,
            proposal_block: None,
            proposal_block_parts: None,
            locked_round: None,
            locked_block: None,
            votes: HeightVoteSet::new(height, validators),
            commit_round: None,
            last_commit,
        }
    }
}
