//! Consensus data model.

pub mod block;
pub mod hash;
pub mod part_set;
pub mod validator;
pub mod vote;

pub use block::{Block, BlockId, Commit, CommitSig, Header, Tx};
pub use hash::Hash;
pub use part_set::{Part, PartSet, PartSetHeader, BLOCK_PART_SIZE};
pub use validator::{Validator, ValidatorId, ValidatorSet};
pub use vote::{Proposal, SignStep, Signature, Vote, VoteType};
