//! Round state, vote tallies, chain state and the transition function.

pub mod chain;
pub mod machine;
pub mod round_state;
pub mod vote_set;

pub use chain::{ChainState, Genesis};
pub use machine::{Action, ConsensusCore, Notice, ProposalDraft, TimeoutParams};
pub use round_state::{RoundState, Step};
pub use vote_set::{HeightVoteSet, VoteSet};
