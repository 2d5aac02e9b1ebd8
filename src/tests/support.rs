//! Shared builders for kernel tests.

use crate::state::{Action, ChainState, ConsensusCore, Genesis, TimeoutParams};
use crate::types::{
    Block, BlockId, Commit, Signature, Validator, ValidatorId, ValidatorSet, Vote, VoteType,
};
use crate::wal::{ConsensusMessage, EventMessage, PeerId, WalMessage};
use std::vec::Vec;

pub fn validators(n: u64) -> ValidatorSet {
    ValidatorSet::new(
        (0..n)
            .map(|i| Validator {
                id: ValidatorId(i),
                voting_power: 10,
            })
            .collect(),
    )
}

pub fn genesis_state(n: u64) -> ChainState {
    Genesis::new("test-chain", validators(n)).to_state()
}

pub fn fake_sig(validator: ValidatorId, bytes: &[u8]) -> Signature {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&validator.0.to_le_bytes());
    hasher.update(bytes);
    Signature(*hasher.finalize().as_bytes())
}

pub fn vote(
    vote_type: VoteType,
    height: u64,
    round: u32,
    block_id: Option<BlockId>,
    validator: ValidatorId,
) -> Vote {
    let mut v = Vote {
        vote_type,
        height,
        round,
        block_id,
        validator,
        signature: Signature::default(),
    };
    let bytes = v.sign_bytes("test-chain").unwrap();
    v.signature = fake_sig(validator, &bytes);
    v
}

pub fn event(msg: ConsensusMessage) -> WalMessage {
    WalMessage::Event(EventMessage {
        msg,
        peer: PeerId::local(),
    })
}

pub fn vote_msg(v: Vote) -> WalMessage {
    event(ConsensusMessage::Vote(v))
}

pub fn core(n: u64, own: u64) -> ConsensusCore {
    ConsensusCore::new(genesis_state(n), None, Some(ValidatorId(own)), TimeoutParams::default())
}

pub fn timeout_of(actions: &[Action]) -> Option<WalMessage> {
    actions.iter().rev().find_map(|a| match a {
        Action::ScheduleTimeout(ti) => Some(WalMessage::Timeout(*ti)),
        _ => None,
    })
}

/// Drives a single-validator core through one height, recording every
/// message it was fed. Returns the finalized block and commit.
pub fn drive_height(
    core: &mut ConsensusCore,
    txs: Vec<Vec<u8>>,
    log: &mut Vec<WalMessage>,
) -> (Block, Commit) {
    let own = core.own_id().unwrap();
    let mut queue: Vec<WalMessage> = Vec::new();
    queue.push(timeout_of(&core.start()).unwrap());
    let mut txs = Some(txs);

    while !queue.is_empty() {
        let msg = queue.remove(0);
        log.push(msg.clone());
        for action in core.handle(&msg).unwrap() {
            match action {
                Action::Propose { .. } => {
                    let draft = core.draft_proposal(txs.take().unwrap_or_default()).unwrap();
                    queue.push(event(ConsensusMessage::Proposal(draft.proposal.clone())));
                    for part in draft.parts.parts() {
                        queue.push(event(ConsensusMessage::BlockPart {
                            height: draft.proposal.height,
                            round: draft.proposal.round,
                            part: part.clone(),
                        }));
                    }
                }
                Action::SignVote {
                    vote_type,
                    height,
                    round,
                    block_id,
                } => queue.push(vote_msg(vote(vote_type, height, round, block_id, own))),
                Action::Finalize { block, commit } => return (block, commit),
                Action::ScheduleTimeout(_) | Action::Notify(_) => {}
            }
        }
    }
    panic!("height did not finalize");
}

/// Chain state after `block` is applied with an unchanged app hash.
pub fn advance(core: &ConsensusCore, block: &Block) -> ChainState {
    let id = block.block_id(core.part_size()).unwrap();
    core.chain()
        .next_state(block.height(), id, core.chain().app_hash, core.chain().last_results_hash)
}
