// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::error::KernelError;
use crate::state::{Action, ConsensusCore, Notice, Step, TimeoutParams};
use crate::tests::support::{advance, core, drive_height, event, genesis_state, timeout_of, vote, vote_msg};
use crate::types::{Signature, ValidatorId, VoteType};
use crate::wal::{ConsensusMessage, TimeoutInfo, WalMessage};
use std::vec::Vec;

fn timeout(height: u64, round: u32, step: Step) -> WalMessage {
    WalMessage::Timeout(TimeoutInfo {
        duration_ms: 0,
        height,
        round,
        step,
    })
}

fn sign_votes(actions: &[Action]) -> Vec<(VoteType, Option<crate::types::BlockId>)> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::SignVote { vote_type, block_id, .. } => Some((*vote_type, *block_id)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_single_validator_commits_height() {
    let mut c = core(1, 0);
    let mut log = Vec::new();
    let (block, commit) = drive_height(&mut c, vec![b"a=1".to_vec()], &mut log);

    assert_eq!(block.height(), 1);
    assert_eq!(block.txs, vec![b"a=1".to_vec()]);
    assert_eq!(commit.block_id.hash, block.hash().unwrap());
    assert_eq!(commit.round, 0);
    assert_eq!(c.round_state().step, Step::Commit);
    assert_eq!(c.round_state().locked_round, Some(0));
}

#[test]
fn test_enter_new_height_resets_round_state() {
    let mut c = core(1, 0);
    let mut log = Vec::new();
    let (block, commit) = drive_height(&mut c, vec![], &mut log);
    let next = advance(&c, &block);

    let actions = c.enter_new_height(next, commit.clone());
    assert_eq!(c.height(), 2);
    assert_eq!(c.round_state().step, Step::NewHeight);
    assert_eq!(c.round_state().last_commit, Some(commit));
    assert!(matches!(
        actions.as_slice(),
        [Action::ScheduleTimeout(TimeoutInfo { height: 2, round: 0, step: Step::NewHeight, .. })]
    ));

    let (block2, _) = drive_height(&mut c, vec![], &mut log);
    assert_eq!(block2.header.last_block_id, Some(block.block_id(c.part_size()).unwrap()));
}

#[test]
fn test_follower_commits_with_quorum_of_peers() {
    // Four validators; proposer for (1, 0) is v1, we are v0.
    let mut c = core(4, 0);
    let actions = c.handle(&timeout(1, 0, Step::NewHeight)).unwrap();
    assert!(!actions.iter().any(|a| matches!(a, Action::Propose { .. })));
    assert_eq!(c.round_state().step, Step::Propose);

    let proposer = ConsensusCore::new(genesis_state(4), None, Some(ValidatorId(1)), TimeoutParams::default());
    let mut draft = proposer.draft_proposal(vec![b"x=y".to_vec()]).unwrap();
    draft.proposal.signature = Signature([7u8; 32]);
    let id = draft.proposal.block_id;

    c.handle(&event(ConsensusMessage::Proposal(draft.proposal.clone()))).unwrap();
    let mut actions = Vec::new();
    for part in draft.parts.parts() {
        actions.extend(
            c.handle(&event(ConsensusMessage::BlockPart {
                height: 1,
                round: 0,
                part: part.clone(),
            }))
            .unwrap(),
        );
    }
    assert_eq!(sign_votes(&actions), vec![(VoteType::Prevote, Some(id))]);
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Notify(Notice::CompleteProposal { block_id, .. }) if *block_id == id)));

    let mut actions = Vec::new();
    for v in 1..4 {
        actions.extend(c.handle(&vote_msg(vote(VoteType::Prevote, 1, 0, Some(id), ValidatorId(v)))).unwrap());
    }
    assert_eq!(sign_votes(&actions), vec![(VoteType::Precommit, Some(id))]);
    assert_eq!(c.round_state().step, Step::Precommit);

    let mut finalized = None;
    for v in 1..4 {
        for a in c.handle(&vote_msg(vote(VoteType::Precommit, 1, 0, Some(id), ValidatorId(v)))).unwrap() {
            if let Action::Finalize { block, commit } = a {
                finalized = Some((block, commit));
            }
        }
    }
    let (block, commit) = finalized.expect("height should finalize");
    assert_eq!(block.hash().unwrap(), id.hash);
    assert_eq!(commit.signatures.len(), 3);
}

#[test]
fn test_proposal_from_wrong_proposer_is_rejected() {
    let mut c = core(4, 0);
    c.handle(&timeout(1, 0, Step::NewHeight)).unwrap();
    let impostor = ConsensusCore::new(genesis_state(4), None, Some(ValidatorId(2)), TimeoutParams::default());
    let mut draft = impostor.draft_proposal(vec![]).unwrap();
    draft.proposal.proposer = ValidatorId(2);

    let err = c.handle(&event(ConsensusMessage::Proposal(draft.proposal))).unwrap_err();
    assert_eq!(
        err,
        KernelError::WrongProposer {
            expected: ValidatorId(1),
            got: ValidatorId(2)
        }
    );
    assert!(c.round_state().proposal.is_none());
}

#[test]
fn test_messages_for_other_heights_do_not_mutate() {
    let mut c = core(1, 0);
    let before = c.round_state().clone();
    let err = c
        .handle(&vote_msg(vote(VoteType::Prevote, 7, 0, None, ValidatorId(0))))
        .unwrap_err();
    assert_eq!(err, KernelError::WrongHeight { expected: 1, got: 7 });
    assert_eq!(c.round_state(), &before);

    // Stale and foreign timeouts are silently ignored.
    assert!(c.handle(&timeout(9, 0, Step::NewHeight)).unwrap().is_empty());
    assert_eq!(c.round_state(), &before);
}

#[test]
fn test_block_part_before_proposal_is_rejected() {
    let mut c = core(4, 0);
    let proposer = ConsensusCore::new(genesis_state(4), None, Some(ValidatorId(1)), TimeoutParams::default());
    let draft = proposer.draft_proposal(vec![]).unwrap();
    let part = draft.parts.parts().next().unwrap().clone();
    let err = c
        .handle(&event(ConsensusMessage::BlockPart { height: 1, round: 0, part }))
        .unwrap_err();
    assert_eq!(err, KernelError::UnexpectedPart);
}

#[test]
fn test_propose_timeout_prevotes_nil_and_precommit_wait_moves_round() {
    let mut c = core(4, 0);
    c.handle(&timeout(1, 0, Step::NewHeight)).unwrap();

    let actions = c.handle(&timeout(1, 0, Step::Propose)).unwrap();
    assert_eq!(sign_votes(&actions), vec![(VoteType::Prevote, None)]);

    // Nil precommits from everyone else.
    let mut actions = Vec::new();
    for v in 1..4 {
        actions.extend(c.handle(&vote_msg(vote(VoteType::Precommit, 1, 0, None, ValidatorId(v)))).unwrap());
    }
    assert_eq!(c.round_state().step, Step::PrecommitWait);
    let wait = timeout_of(&actions).unwrap();

    let actions = c.handle(&wait).unwrap();
    assert_eq!(c.round_state().round, 1);
    assert_eq!(c.round_state().step, Step::Propose);
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Notify(Notice::NewRound { height: 1, round: 1 }))));
    // Proposer for (1, 1) is v2.
    assert!(!actions.iter().any(|a| matches!(a, Action::Propose { .. })));
}

#[test]
fn test_pending_filters_satisfied_actions() {
    let mut c = core(1, 0);
    let start = c.start();
    assert!(c.is_pending(&start[0]));

    let actions = c.handle(&timeout(1, 0, Step::NewHeight)).unwrap();
    let propose = actions
        .iter()
        .find(|a| matches!(a, Action::Propose { .. }))
        .cloned()
        .unwrap();
    assert!(c.is_pending(&propose));
    assert!(!c.is_pending(&start[0]));

    let draft = c.draft_proposal(vec![]).unwrap();
    c.handle(&event(ConsensusMessage::Proposal(draft.proposal.clone()))).unwrap();
    // parts still missing
    assert!(c.is_pending(&propose));

    let mut prevote = None;
    for part in draft.parts.parts() {
        for a in c
            .handle(&event(ConsensusMessage::BlockPart { height: 1, round: 0, part: part.clone() }))
            .unwrap()
        {
            if matches!(a, Action::SignVote { .. }) {
                prevote = Some(a);
            }
        }
    }
    let prevote = prevote.unwrap();
    assert!(!c.is_pending(&propose));
    assert!(c.is_pending(&prevote));

    let block_id = Some(draft.proposal.block_id);
    c.handle(&vote_msg(vote(VoteType::Prevote, 1, 0, block_id, ValidatorId(0)))).unwrap();
    assert!(!c.is_pending(&prevote));
    assert!(!c.is_pending(&Action::Notify(Notice::NewRound { height: 1, round: 0 })));
}
