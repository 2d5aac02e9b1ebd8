// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic consensus state machine.
//!
//! `ConsensusCore` folds [`WalMessage`]s into a [`RoundState`] and reports what
//! the node should do next as a list of [`Action`]s. It performs no I/O, reads
//! no clock and signs nothing, so the node's live loop and its startup replay
//! drive exactly the same transitions.
//!
//! # Invariants
//! - Round state only changes inside `handle` and `enter_new_height`.
//! - A `Finalize` action is only emitted once a precommit quorum and the
//!   matching block are both present.
//! - Messages for other heights never mutate state.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::state::chain::ChainState;
use crate::state::round_state::{RoundState, Step};
use crate::types::{
    Block, BlockId, Commit, Part, PartSet, Proposal, Signature, Tx, ValidatorId, Vote, VoteType,
    BLOCK_PART_SIZE,
};
use crate::wal::{ConsensusMessage, TimeoutInfo, WalMessage};

/// Step timeouts in milliseconds. Each `*_delta_ms` is added once per round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutParams {
    pub propose_ms: u64,
    pub propose_delta_ms: u64,
    pub prevote_ms: u64,
    pub prevote_delta_ms: u64,
    pub precommit_ms: u64,
    pub precommit_delta_ms: u64,
    pub commit_ms: u64,
}

impl Default for TimeoutParams {
    fn default() -> Self {
        Self {
            propose_ms: 3000,
            propose_delta_ms: 500,
            prevote_ms: 1000,
            prevote_delta_ms: 500,
            precommit_ms: 1000,
            precommit_delta_ms: 500,
            commit_ms: 1000,
        }
    }
}

impl TimeoutParams {
    pub fn propose(&self, round: u32) -> u64 {
        self.propose_ms + self.propose_delta_ms * round as u64
    }

    pub fn prevote(&self, round: u32) -> u64 {
        self.prevote_ms + self.prevote_delta_ms * round as u64
    }

    pub fn precommit(&self, round: u32) -> u64 {
        self.precommit_ms + self.precommit_delta_ms * round as u64
    }
}

/// Observable progress, published by the node on its event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    NewRound { height: u64, round: u32 },
    CompleteProposal { height: u64, round: u32, block_id: BlockId },
    Vote(Vote),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    ScheduleTimeout(TimeoutInfo),
    /// This node is the proposer for `(height, round)`.
    Propose { height: u64, round: u32 },
    /// Sign and broadcast a vote.
    SignVote {
        vote_type: VoteType,
        height: u64,
        round: u32,
        block_id: Option<BlockId>,
    },
    /// The block is decided: persist it, apply it and move to the next height.
    Finalize { block: Block, commit: Commit },
    Notify(Notice),
}

/// Unsigned proposal and the parts to gossip after it.
#[derive(Clone, Debug)]
pub struct ProposalDraft {
    pub proposal: Proposal,
    pub block: Block,
    pub parts: PartSet,
}

#[derive(Clone, Debug)]
pub struct ConsensusCore {
    chain: ChainState,
    own: Option<ValidatorId>,
    timeouts: TimeoutParams,
    part_size: usize,
    rs: RoundState,
}

impl ConsensusCore {
    /// Core positioned at the start of the height after `chain.last_block_height`.
    pub fn new(
        chain: ChainState,
        last_commit: Option<Commit>,
        own: Option<ValidatorId>,
        timeouts: TimeoutParams,
    ) -> Self {
        let rs = RoundState::new(chain.next_height(), chain.validators.clone(), last_commit);
        Self {
            chain,
            own,
            timeouts,
            part_size: BLOCK_PART_SIZE,
            rs,
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn round_state(&self) -> &RoundState {
        &self.rs
    }

    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    pub fn height(&self) -> u64 {
        self.rs.height
    }

    pub fn own_id(&self) -> Option<ValidatorId> {
        self.own
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Actions that kick off the current height.
    pub fn start(&self) -> Vec<Action> {
        alloc::vec![self.new_height_timeout()]
    }

    /// Moves to the height after the one `chain` just committed.
    pub fn enter_new_height(&mut self, chain: ChainState, last_commit: Commit) -> Vec<Action> {
        self.rs = RoundState::new(chain.next_height(), chain.validators.clone(), Some(last_commit));
        self.chain = chain;
        self.start()
    }

    fn new_height_timeout(&self) -> Action {
        Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.timeouts.commit_ms,
            height: self.rs.height,
            round: 0,
            step: Step::NewHeight,
        })
    }

    /// Single entry point for every input, live or replayed.
    ///
    /// An error means the message was rejected before it touched state.
    pub fn handle(&mut self, msg: &WalMessage) -> KernelResult<Vec<Action>> {
        let mut out = Vec::new();
        match msg {
            WalMessage::Event(ev) => match &ev.msg {
                ConsensusMessage::Proposal(p) => self.set_proposal(p)?,
                ConsensusMessage::BlockPart { height, part, .. } => {
                    self.add_block_part(*height, part, &mut out)?
                }
                ConsensusMessage::Vote(v) => self.try_add_vote(v, &mut out)?,
            },
            WalMessage::Timeout(ti) => self.handle_timeout(ti, &mut out)?,
            WalMessage::EndHeight { .. } => {}
        }
        Ok(out)
    }

    /// Whether a deferred action still needs doing in the current state.
    pub fn is_pending(&self, action: &Action) -> bool {
        let rs = &self.rs;
        match action {
            // A proposal whose parts never made it to the log is proposed
            // again; the draft is deterministic, so duplicates are harmless.
            Action::Propose { height, round } => {
                *height == rs.height
                    && *round == rs.round
                    && rs.step == Step::Propose
                    && (rs.proposal.is_none() || rs.proposal_block.is_none())
            }
            Action::SignVote {
                vote_type,
                height,
                round,
                ..
            } => {
                let in_window = match vote_type {
                    VoteType::Prevote => rs.step >= Step::Prevote && rs.step < Step::Precommit,
                    VoteType::Precommit => rs.step >= Step::Precommit && rs.step < Step::Commit,
                };
                *height == rs.height
                    && *round == rs.round
                    && in_window
                    && self
                        .own
                        .map_or(false, |id| !rs.votes.has_vote(id, *round, *vote_type))
            }
            Action::ScheduleTimeout(ti) => {
                ti.height == rs.height && (ti.round, ti.step) >= (rs.round, rs.step)
            }
            Action::Finalize { .. } | Action::Notify(_) => false,
        }
    }

    /// Block and unsigned proposal for the current round. A locked block is
    /// re-proposed as is; otherwise a fresh block is built from `txs`.
    pub fn draft_proposal(&self, txs: Vec<Tx>) -> KernelResult<ProposalDraft> {
        let rs = &self.rs;
        let proposer = self
            .chain
            .validators
            .proposer(rs.height, rs.round)
            .ok_or(KernelError::InvalidBlock("empty validator set"))?;
        let (block, pol_round) = match &rs.locked_block {
            Some(locked) => (locked.clone(), rs.locked_round),
            None => (
                self.chain
                    .make_block(rs.height, txs, rs.last_commit.clone(), proposer)?,
                None,
            ),
        };
        let parts = block.make_part_set(self.part_size)?;
        let proposal = Proposal {
            height: rs.height,
            round: rs.round,
            pol_round,
            block_id: BlockId {
                hash: block.hash()?,
                parts: parts.header(),
            },
            proposer,
            signature: Signature::default(),
        };
        Ok(ProposalDraft {
            proposal,
            block,
            parts,
        })
    }

    fn set_proposal(&mut self, p: &Proposal) -> KernelResult<()> {
        if p.height != self.rs.height {
            return Err(KernelError::WrongHeight {
                expected: self.rs.height,
                got: p.height,
            });
        }
        if p.round != self.rs.round {
            return Err(KernelError::WrongRound {
                expected: self.rs.round,
                got: p.round,
            });
        }
        if let Some(existing) = &self.rs.proposal {
            if existing == p {
                return Ok(());
            }
            return Err(KernelError::DuplicateProposal);
        }
        if matches!(p.pol_round, Some(pr) if pr >= p.round) {
            return Err(KernelError::InvalidBlock("proposal lock round not before its round"));
        }
        let expected = self
            .chain
            .validators
            .proposer(p.height, p.round)
            .ok_or(KernelError::UnknownValidator(p.proposer))?;
        if expected != p.proposer {
            return Err(KernelError::WrongProposer {
                expected,
                got: p.proposer,
            });
        }

        self.rs.proposal = Some(p.clone());
        let have_parts = self
            .rs
            .proposal_block_parts
            .as_ref()
            .map_or(false, |ps| ps.has_header(&p.block_id.parts));
        if !have_parts && self.rs.proposal_block.is_none() {
            self.rs.proposal_block_parts = Some(PartSet::from_header(p.block_id.parts));
        }
        Ok(())
    }

    fn add_block_part(&mut self, height: u64, part: &Part, out: &mut Vec<Action>) -> KernelResult<()> {
        if height != self.rs.height {
            return Err(KernelError::WrongHeight {
                expected: self.rs.height,
                got: height,
            });
        }
        if self.rs.proposal_block.is_some() {
            return Ok(());
        }
        let parts = self
            .rs
            .proposal_block_parts
            .as_mut()
            .ok_or(KernelError::UnexpectedPart)?;
        if !parts.add_part(part.clone())? || !parts.is_complete() {
            return Ok(());
        }

        let header = parts.header();
        let bytes = match parts.assemble() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.rs.proposal_block_parts = Some(PartSet::from_header(header));
                return Err(e);
            }
        };
        let block = Block::from_bytes(&bytes)?;
        let block_id = BlockId {
            hash: block.hash()?,
            parts: header,
        };
        self.rs.proposal_block = Some(block);
        out.push(Action::Notify(Notice::CompleteProposal {
            height,
            round: self.rs.round,
            block_id,
        }));

        let round = self.rs.round;
        if self.rs.step <= Step::Propose && self.is_proposal_complete() {
            self.enter_prevote(height, round, out)?;
            let polka = self
                .rs
                .votes
                .prevotes(round)
                .and_then(|p| p.two_thirds_majority())
                .is_some();
            if polka {
                self.enter_precommit(height, round, out)?;
            }
        } else if self.rs.step == Step::Commit {
            self.try_finalize_commit(height, out)?;
        }
        Ok(())
    }

    fn try_add_vote(&mut self, vote: &Vote, out: &mut Vec<Action>) -> KernelResult<()> {
        let height = self.rs.height;
        if vote.height != height {
            return Err(KernelError::WrongHeight {
                expected: height,
                got: vote.height,
            });
        }
        if !self.rs.votes.add_vote(vote.clone())? {
            return Ok(());
        }
        out.push(Action::Notify(Notice::Vote(vote.clone())));

        match vote.vote_type {
            VoteType::Prevote => self.on_prevote(height, vote.round, out),
            VoteType::Precommit => self.on_precommit(height, vote.round, out),
        }
    }

    fn on_prevote(&mut self, height: u64, round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        let (majority, any) = match self.rs.votes.prevotes(round) {
            Some(p) => (p.two_thirds_majority(), p.has_two_thirds_any()),
            None => return Ok(()),
        };

        // A polka for something else in a later round releases our lock.
        if let Some(maj) = majority {
            let stale_lock = self.rs.locked_round.map_or(false, |lr| lr < round) && round <= self.rs.round;
            if stale_lock && !self.locked_block_is(maj.as_ref())? {
                self.rs.locked_round = None;
                self.rs.locked_block = None;
            }
        }

        if self.rs.round < round && any {
            self.enter_new_round(height, round, out)?;
        } else if self.rs.round == round && self.rs.step >= Step::Prevote {
            match majority {
                Some(maj) if maj.is_none() || self.is_proposal_complete() => {
                    self.enter_precommit(height, round, out)?;
                }
                _ if any => self.enter_prevote_wait(height, round, out),
                _ => {}
            }
        } else if self.rs.proposal.as_ref().and_then(|p| p.pol_round) == Some(round)
            && self.is_proposal_complete()
        {
            let current = self.rs.round;
            self.enter_prevote(height, current, out)?;
        }
        Ok(())
    }

    fn on_precommit(&mut self, height: u64, round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        let (majority, any) = match self.rs.votes.precommits(round) {
            Some(p) => (p.two_thirds_majority(), p.has_two_thirds_any()),
            None => return Ok(()),
        };

        match majority {
            Some(maj) => {
                self.enter_new_round(height, round, out)?;
                self.enter_precommit(height, round, out)?;
                if maj.is_some() {
                    self.enter_commit(height, round, out)?;
                } else {
                    self.enter_precommit_wait(height, round, out);
                }
            }
            None if self.rs.round <= round && any => {
                self.enter_new_round(height, round, out)?;
                self.enter_precommit_wait(height, round, out);
            }
            None => {}
        }
        Ok(())
    }

    fn handle_timeout(&mut self, ti: &TimeoutInfo, out: &mut Vec<Action>) -> KernelResult<()> {
        let rs = &self.rs;
        if ti.height != rs.height || ti.round < rs.round || (ti.round == rs.round && ti.step < rs.step) {
            return Ok(());
        }
        match ti.step {
            Step::NewHeight => self.enter_new_round(ti.height, 0, out)?,
            Step::NewRound => self.enter_propose(ti.height, ti.round, out)?,
            Step::Propose => self.enter_prevote(ti.height, ti.round, out)?,
            Step::PrevoteWait => self.enter_precommit(ti.height, ti.round, out)?,
            Step::PrecommitWait => {
                self.enter_precommit(ti.height, ti.round, out)?;
                self.enter_new_round(ti.height, ti.round + 1, out)?;
            }
            Step::Prevote | Step::Precommit | Step::Commit => {}
        }
        Ok(())
    }

    fn enter_new_round(&mut self, height: u64, round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        let rs = &self.rs;
        if rs.height != height || round < rs.round || (rs.round == round && rs.step != Step::NewHeight) {
            return Ok(());
        }
        if round > self.rs.round {
            self.rs.proposal = None;
            self.rs.proposal_block = None;
            self.rs.proposal_block_parts = None;
        }
        self.rs.round = round;
        self.rs.step = Step::NewRound;
        out.push(Action::Notify(Notice::NewRound { height, round }));
        self.enter_propose(height, round, out)
    }

    fn enter_propose(&mut self, height: u64, round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        let rs = &self.rs;
        if rs.height != height || round < rs.round || (rs.round == round && rs.step >= Step::Propose) {
            return Ok(());
        }
        self.rs.round = round;
        self.rs.step = Step::Propose;
        out.push(Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.timeouts.propose(round),
            height,
            round,
            step: Step::Propose,
        }));

        let proposer = self.chain.validators.proposer(height, round);
        if self.own.is_some() && proposer == self.own {
            out.push(Action::Propose { height, round });
        }
        if self.is_proposal_complete() {
            self.enter_prevote(height, round, out)?;
        }
        Ok(())
    }

    fn enter_prevote(&mut self, height: u64, round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        let rs = &self.rs;
        if rs.height != height || round < rs.round || (rs.round == round && rs.step >= Step::Prevote) {
            return Ok(());
        }
        self.rs.round = round;
        self.rs.step = Step::Prevote;

        let block_id = if let Some(locked) = &self.rs.locked_block {
            Some(locked.block_id(self.part_size)?)
        } else {
            match (&self.rs.proposal_block, &self.rs.proposal_block_parts) {
                (Some(block), Some(parts)) if self.chain.validate_block(block).is_ok() => Some(BlockId {
                    hash: block.hash()?,
                    parts: parts.header(),
                }),
                _ => None,
            }
        };
        out.push(Action::SignVote {
            vote_type: VoteType::Prevote,
            height,
            round,
            block_id,
        });
        Ok(())
    }

    fn enter_prevote_wait(&mut self, height: u64, round: u32, out: &mut Vec<Action>) {
        let rs = &self.rs;
        if rs.height != height || round < rs.round || (rs.round == round && rs.step >= Step::PrevoteWait) {
            return;
        }
        self.rs.round = round;
        self.rs.step = Step::PrevoteWait;
        out.push(Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.timeouts.prevote(round),
            height,
            round,
            step: Step::PrevoteWait,
        }));
    }

    fn enter_precommit(&mut self, height: u64, round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        let rs = &self.rs;
        if rs.height != height || round < rs.round || (rs.round == round && rs.step >= Step::Precommit) {
            return Ok(());
        }
        self.rs.round = round;
        self.rs.step = Step::Precommit;

        let majority = self
            .rs
            .votes
            .prevotes(round)
            .and_then(|p| p.two_thirds_majority());
        let block_id = match majority {
            None => None,
            Some(None) => {
                self.rs.locked_round = None;
                self.rs.locked_block = None;
                None
            }
            Some(Some(id)) => {
                if self.locked_block_is(Some(&id))? {
                    self.rs.locked_round = Some(round);
                    Some(id)
                } else if self.proposal_block_is(&id)? {
                    self.rs.locked_round = Some(round);
                    self.rs.locked_block = self.rs.proposal_block.clone();
                    Some(id)
                } else {
                    // Polka for a block we do not have: fetch it, precommit nil.
                    self.rs.locked_round = None;
                    self.rs.locked_block = None;
                    let have_parts = self
                        .rs
                        .proposal_block_parts
                        .as_ref()
                        .map_or(false, |ps| ps.has_header(&id.parts));
                    if !have_parts {
                        self.rs.proposal_block = None;
                        self.rs.proposal_block_parts = Some(PartSet::from_header(id.parts));
                    }
                    None
                }
            }
        };
        out.push(Action::SignVote {
            vote_type: VoteType::Precommit,
            height,
            round,
            block_id,
        });
        Ok(())
    }

    fn enter_precommit_wait(&mut self, height: u64, round: u32, out: &mut Vec<Action>) {
        let rs = &self.rs;
        if rs.height != height || round < rs.round || (rs.round == round && rs.step >= Step::PrecommitWait) {
            return;
        }
        self.rs.round = round;
        self.rs.step = Step::PrecommitWait;
        out.push(Action::ScheduleTimeout(TimeoutInfo {
            duration_ms: self.timeouts.precommit(round),
            height,
            round,
            step: Step::PrecommitWait,
        }));
    }

    fn enter_commit(&mut self, height: u64, commit_round: u32, out: &mut Vec<Action>) -> KernelResult<()> {
        if self.rs.height != height || self.rs.step >= Step::Commit {
            return Ok(());
        }
        let id = match self
            .rs
            .votes
            .precommits(commit_round)
            .and_then(|p| p.two_thirds_majority())
        {
            Some(Some(id)) => id,
            _ => return Ok(()),
        };
        self.rs.step = Step::Commit;
        self.rs.commit_round = Some(commit_round);

        if self.locked_block_is(Some(&id))? {
            self.rs.proposal_block = self.rs.locked_block.clone();
            self.rs.proposal_block_parts = Some(PartSet::from_header(id.parts));
        }
        if !self.proposal_block_is(&id)? {
            self.rs.proposal_block = None;
            let have_parts = self
                .rs
                .proposal_block_parts
                .as_ref()
                .map_or(false, |ps| ps.has_header(&id.parts));
            if !have_parts {
                self.rs.proposal_block_parts = Some(PartSet::from_header(id.parts));
            }
        }
        self.try_finalize_commit(height, out)
    }

    fn try_finalize_commit(&mut self, height: u64, out: &mut Vec<Action>) -> KernelResult<()> {
        if self.rs.height != height {
            return Ok(());
        }
        let commit = match self
            .rs
            .commit_round
            .and_then(|r| self.rs.votes.precommits(r))
            .and_then(|p| p.make_commit())
        {
            Some(c) => c,
            None => return Ok(()),
        };
        if !self.proposal_block_is(&commit.block_id)? {
            return Ok(());
        }
        if let Some(block) = &self.rs.proposal_block {
            out.push(Action::Finalize {
                block: block.clone(),
                commit,
            });
        }
        Ok(())
    }

    fn is_proposal_complete(&self) -> bool {
        let rs = &self.rs;
        let (proposal, _) = match (&rs.proposal, &rs.proposal_block) {
            (Some(p), Some(b)) => (p, b),
            _ => return false,
        };
        match proposal.pol_round {
            None => true,
            Some(pr) => rs
                .votes
                .prevotes(pr)
                .and_then(|p| p.two_thirds_majority())
                .is_some(),
        }
    }

    fn locked_block_is(&self, id: Option<&BlockId>) -> KernelResult<bool> {
        match (&self.rs.locked_block, id) {
            (Some(block), Some(id)) => Ok(block.hash()? == id.hash),
            _ => Ok(false),
        }
    }

    fn proposal_block_is(&self, id: &BlockId) -> KernelResult<bool> {
        match &self.rs.proposal_block {
            Some(block) => Ok(block.hash()? == id.hash),
            None => Ok(false),
        }
    }
}
