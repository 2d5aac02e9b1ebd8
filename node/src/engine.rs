// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consensus driver.
//!
//! Owns the [`ConsensusCore`] and everything its actions touch. Every input,
//! live or replayed, goes through [`Engine::handle_msg`]; live inputs are
//! written to the WAL first.
//!
//! # Write ordering
//! - Messages the node produces itself (proposal, parts, votes) are synced
//!   before they are handled. Peer messages and timeouts are only queued.
//! - On finalize: block saved, `EndHeight` synced, block applied, next
//!   height marker synced. A marker is never durable without the
//!   `EndHeight` of the height before it.

use cairn_kernel::state::{Action, ConsensusCore};
use cairn_kernel::types::{Block, BlockId, Commit, Signature, Vote, VoteType};
use cairn_kernel::wal::{ConsensusMessage, EventMessage, HeightMarker, PeerId, TimeoutInfo, WalMessage};
use crossbeam_channel::{select, Receiver, Sender};
use std::sync::Arc;

use crate::app::Application;
use crate::errors::EngineError;
use crate::events::{Event, EventSwitch};
use crate::executor::BlockExecutor;
use crate::mempool::Mempool;
use crate::persistence::{BlockStore, StateStore};
use crate::privval::PrivValidator;
use crate::ticker::TimeoutTicker;
use crate::wal_writer::Wal;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_block_txs: usize,
    /// Leave the event loop once this height is committed.
    pub target_height: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_block_txs: 256,
            target_height: None,
        }
    }
}

/// Collaborators the engine drives.
pub struct EngineParts {
    pub wal: Box<dyn Wal>,
    pub app: Box<dyn Application>,
    pub mempool: Box<dyn Mempool>,
    pub priv_val: Box<dyn PrivValidator>,
    pub block_store: Arc<dyn BlockStore>,
    pub state_store: Arc<dyn StateStore>,
}

pub struct Engine {
    core: ConsensusCore,
    wal: Box<dyn Wal>,
    app: Box<dyn Application>,
    mempool: Box<dyn Mempool>,
    priv_val: Box<dyn PrivValidator>,
    block_store: Arc<dyn BlockStore>,
    executor: BlockExecutor,
    events: EventSwitch,
    config: EngineConfig,
    ticker: TimeoutTicker,
    internal_tx: Sender<WalMessage>,
    internal_rx: Receiver<WalMessage>,
    replaying: bool,
    deferred: Vec<Action>,
    marker_height: Option<u64>,
    last_end_height: Option<u64>,
}

impl Engine {
    pub fn new(core: ConsensusCore, parts: EngineParts, events: EventSwitch, config: EngineConfig) -> EngineResult<Self> {
        let (internal_tx, internal_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            core,
            wal: parts.wal,
            app: parts.app,
            mempool: parts.mempool,
            priv_val: parts.priv_val,
            block_store: parts.block_store,
            executor: BlockExecutor::new(parts.state_store),
            events,
            config,
            ticker: TimeoutTicker::spawn()?,
            internal_tx,
            internal_rx,
            replaying: false,
            deferred: Vec::new(),
            marker_height: None,
            last_end_height: None,
        })
    }

    pub fn core(&self) -> &ConsensusCore {
        &self.core
    }

    pub fn events(&self) -> &EventSwitch {
        &self.events
    }

    pub fn block_store(&self) -> &Arc<dyn BlockStore> {
        &self.block_store
    }

    pub fn wal(&self) -> &dyn Wal {
        self.wal.as_ref()
    }

    pub fn wal_mut(&mut self) -> &mut dyn Wal {
        self.wal.as_mut()
    }

    /// Height of the last block this engine's chain state includes.
    pub fn committed_height(&self) -> u64 {
        self.core.chain().last_block_height
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    fn target_reached(&self) -> bool {
        self.config
            .target_height
            .map_or(false, |target| self.committed_height() >= target)
    }

    /// While replaying, proposals, votes and timeouts are held back until
    /// [`finish_replay`](Self::finish_replay).
    pub fn begin_replay(&mut self) {
        self.replaying = true;
        self.deferred.clear();
    }

    pub fn note_marker(&mut self, height: u64) {
        self.marker_height = Some(height);
    }

    /// Feeds one message to the state machine and carries out the resulting
    /// actions. Messages the state machine rejects are dropped.
    pub fn handle_msg(&mut self, msg: &WalMessage) -> EngineResult<()> {
        if let WalMessage::EndHeight { height } = msg {
            self.last_end_height = Some(*height);
        }
        match self.core.handle(msg) {
            Ok(actions) => self.process_actions(actions),
            Err(e) => {
                tracing::debug!(height = msg.height(), core_height = self.core.height(), "Ignoring message: {}", e);
                Ok(())
            }
        }
    }

    /// Leaves replay mode. Held-back signing that the replayed log does not
    /// already cover is done now, and the newest still-relevant timeout is
    /// scheduled.
    pub fn finish_replay(&mut self) -> EngineResult<()> {
        self.replaying = false;
        let deferred = std::mem::take(&mut self.deferred);
        let mut timeout = None;
        let mut resumed = 0usize;
        for action in deferred {
            if !self.core.is_pending(&action) {
                continue;
            }
            match action {
                Action::ScheduleTimeout(ti) => timeout = Some(ti),
                other => {
                    resumed += 1;
                    self.process_action(other)?;
                }
            }
        }
        if let Some(ti) = timeout {
            self.ticker.schedule(ti);
        }
        let rs = self.core.round_state();
        tracing::info!(
            height = rs.height,
            round = rs.round,
            step = %rs.step,
            resumed,
            "Replay finished"
        );
        Ok(())
    }

    /// Makes sure the log has a marker for the current height, preceded by
    /// the previous height's `EndHeight`.
    pub fn ensure_marker(&mut self) -> EngineResult<()> {
        let height = self.core.height();
        if self.marker_height == Some(height) {
            return Ok(());
        }
        let last = height - 1;
        if last > 0 && self.last_end_height != Some(last) {
            tracing::info!("Writing missing EndHeight for {}", last);
            self.wal.write_sync(&WalMessage::EndHeight { height: last })?;
            self.last_end_height = Some(last);
        }
        self.wal.write_meta_sync(HeightMarker { height })?;
        self.marker_height = Some(height);
        Ok(())
    }

    /// Kicks off the current height.
    pub fn start_live(&mut self) -> EngineResult<()> {
        let actions = self.core.start();
        self.process_actions(actions)
    }

    /// Event loop. Returns once the target height is committed, on `quit`,
    /// or on the first fatal error. The WAL is stopped on the way out.
    pub fn run(&mut self, peers: Receiver<EventMessage>, quit: Receiver<()>) -> EngineResult<()> {
        let result = self.run_loop(peers, quit);
        if let Err(e) = &result {
            if e.is_planned_stop() {
                tracing::info!("Consensus stopped: {}", e);
            } else {
                tracing::error!("Consensus halted: {}", e);
            }
        }
        if let Err(e) = self.wal.stop() {
            tracing::debug!("WAL stop: {}", e);
        }
        self.wal.wait();
        result
    }

    fn run_loop(&mut self, mut peers: Receiver<EventMessage>, quit: Receiver<()>) -> EngineResult<()> {
        let internal = self.internal_rx.clone();
        let tocks = self.ticker.tocks().clone();
        tracing::info!(height = self.core.height(), "Consensus loop started");

        loop {
            if self.target_reached() {
                tracing::info!("Target height {} committed", self.committed_height());
                return Ok(());
            }
            // Own messages first, so a restart sees them in the same order.
            if let Ok(msg) = internal.try_recv() {
                self.receive(msg, true)?;
                continue;
            }
            select! {
                recv(internal) -> msg => {
                    if let Ok(msg) = msg {
                        self.receive(msg, true)?;
                    }
                }
                recv(peers) -> msg => match msg {
                    Ok(ev) => self.receive(WalMessage::Event(ev), false)?,
                    Err(_) => {
                        tracing::debug!("Peer channel closed");
                        peers = crossbeam_channel::never();
                    }
                },
                recv(tocks) -> ti => {
                    if let Ok(ti) = ti {
                        self.on_tock(ti)?;
                    }
                }
                recv(quit) -> _ => {
                    tracing::info!("Consensus loop stopping");
                    return Ok(());
                }
            }
        }
    }

    fn on_tock(&mut self, ti: TimeoutInfo) -> EngineResult<()> {
        self.events.fire(Event::Timeout(ti));
        self.receive(WalMessage::Timeout(ti), false)
    }

    fn receive(&mut self, msg: WalMessage, sync: bool) -> EngineResult<()> {
        if sync {
            self.wal.write_sync(&msg)?;
        } else {
            self.wal.write(&msg)?;
        }
        self.handle_msg(&msg)
    }

    fn process_actions(&mut self, actions: Vec<Action>) -> EngineResult<()> {
        for action in actions {
            self.process_action(action)?;
        }
        Ok(())
    }

    fn process_action(&mut self, action: Action) -> EngineResult<()> {
        match action {
            Action::Propose { .. } | Action::SignVote { .. } | Action::ScheduleTimeout(_) if self.replaying => {
                self.deferred.push(action);
                Ok(())
            }
            Action::ScheduleTimeout(ti) => {
                self.ticker.schedule(ti);
                Ok(())
            }
            Action::Propose { height, round } => self.propose(height, round),
            Action::SignVote {
                vote_type,
                height,
                round,
                block_id,
            } => {
                self.sign_vote(vote_type, height, round, block_id);
                Ok(())
            }
            Action::Finalize { block, commit } => self.finalize(block, commit),
            Action::Notify(notice) => {
                self.events.fire(notice.into());
                Ok(())
            }
        }
    }

    fn send_internal(&self, msg: ConsensusMessage) {
        let msg = WalMessage::Event(EventMessage {
            msg,
            peer: PeerId::local(),
        });
        // Both ends live in `self`.
        let _ = self.internal_tx.send(msg);
    }

    fn propose(&mut self, height: u64, round: u32) -> EngineResult<()> {
        let txs = self.mempool.reap(height, self.config.max_block_txs);
        let draft = match self.core.draft_proposal(txs) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::error!(height, round, "Could not build proposal: {}", e);
                return Ok(());
            }
        };
        let mut proposal = draft.proposal;
        if let Err(e) = self.priv_val.sign_proposal(&self.core.chain().chain_id, &mut proposal) {
            tracing::error!(height, round, "Refusing to sign proposal: {}", e);
            return Ok(());
        }
        tracing::info!(
            height,
            round,
            txs = draft.block.txs.len(),
            parts = draft.parts.count(),
            "Proposing block"
        );
        self.send_internal(ConsensusMessage::Proposal(proposal));
        for part in draft.parts.parts() {
            self.send_internal(ConsensusMessage::BlockPart {
                height,
                round,
                part: part.clone(),
            });
        }
        Ok(())
    }

    fn sign_vote(&mut self, vote_type: VoteType, height: u64, round: u32, block_id: Option<BlockId>) {
        let Some(validator) = self.core.own_id() else {
            return;
        };
        let mut vote = Vote {
            vote_type,
            height,
            round,
            block_id,
            validator,
            signature: Signature::default(),
        };
        match self.priv_val.sign_vote(&self.core.chain().chain_id, &mut vote) {
            Ok(()) => self.send_internal(ConsensusMessage::Vote(vote)),
            Err(e) => tracing::error!(height, round, ?vote_type, "Refusing to sign vote: {}", e),
        }
    }

    fn finalize(&mut self, block: Block, commit: Commit) -> EngineResult<()> {
        let height = block.height();
        if self.block_store.height() < height {
            self.block_store.save_block(&block, &commit)?;
        }
        self.wal.write_sync(&WalMessage::EndHeight { height })?;
        self.last_end_height = Some(height);

        let state = self
            .executor
            .apply_block(self.app.as_mut(), self.core.chain(), commit.block_id, &block)?;
        self.mempool.update(height, &block.txs);
        metrics::counter!("cairn_blocks_committed_total", 1);
        tracing::info!(
            height,
            hash = %commit.block_id.hash,
            txs = block.txs.len(),
            app_hash = %state.app_hash,
            replay = self.replaying,
            "Finalized block"
        );
        self.events.fire(Event::NewBlock {
            height,
            hash: commit.block_id.hash,
            txs: block.txs.len(),
        });

        self.wal.write_meta_sync(HeightMarker { height: height + 1 })?;
        self.marker_height = Some(height + 1);

        let actions = self.core.enter_new_height(state, commit);
        self.process_actions(actions)
    }
}
