// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Startup reconciliation between the block store, the saved chain state and
//! the application.
//!
//! The block store can be at most one block ahead of the chain state (a crash
//! between saving a block and applying it), and the application can lag both
//! by any number of blocks. The handshaker replays what is missing so that,
//! on success, all three agree on height and app hash.

use cairn_kernel::state::{ChainState, Genesis};
use cairn_kernel::types::{Block, Hash, BLOCK_PART_SIZE};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::app::{AppError, AppInfo, Application, ReplayedResponsesApp};
use crate::executor::{exec_commit_block, BlockExecutor, ExecError};
use crate::persistence::{BlockStore, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("app block height {app} is higher than store height {store}")]
    AppBlockHeightTooHigh { app: u64, store: u64 },
    #[error("state height {state} is ahead of store height {store}")]
    StateAheadOfStore { state: u64, store: u64 },
    #[error("store height {store} is more than one block ahead of state height {state}")]
    StoreTooFarAhead { store: u64, state: u64 },
    #[error("app hash mismatch after block {height}: expected {expected}, got {actual}")]
    AppHashMismatch { height: u64, expected: Hash, actual: Hash },
    #[error("block {0} missing from store")]
    MissingBlock(u64),
    #[error("no saved ABCI responses for block {0}")]
    MissingResponses(u64),
    #[error("application error: {0}")]
    App(#[from] AppError),
    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    Comparing,
    Replaying(u64),
    Verifying,
    Done,
    Fatal,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePhase::Idle => write!(f, "idle"),
            HandshakePhase::Comparing => write!(f, "comparing"),
            HandshakePhase::Replaying(h) => write!(f, "replaying({})", h),
            HandshakePhase::Verifying => write!(f, "verifying"),
            HandshakePhase::Done => write!(f, "done"),
            HandshakePhase::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub app_hash: Hash,
    pub blocks_replayed: u64,
    pub store_height: u64,
}

pub struct Handshaker {
    state_store: Arc<dyn StateStore>,
    block_store: Arc<dyn BlockStore>,
    executor: BlockExecutor,
    state: ChainState,
    genesis: Genesis,
    n_blocks: u64,
    phase: HandshakePhase,
}

impl Handshaker {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        state: ChainState,
        block_store: Arc<dyn BlockStore>,
        genesis: Genesis,
    ) -> Self {
        Self {
            executor: BlockExecutor::new(state_store.clone()),
            state_store,
            block_store,
            state,
            genesis,
            n_blocks: 0,
            phase: HandshakePhase::Idle,
        }
    }

    /// Blocks replayed into the application so far.
    pub fn n_blocks(&self) -> u64 {
        self.n_blocks
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn into_state(self) -> ChainState {
        self.state
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    fn enter(&mut self, phase: HandshakePhase) {
        tracing::info!(from = %self.phase, to = %phase, "Handshake phase");
        self.phase = phase;
    }

    pub fn handshake(&mut self, app: &mut dyn Application) -> Result<HandshakeOutcome, HandshakeError> {
        let start = Instant::now();
        match self.run(app) {
            Ok(outcome) => {
                self.enter(HandshakePhase::Done);
                metrics::counter!("cairn_handshake_blocks_replayed_total", self.n_blocks);
                tracing::info!(
                    "Handshake complete: store height {}, app hash {}, {} blocks replayed in {:?}",
                    outcome.store_height,
                    outcome.app_hash,
                    self.n_blocks,
                    start.elapsed()
                );
                Ok(outcome)
            }
            Err(e) => {
                self.enter(HandshakePhase::Fatal);
                tracing::error!("Handshake failed: {}", e);
                Err(e)
            }
        }
    }

    fn run(&mut self, app: &mut dyn Application) -> Result<HandshakeOutcome, HandshakeError> {
        let info = app.info()?;
        tracing::info!(
            "Application at height {} with app hash {}",
            info.last_block_height,
            info.last_block_app_hash
        );

        if info.last_block_height == 0 {
            self.init_chain(app)?;
        }

        let app_hash = self.replay_blocks(app, info)?;
        Ok(HandshakeOutcome {
            app_hash,
            blocks_replayed: self.n_blocks,
            store_height: self.block_store.height(),
        })
    }

    fn init_chain(&mut self, app: &mut dyn Application) -> Result<(), HandshakeError> {
        let validators = app.init_chain(&self.genesis.validators)?;
        if let Some(validators) = validators {
            if self.state.last_block_height == 0 {
                tracing::info!("Adopting {} validators from the application", validators.len());
                self.state.validators = validators;
                self.state_store.save_state(&self.state)?;
            }
        }
        Ok(())
    }

    fn replay_blocks(&mut self, app: &mut dyn Application, info: AppInfo) -> Result<Hash, HandshakeError> {
        self.enter(HandshakePhase::Comparing);
        let mut app_hash = info.last_block_app_hash;
        let store = self.block_store.height();
        let state = self.state.last_block_height;
        let app_height = info.last_block_height;
        tracing::info!(store, state, app = app_height, "Comparing heights");

        if store == 0 {
            self.verify(app_hash, 0)?;
            return Ok(app_hash);
        }
        if store < app_height {
            return Err(HandshakeError::AppBlockHeightTooHigh {
                app: app_height,
                store,
            });
        }
        if store < state {
            return Err(HandshakeError::StateAheadOfStore { state, store });
        }
        if store > state + 1 {
            return Err(HandshakeError::StoreTooFarAhead { store, state });
        }

        if store == state {
            if app_height < store {
                self.exec_range(app, app_height + 1, store, &mut app_hash)?;
            }
            self.verify(app_hash, store)?;
            return Ok(app_hash);
        }

        // store == state + 1: the last block was saved but never applied.
        if app_height < state {
            self.exec_range(app, app_height + 1, store - 1, &mut app_hash)?;
            self.apply_final(app, store, Some(app_hash))?;
        } else if app_height == state {
            self.apply_final(app, store, Some(app_hash))?;
        } else {
            // The application already committed the block; only the state
            // update was lost.
            let responses = self
                .state_store
                .load_abci_responses(store)?
                .ok_or(HandshakeError::MissingResponses(store))?;
            let mut replayed = ReplayedResponsesApp::new(responses, info);
            self.apply_final(&mut replayed, store, None)?;
        }
        let final_hash = self.state.app_hash;
        self.verify(final_hash, store)?;
        Ok(final_hash)
    }

    fn load_block(&self, height: u64) -> Result<Block, HandshakeError> {
        self.block_store
            .load_block(height)?
            .ok_or(HandshakeError::MissingBlock(height))
    }

    /// Checks the hash the application reported after `height - 1` against
    /// the one block `height` records.
    fn check_against_header(&self, app_hash: Hash, block: &Block) -> Result<(), HandshakeError> {
        if block.header.app_hash != app_hash {
            return Err(HandshakeError::AppHashMismatch {
                height: block.height() - 1,
                expected: block.header.app_hash,
                actual: app_hash,
            });
        }
        Ok(())
    }

    /// Executes `first..=last` against the application without touching the
    /// chain state.
    fn exec_range(
        &mut self,
        app: &mut dyn Application,
        first: u64,
        last: u64,
        app_hash: &mut Hash,
    ) -> Result<(), HandshakeError> {
        for height in first..=last {
            let block = self.load_block(height)?;
            self.check_against_header(*app_hash, &block)?;
            self.enter(HandshakePhase::Replaying(height));
            *app_hash = exec_commit_block(app, &block)?;
            self.n_blocks += 1;
        }
        Ok(())
    }

    /// Runs the block one past the saved state through the full executor.
    /// `app_hash` is what the application holds before executing it.
    fn apply_final(
        &mut self,
        app: &mut dyn Application,
        height: u64,
        app_hash: Option<Hash>,
    ) -> Result<(), HandshakeError> {
        let block = self.load_block(height)?;
        if let Some(app_hash) = app_hash {
            self.check_against_header(app_hash, &block)?;
        }
        self.enter(HandshakePhase::Replaying(height));
        let block_id = match self.block_store.load_seen_commit(height)? {
            Some(commit) => commit.block_id,
            None => block.block_id(BLOCK_PART_SIZE).map_err(ExecError::from)?,
        };
        self.state = self.executor.apply_block(app, &self.state, block_id, &block)?;
        self.n_blocks += 1;
        Ok(())
    }

    fn verify(&mut self, app_hash: Hash, height: u64) -> Result<(), HandshakeError> {
        self.enter(HandshakePhase::Verifying);
        if app_hash != self.state.app_hash {
            return Err(HandshakeError::AppHashMismatch {
                height,
                expected: self.state.app_hash,
                actual: app_hash,
            });
        }
        Ok(())
    }
}
