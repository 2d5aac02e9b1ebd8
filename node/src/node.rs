// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node assembly and lifecycle.
//!
//! Startup order: load state, handshake with the application, replay the
//! WAL, then open the event loop on the `cairn-consensus` thread.

use cairn_kernel::state::{ConsensusCore, Genesis};
use cairn_kernel::wal::EventMessage;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::app::Application;
use crate::config::NodeConfig;
use crate::engine::{Engine, EngineConfig, EngineParts, EngineResult};
use crate::errors::{EngineError, NodeError};
use crate::events::EventSwitch;
use crate::handshake::{HandshakeOutcome, Handshaker};
use crate::mempool::Mempool;
use crate::persistence::{BlockStore, StateStore};
use crate::privval::PrivValidator;
use crate::recovery::{catchup_replay, ReplayReport};
use crate::wal_writer::Wal;

pub struct NodeParts {
    pub genesis: Genesis,
    pub app: Box<dyn Application>,
    pub mempool: Box<dyn Mempool>,
    pub priv_val: Box<dyn PrivValidator>,
    pub block_store: Arc<dyn BlockStore>,
    pub state_store: Arc<dyn StateStore>,
    pub wal: Box<dyn Wal>,
}

/// Stops a running node from another thread or task.
#[derive(Clone)]
pub struct StopHandle(Sender<()>);

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.0.try_send(());
    }
}

type ConsensusThread = JoinHandle<(EngineResult<()>, u64)>;

pub struct Node {
    engine: Option<Engine>,
    events: EventSwitch,
    block_store: Arc<dyn BlockStore>,
    peer_tx: Sender<EventMessage>,
    peer_rx: Receiver<EventMessage>,
    quit_tx: Sender<()>,
    quit_rx: Receiver<()>,
    thread: Option<ConsensusThread>,
    handshake: HandshakeOutcome,
    replay: ReplayReport,
}

impl Node {
    pub fn new(config: &NodeConfig, parts: NodeParts) -> Result<Self, NodeError> {
        Self::with_events(config, parts, EventSwitch::new())
    }

    /// Builds the node and brings it to the point where the event loop can
    /// start. Replayed finalizations are published on `events`.
    pub fn with_events(config: &NodeConfig, parts: NodeParts, events: EventSwitch) -> Result<Self, NodeError> {
        let NodeParts {
            genesis,
            mut app,
            mempool,
            priv_val,
            block_store,
            state_store,
            wal,
        } = parts;

        let state = match state_store.load_state()? {
            Some(state) => state,
            None => {
                tracing::info!("No saved state, starting from genesis of {}", genesis.chain_id);
                genesis.to_state()
            }
        };

        let mut handshaker = Handshaker::new(state_store.clone(), state, block_store.clone(), genesis);
        let handshake = handshaker.handshake(&mut *app)?;
        let state = handshaker.into_state();

        let last_commit = match state.last_block_height {
            0 => None,
            h => block_store.load_seen_commit(h)?,
        };
        let core = ConsensusCore::new(state, last_commit, Some(priv_val.id()), config.consensus.timeouts());

        let engine_config = EngineConfig {
            max_block_txs: config.consensus.max_block_txs,
            target_height: config.target_height,
        };
        let mut engine = Engine::new(
            core,
            EngineParts {
                wal,
                app,
                mempool,
                priv_val,
                block_store: block_store.clone(),
                state_store,
            },
            events.clone(),
            engine_config,
        )?;

        let replay = catchup_replay(&mut engine, config.wal.search_options())?;
        engine.ensure_marker()?;
        engine.start_live()?;

        let (peer_tx, peer_rx) = crossbeam_channel::unbounded();
        let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
        Ok(Self {
            engine: Some(engine),
            events,
            block_store,
            peer_tx,
            peer_rx,
            quit_tx,
            quit_rx,
            thread: None,
            handshake,
            replay,
        })
    }

    pub fn events(&self) -> &EventSwitch {
        &self.events
    }

    /// Inbound channel for consensus messages from peers.
    pub fn peer_sender(&self) -> Sender<EventMessage> {
        self.peer_tx.clone()
    }

    pub fn block_store(&self) -> &Arc<dyn BlockStore> {
        &self.block_store
    }

    pub fn handshake_outcome(&self) -> &HandshakeOutcome {
        &self.handshake
    }

    pub fn replay_report(&self) -> &ReplayReport {
        &self.replay
    }

    /// Engine state before `start`, for inspection.
    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn start(&mut self) -> Result<(), NodeError> {
        let mut engine = self.engine.take().ok_or(EngineError::AlreadyRunning)?;
        let peers = self.peer_rx.clone();
        let quit = self.quit_rx.clone();
        let handle = std::thread::Builder::new()
            .name("cairn-consensus".into())
            .spawn(move || {
                let result = engine.run(peers, quit);
                (result, engine.committed_height())
            })
            .map_err(EngineError::from)?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Asks the event loop to exit. Does not block.
    pub fn stop(&self) {
        let _ = self.quit_tx.try_send(());
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.quit_tx.clone())
    }

    /// Waits for the event loop and returns the last committed height.
    pub fn wait(&mut self) -> Result<u64, NodeError> {
        let handle = match self.thread.take() {
            Some(handle) => handle,
            None => return Ok(self.engine.as_ref().map_or(0, Engine::committed_height)),
        };
        match handle.join() {
            Ok((Ok(()), height)) => Ok(height),
            Ok((Err(e), _)) => Err(e.into()),
            Err(_) => Err(EngineError::Panicked.into()),
        }
    }

    /// `start` followed by `wait`.
    pub fn run(&mut self) -> Result<u64, NodeError> {
        self.start()?;
        self.wait()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
            if let Err(e) = self.wait() {
                tracing::warn!("Consensus exited with error on drop: {}", e);
            }
        }
    }
}
