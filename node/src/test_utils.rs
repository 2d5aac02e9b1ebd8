// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Fixtures shared by unit and integration tests.

use cairn_kernel::state::{ChainState, Genesis};
use cairn_kernel::types::{
    Block, BlockId, Commit, CommitSig, Hash, PartSet, Proposal, Signature, Tx, Validator, ValidatorId, ValidatorSet,
    Vote, VoteType, BLOCK_PART_SIZE,
};
use cairn_kernel::wal::{ConsensusMessage, WalMessage};
use cairn_persistence::DEFAULT_MAX_RECORD_SIZE;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::app::{AbciResponses, AppInfo, AppResult, Application, KvStoreApp, TxResult};
use crate::config::NodeConfig;
use crate::errors::NodeError;
use crate::events::EventSwitch;
use crate::executor::{exec_commit_block, BlockExecutor};
use crate::fault::{CrashingWal, FaultPolicy};
use crate::mempool::Mempool;
use crate::node::{Node, NodeParts};
use crate::persistence::{BlockStore, FileBlockStore, FileStateStore, MemBlockStore, MemStateStore, StateStore};
use crate::privval::{MockPv, PrivValidator};
use crate::wal_reader::{SearchOptions, WalDecoder, WalRecord};
use crate::wal_writer::FileWal;

pub const CHAIN_ID: &str = "cairn-test";

pub fn single_validator_genesis() -> Genesis {
    Genesis::new(
        CHAIN_ID,
        ValidatorSet::new(vec![Validator {
            id: ValidatorId(0),
            voting_power: 10,
        }]),
    )
}

/// Transactions the scripted mempool hands out at `height`: none at even
/// heights, `per_block` at odd ones.
pub fn scripted_txs(height: u64, per_block: usize) -> Vec<Tx> {
    if height % 2 == 0 {
        return Vec::new();
    }
    (0..per_block)
        .map(|i| format!("h{}-{}=v{}", height, i, height).into_bytes())
        .collect()
}

/// Mempool whose contents depend only on the height, so a restarted node
/// proposes exactly what the crashed one did.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedMempool {
    per_block: usize,
}

impl ScriptedMempool {
    pub fn new(per_block: usize) -> Self {
        Self { per_block }
    }
}

impl Mempool for ScriptedMempool {
    fn reap(&mut self, height: u64, max_txs: usize) -> Vec<Tx> {
        let mut txs = scripted_txs(height, self.per_block);
        txs.truncate(max_txs);
        txs
    }

    fn update(&mut self, _height: u64, _committed: &[Tx]) {}

    fn len(&self) -> usize {
        0
    }
}

/// A chain of blocks with everything needed to seed stores at any height.
#[derive(Debug, Clone)]
pub struct ChainFixture {
    pub genesis: Genesis,
    pub blocks: Vec<Block>,
    pub commits: Vec<Commit>,
    /// `states[h]` is the chain state after block `h`; `states[0]` is genesis.
    pub states: Vec<ChainState>,
    /// `responses[h - 1]` belongs to block `h`.
    pub responses: Vec<AbciResponses>,
}

fn commit_for(state: &ChainState, height: u64, block_id: BlockId) -> Commit {
    let mut pv = MockPv::new(ValidatorId(0));
    let mut vote = Vote {
        vote_type: VoteType::Precommit,
        height,
        round: 0,
        block_id: Some(block_id),
        validator: ValidatorId(0),
        signature: Signature::default(),
    };
    pv.sign_vote(&state.chain_id, &mut vote).expect("fresh signer");
    Commit {
        height,
        round: 0,
        block_id,
        signatures: vec![CommitSig {
            validator: vote.validator,
            signature: vote.signature,
        }],
    }
}

/// `n_blocks` blocks executed against a [`KvStoreApp`], with transactions at
/// odd heights.
pub fn make_chain(n_blocks: u64) -> ChainFixture {
    let genesis = single_validator_genesis();
    let state_store = MemStateStore::new();
    let executor = BlockExecutor::new(Arc::new(state_store.clone()));
    let mut app = KvStoreApp::new();

    let mut state = genesis.to_state();
    let mut fixture = ChainFixture {
        genesis,
        blocks: Vec::new(),
        commits: Vec::new(),
        states: vec![state.clone()],
        responses: Vec::new(),
    };
    let mut last_commit = None;
    for height in 1..=n_blocks {
        let block = state
            .make_block(height, scripted_txs(height, 3), last_commit.clone(), ValidatorId(0))
            .expect("block");
        let block_id = block.block_id(BLOCK_PART_SIZE).expect("block id");
        let commit = commit_for(&state, height, block_id);
        state = executor.apply_block(&mut app, &state, block_id, &block).expect("apply");
        fixture
            .responses
            .push(state_store.load_abci_responses(height).expect("load").expect("saved"));
        fixture.states.push(state.clone());
        fixture.blocks.push(block);
        fixture.commits.push(commit.clone());
        last_commit = Some(commit);
    }
    fixture
}

/// Chain whose recorded app hash after block `h` is `[h, 0, 0, ..]`.
/// Pair with [`BadApp`].
pub fn make_scripted_hash_chain(n_blocks: u64) -> ChainFixture {
    let genesis = single_validator_genesis();
    let mut state = genesis.to_state();
    let mut fixture = ChainFixture {
        genesis,
        blocks: Vec::new(),
        commits: Vec::new(),
        states: vec![state.clone()],
        responses: Vec::new(),
    };
    let mut last_commit = None;
    for height in 1..=n_blocks {
        let block = state
            .make_block(height, Vec::new(), last_commit.clone(), ValidatorId(0))
            .expect("block");
        let block_id = block.block_id(BLOCK_PART_SIZE).expect("block id");
        let commit = commit_for(&state, height, block_id);
        let responses = AbciResponses::default();
        state = state.next_state(height, block_id, scripted_hash(height), responses.results_hash());
        fixture.responses.push(responses);
        fixture.states.push(state.clone());
        fixture.blocks.push(block);
        fixture.commits.push(commit.clone());
        last_commit = Some(commit);
    }
    fixture
}

pub fn scripted_hash(height: u64) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[0] = height as u8;
    Hash(bytes)
}

impl ChainFixture {
    pub fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, height: u64) -> &Block {
        &self.blocks[height as usize - 1]
    }

    /// Block store holding blocks `1..=height`.
    pub fn block_store(&self, height: u64) -> MemBlockStore {
        let store = MemBlockStore::new();
        for h in 1..=height {
            store
                .save_block(self.block(h), &self.commits[h as usize - 1])
                .expect("save block");
        }
        store
    }

    /// State store at `height`, with the responses of every block saved.
    pub fn state_store(&self, height: u64) -> MemStateStore {
        let store = MemStateStore::new();
        store.save_state(&self.states[height as usize]).expect("save state");
        for (i, responses) in self.responses.iter().enumerate() {
            store
                .save_abci_responses(i as u64 + 1, responses)
                .expect("save responses");
        }
        store
    }

    /// Fresh application that has committed blocks `1..=height`.
    pub fn app_at(&self, height: u64) -> KvStoreApp {
        let mut app = KvStoreApp::new();
        for h in 1..=height {
            exec_commit_block(&mut app, self.block(h)).expect("exec");
        }
        app
    }
}

/// Application that reports the hashes of [`make_scripted_hash_chain`]
/// until `wrong_from`, and garbage from then on.
#[derive(Debug, Clone)]
pub struct BadApp {
    height: u64,
    app_hash: Hash,
    wrong_from: u64,
}

impl BadApp {
    pub fn new(wrong_from: u64) -> Self {
        Self {
            height: 0,
            app_hash: Hash::ZERO,
            wrong_from,
        }
    }

    /// Wrong from the first block on.
    pub fn all_wrong() -> Self {
        Self::new(1)
    }
}

impl Application for BadApp {
    fn info(&self) -> AppResult<AppInfo> {
        Ok(AppInfo {
            last_block_height: self.height,
            last_block_app_hash: self.app_hash,
        })
    }

    fn init_chain(&mut self, _validators: &ValidatorSet) -> AppResult<Option<ValidatorSet>> {
        Ok(None)
    }

    fn deliver_tx(&mut self, _tx: &[u8]) -> AppResult<TxResult> {
        Ok(TxResult::default())
    }

    fn commit(&mut self) -> AppResult<Hash> {
        self.height += 1;
        self.app_hash = if self.height >= self.wrong_from {
            Hash::digest(&self.height.to_le_bytes())
        } else {
            scripted_hash(self.height)
        };
        Ok(self.app_hash)
    }
}

/// Config for the crash tests: one validator, no commit pause, and a
/// propose timeout long enough that it never fires in a healthy run.
pub fn crash_test_config(home: &Path, target_height: u64) -> NodeConfig {
    let mut config = NodeConfig::with_home(home);
    config.chain_id = CHAIN_ID.to_string();
    config.target_height = Some(target_height);
    config.consensus.timeout_commit_ms = 0;
    config.consensus.timeout_propose_ms = 1000;
    config.wal.flush_interval_ms = 50;
    config
}

/// Result of one node run against on-disk stores.
#[derive(Debug)]
pub struct CrashRun {
    /// WAL writes attempted, including the faulted one.
    pub writes: u64,
    pub result: Result<u64, NodeError>,
}

/// Builds a node over the files under `config.home` with a fresh
/// application and signer. The node has handshaken and replayed but not
/// started.
pub fn open_node(config: &NodeConfig, policy: FaultPolicy) -> Result<Node, NodeError> {
    let wal = CrashingWal::new(FileWal::open(config.wal_file(), config.wal.clone())?, policy);
    build_node(config, wal, EventSwitch::new())
}

/// Runs a node from [`open_node`] until the target, a crash or a stop.
pub fn run_node(config: &NodeConfig, policy: FaultPolicy) -> CrashRun {
    run_node_with_events(config, policy, EventSwitch::new())
}

pub fn run_node_with_events(config: &NodeConfig, policy: FaultPolicy, events: EventSwitch) -> CrashRun {
    let wal = match FileWal::open(config.wal_file(), config.wal.clone()) {
        Ok(wal) => CrashingWal::new(wal, policy),
        Err(e) => {
            return CrashRun {
                writes: 0,
                result: Err(e.into()),
            }
        }
    };
    let counter = wal.write_counter();
    let result = build_node(config, wal, events).and_then(|mut node| node.run());
    CrashRun {
        writes: counter.load(Ordering::SeqCst),
        result,
    }
}

fn build_node(config: &NodeConfig, wal: CrashingWal<FileWal>, events: EventSwitch) -> Result<Node, NodeError> {
    let block_store = Arc::new(FileBlockStore::open(config.blocks_file())?);
    let state_store = Arc::new(FileStateStore::open(config.state_file())?);
    let parts = NodeParts {
        genesis: single_validator_genesis(),
        app: Box::new(KvStoreApp::new()),
        mempool: Box::new(ScriptedMempool::new(3)),
        priv_val: Box::new(MockPv::new(ValidatorId(0))),
        block_store,
        state_store,
        wal: Box::new(wal),
    };
    Node::with_events(config, parts, events)
}

/// Hashes of blocks `1..=height` in the block store under `config.home`.
pub fn stored_block_hashes(config: &NodeConfig, height: u64) -> Vec<Hash> {
    let store = FileBlockStore::open(config.blocks_file()).expect("open block store");
    (1..=height)
        .map(|h| {
            store
                .load_block(h)
                .expect("load block")
                .unwrap_or_else(|| panic!("block {} missing", h))
                .hash()
                .expect("hash")
        })
        .collect()
}

#[derive(Default)]
struct HeightLog {
    proposal: Option<Proposal>,
    parts: Option<PartSet>,
    precommits: Vec<Vote>,
}

/// Reassembles the committed chain from a WAL alone: for every height that
/// has an `EndHeight`, the block from the last proposal's parts and the
/// commit from the precommits for it.
pub fn blockchain_from_wal(path: &Path) -> Vec<(Block, Commit)> {
    let decoder = WalDecoder::open(path, DEFAULT_MAX_RECORD_SIZE, SearchOptions::default()).expect("open wal");
    let mut heights: BTreeMap<u64, HeightLog> = BTreeMap::new();
    let mut chain = Vec::new();

    for record in decoder {
        let msg = match record.expect("wal record") {
            WalRecord::Message(timed) => timed.msg,
            WalRecord::Marker(_) => continue,
        };
        match msg {
            WalMessage::Event(ev) => {
                let log = heights.entry(ev.msg.height()).or_default();
                match ev.msg {
                    ConsensusMessage::Proposal(p) => {
                        log.parts = Some(PartSet::from_header(p.block_id.parts));
                        log.proposal = Some(p);
                    }
                    ConsensusMessage::BlockPart { round, part, .. } => {
                        let current = log.proposal.as_ref().map(|p| p.round);
                        if let (Some(parts), Some(r)) = (log.parts.as_mut(), current) {
                            if r == round {
                                parts.add_part(part).expect("part");
                            }
                        }
                    }
                    ConsensusMessage::Vote(v) if v.vote_type == VoteType::Precommit => {
                        log.precommits.push(v);
                    }
                    ConsensusMessage::Vote(_) => {}
                }
            }
            WalMessage::EndHeight { height } => {
                let Some(log) = heights.remove(&height) else {
                    continue;
                };
                let proposal = log.proposal.expect("proposal");
                let bytes = log.parts.expect("parts").assemble().expect("complete parts");
                let block = Block::from_bytes(&bytes).expect("block");
                let signatures = log
                    .precommits
                    .iter()
                    .filter(|v| v.round == proposal.round && v.block_id == Some(proposal.block_id))
                    .map(|v| CommitSig {
                        validator: v.validator,
                        signature: v.signature,
                    })
                    .collect();
                let commit = Commit {
                    height,
                    round: proposal.round,
                    block_id: proposal.block_id,
                    signatures,
                };
                chain.push((block, commit));
            }
            WalMessage::Timeout(_) => {}
        }
    }
    chain
}
