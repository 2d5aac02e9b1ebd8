use cairn_kernel::types::{Validator, ValidatorId, ValidatorSet};
use cairn_node::app::{Application, KvStoreApp};
use cairn_node::handshake::{HandshakeError, HandshakePhase, Handshaker};
use cairn_node::persistence::{MemStateStore, StateStore};
use cairn_node::test_utils::{make_chain, make_scripted_hash_chain, BadApp, ChainFixture};
use std::sync::Arc;

const N_BLOCKS: u64 = 6;

/// How far the state and application got before the "crash".
#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Everything was saved; the app lags by `N_BLOCKS - n` blocks.
    AllSaved,
    /// The last block was saved but never applied; the app lags further.
    BlockSavedAppBehind,
    /// The last block was saved and committed by the app, but the state
    /// update was lost.
    BlockSavedAppCommitted,
}

fn handshake(chain: &ChainFixture, mode: Mode, n: u64) -> (Handshaker, KvStoreApp, Result<(), HandshakeError>) {
    let (state_height, app_height) = match mode {
        Mode::AllSaved => (N_BLOCKS, n),
        Mode::BlockSavedAppBehind => (N_BLOCKS - 1, n.saturating_sub(1)),
        Mode::BlockSavedAppCommitted => (N_BLOCKS - 1, n),
    };
    let block_store = Arc::new(chain.block_store(N_BLOCKS));
    let state_store = Arc::new(chain.state_store(state_height));
    let state = state_store.load_state().unwrap().unwrap();

    let mut app = chain.app_at(app_height);
    let mut hs = Handshaker::new(state_store, state, block_store, chain.genesis.clone());
    let result = hs.handshake(&mut app).map(|_| ());
    (hs, app, result)
}

fn expect_replayed(mode: Mode, cases: &[(u64, u64)]) {
    let chain = make_chain(N_BLOCKS);
    let final_state = &chain.states[N_BLOCKS as usize];
    for &(n, expected) in cases {
        let (hs, app, result) = handshake(&chain, mode, n);
        result.unwrap_or_else(|e| panic!("{:?} with app at {}: {}", mode, n, e));
        assert_eq!(hs.n_blocks(), expected, "{:?} with app at {}", mode, n);
        assert_eq!(hs.phase(), HandshakePhase::Done);
        assert_eq!(hs.state(), final_state, "{:?} with app at {}", mode, n);
        assert_eq!(app.info().unwrap().last_block_app_hash, final_state.app_hash);
    }
}

#[test]
fn test_handshake_all_saved() {
    expect_replayed(Mode::AllSaved, &[(0, 6), (1, 5), (5, 1), (6, 0)]);
}

#[test]
fn test_handshake_block_saved_app_behind() {
    expect_replayed(Mode::BlockSavedAppBehind, &[(0, 6), (1, 6), (5, 2), (6, 1)]);
}

#[test]
fn test_handshake_block_saved_app_committed() {
    expect_replayed(Mode::BlockSavedAppCommitted, &[(0, 6), (1, 5), (5, 1), (6, 1)]);
}

#[test]
fn test_committed_app_is_not_re_executed() {
    let chain = make_chain(N_BLOCKS);
    let (_, app, result) = handshake(&chain, Mode::BlockSavedAppCommitted, N_BLOCKS);
    result.unwrap();
    assert_eq!(app.info().unwrap().last_block_height, N_BLOCKS);
}

#[test]
fn test_handshake_saves_final_state() {
    let chain = make_chain(N_BLOCKS);
    let block_store = Arc::new(chain.block_store(N_BLOCKS));
    let state_store = Arc::new(chain.state_store(N_BLOCKS - 1));
    let state = state_store.load_state().unwrap().unwrap();
    let mut app = chain.app_at(0);

    let mut hs = Handshaker::new(state_store.clone(), state, block_store, chain.genesis.clone());
    let outcome = hs.handshake(&mut app).unwrap();
    assert_eq!(outcome.store_height, N_BLOCKS);
    assert_eq!(outcome.blocks_replayed, 6);
    assert_eq!(state_store.load_state().unwrap().unwrap(), chain.states[N_BLOCKS as usize]);
}

fn bad_app_error(app: &mut BadApp) -> HandshakeError {
    let chain = make_scripted_hash_chain(3);
    let block_store = Arc::new(chain.block_store(3));
    let state_store = Arc::new(chain.state_store(3));
    let state = state_store.load_state().unwrap().unwrap();
    let mut hs = Handshaker::new(state_store, state, block_store, chain.genesis.clone());
    let err = hs.handshake(app).unwrap_err();
    assert_eq!(hs.phase(), HandshakePhase::Fatal);
    err
}

#[test]
fn test_app_hash_wrong_from_first_block() {
    match bad_app_error(&mut BadApp::all_wrong()) {
        HandshakeError::AppHashMismatch { height, .. } => assert_eq!(height, 1),
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_app_hash_wrong_only_at_last_block() {
    match bad_app_error(&mut BadApp::new(3)) {
        HandshakeError::AppHashMismatch { height, expected, actual } => {
            assert_eq!(height, 3);
            assert_eq!(expected, cairn_node::test_utils::scripted_hash(3));
            assert_ne!(actual, expected);
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_app_ahead_of_store_is_rejected() {
    let chain = make_chain(3);
    let block_store = Arc::new(chain.block_store(2));
    let state_store = Arc::new(chain.state_store(2));
    let state = state_store.load_state().unwrap().unwrap();
    let mut app = chain.app_at(3);
    let mut hs = Handshaker::new(state_store, state, block_store, chain.genesis.clone());
    assert!(matches!(
        hs.handshake(&mut app),
        Err(HandshakeError::AppBlockHeightTooHigh { app: 3, store: 2 })
    ));
}

#[test]
fn test_state_ahead_of_store_is_rejected() {
    let chain = make_chain(3);
    let block_store = Arc::new(chain.block_store(1));
    let state_store = Arc::new(chain.state_store(3));
    let state = state_store.load_state().unwrap().unwrap();
    let mut hs = Handshaker::new(state_store, state, block_store, chain.genesis.clone());
    assert!(matches!(
        hs.handshake(&mut chain.app_at(0)),
        Err(HandshakeError::StateAheadOfStore { state: 3, store: 1 })
    ));
}

#[test]
fn test_committed_block_without_saved_responses_is_rejected() {
    let chain = make_chain(3);
    let block_store = Arc::new(chain.block_store(3));
    let state_store = Arc::new(MemStateStore::new());
    state_store.save_state(&chain.states[2]).unwrap();
    let state = chain.states[2].clone();
    let mut hs = Handshaker::new(state_store, state, block_store, chain.genesis.clone());
    assert!(matches!(
        hs.handshake(&mut chain.app_at(3)),
        Err(HandshakeError::MissingResponses(3))
    ));
}

#[test]
fn test_store_too_far_ahead_is_rejected() {
    let chain = make_chain(3);
    let block_store = Arc::new(chain.block_store(3));
    let state_store = Arc::new(chain.state_store(1));
    let state = state_store.load_state().unwrap().unwrap();
    let mut hs = Handshaker::new(state_store, state, block_store, chain.genesis.clone());
    assert!(matches!(
        hs.handshake(&mut chain.app_at(0)),
        Err(HandshakeError::StoreTooFarAhead { store: 3, state: 1 })
    ));
}

#[test]
fn test_init_chain_validator_update_is_adopted() {
    let chain = make_chain(0);
    let block_store = Arc::new(chain.block_store(0));
    let state_store = Arc::new(chain.state_store(0));
    let state = state_store.load_state().unwrap().unwrap();
    let update = ValidatorSet::new(vec![
        Validator {
            id: ValidatorId(0),
            voting_power: 10,
        },
        Validator {
            id: ValidatorId(1),
            voting_power: 20,
        },
    ]);
    let mut app = KvStoreApp::new().with_validator_update(update.clone());

    let mut hs = Handshaker::new(state_store.clone(), state, block_store, chain.genesis.clone());
    hs.handshake(&mut app).unwrap();
    assert_eq!(hs.n_blocks(), 0);
    assert_eq!(hs.state().validators, update);
    assert_eq!(state_store.load_state().unwrap().unwrap().validators, update);
}
