// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Runs decided blocks through the application.

use cairn_kernel::error::KernelError;
use cairn_kernel::state::ChainState;
use cairn_kernel::types::{Block, BlockId, Hash};
use std::sync::Arc;
use thiserror::Error;

use crate::app::{AbciResponses, AppError, Application};
use crate::persistence::{StateStore, StoreError};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] KernelError),
    #[error("application error: {0}")]
    App(#[from] AppError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct BlockExecutor {
    state_store: Arc<dyn StateStore>,
}

impl BlockExecutor {
    pub fn new(state_store: Arc<dyn StateStore>) -> Self {
        Self { state_store }
    }

    /// Validates `block` against `state`, executes it, saves the DeliverTx
    /// results before the application commits, then saves and returns the
    /// next chain state.
    pub fn apply_block(
        &self,
        app: &mut dyn Application,
        state: &ChainState,
        block_id: BlockId,
        block: &Block,
    ) -> Result<ChainState, ExecError> {
        state.validate_block(block)?;

        let responses = deliver_block(app, block)?;
        self.state_store.save_abci_responses(block.height(), &responses)?;
        let app_hash = app.commit()?;

        let next = state.next_state(block.height(), block_id, app_hash, responses.results_hash());
        self.state_store.save_state(&next)?;

        let invalid = responses.deliver_txs.iter().filter(|r| !r.is_ok()).count();
        tracing::debug!(
            height = block.height(),
            txs = block.txs.len(),
            invalid,
            app_hash = %app_hash,
            "Applied block"
        );
        Ok(next)
    }
}

fn deliver_block(app: &mut dyn Application, block: &Block) -> Result<AbciResponses, AppError> {
    let mut deliver_txs = Vec::with_capacity(block.txs.len());
    for tx in &block.txs {
        deliver_txs.push(app.deliver_tx(tx)?);
    }
    Ok(AbciResponses { deliver_txs })
}

/// Executes and commits `block` without touching any stored state. Returns
/// the app hash.
pub fn exec_commit_block(app: &mut dyn Application, block: &Block) -> Result<Hash, AppError> {
    deliver_block(app, block)?;
    app.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::KvStoreApp;
    use crate::persistence::MemStateStore;
    use cairn_kernel::state::Genesis;
    use cairn_kernel::types::{Validator, ValidatorId, ValidatorSet, BLOCK_PART_SIZE};

    fn genesis() -> ChainState {
        Genesis::new(
            "exec-test",
            ValidatorSet::new(vec![Validator {
                id: ValidatorId(0),
                voting_power: 1,
            }]),
        )
        .to_state()
    }

    #[test]
    fn test_apply_block_saves_responses_then_state() {
        let store = MemStateStore::new();
        let exec = BlockExecutor::new(Arc::new(store.clone()));
        let mut app = KvStoreApp::new();
        let state = genesis();

        let block = state
            .make_block(1, vec![b"a=1".to_vec(), Vec::new()], None, ValidatorId(0))
            .unwrap();
        let id = block.block_id(BLOCK_PART_SIZE).unwrap();
        let next = exec.apply_block(&mut app, &state, id, &block).unwrap();

        assert_eq!(next.last_block_height, 1);
        assert_eq!(next.last_block_id, Some(id));
        assert_eq!(next.app_hash, app.info().unwrap().last_block_app_hash);
        assert_eq!(store.load_state().unwrap(), Some(next));
        let saved = store.load_abci_responses(1).unwrap().unwrap();
        assert_eq!(saved.deliver_txs.len(), 2);
        assert!(!saved.deliver_txs[1].is_ok());
    }

    #[test]
    fn test_apply_rejects_block_for_wrong_height() {
        let exec = BlockExecutor::new(Arc::new(MemStateStore::new()));
        let mut app = KvStoreApp::new();
        let state = genesis();
        let block = state.make_block(2, vec![], None, ValidatorId(0)).unwrap();
        let id = block.block_id(BLOCK_PART_SIZE).unwrap();

        assert!(matches!(
            exec.apply_block(&mut app, &state, id, &block),
            Err(ExecError::InvalidBlock(KernelError::WrongHeight { expected: 1, got: 2 }))
        ));
        assert_eq!(app.info().unwrap().last_block_height, 0);
    }

    #[test]
    fn test_exec_commit_matches_apply() {
        let state = genesis();
        let block = state.make_block(1, vec![b"x=y".to_vec()], None, ValidatorId(0)).unwrap();

        let mut a = KvStoreApp::new();
        let hash = exec_commit_block(&mut a, &block).unwrap();

        let mut b = KvStoreApp::new();
        let exec = BlockExecutor::new(Arc::new(MemStateStore::new()));
        let next = exec
            .apply_block(&mut b, &state, block.block_id(BLOCK_PART_SIZE).unwrap(), &block)
            .unwrap();
        assert_eq!(hash, next.app_hash);
    }
}
