// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chain state: everything needed to build and validate the next block.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::types::block::{commit_hash, txs_hash};
use crate::types::{Block, BlockId, Commit, Hash, Header, Tx, ValidatorId, ValidatorSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: String,
    pub initial_height: u64,
    pub validators: ValidatorSet,
    pub app_hash: Hash,
}

impl Genesis {
    pub fn new(chain_id: impl Into<String>, validators: ValidatorSet) -> Self {
        Self {
            chain_id: chain_id.into(),
            initial_height: 1,
            validators,
            app_hash: Hash::ZERO,
        }
    }

    pub fn to_state(&self) -> ChainState {
        ChainState {
            chain_id: self.chain_id.clone(),
            initial_height: self.initial_height,
            last_block_height: self.initial_height.saturating_sub(1),
            last_block_id: None,
            validators: self.validators.clone(),
            app_hash: self.app_hash,
            last_results_hash: Hash::ZERO,
        }
    }
}

/// Durable record of the last applied block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: String,
    pub initial_height: u64,
    pub last_block_height: u64,
    pub last_block_id: Option<BlockId>,
    pub validators: ValidatorSet,
    /// Application hash after `last_block_height` was committed.
    pub app_hash: Hash,
    pub last_results_hash: Hash,
}

impl ChainState {
    pub fn next_height(&self) -> u64 {
        self.last_block_height + 1
    }

    pub fn make_block(
        &self,
        height: u64,
        txs: Vec<Tx>,
        last_commit: Option<Commit>,
        proposer: ValidatorId,
    ) -> KernelResult<Block> {
        let header = Header {
            chain_id: self.chain_id.clone(),
            height,
            last_block_id: self.last_block_id,
            data_hash: txs_hash(&txs)?,
            app_hash: self.app_hash,
            last_commit_hash: commit_hash(&last_commit)?,
            validators_hash: self.validators.hash()?,
            proposer,
        };
        Ok(Block {
            header,
            txs,
            last_commit,
        })
    }

    pub fn validate_block(&self, block: &Block) -> KernelResult<()> {
        let h = &block.header;
        if h.chain_id != self.chain_id {
            return Err(KernelError::InvalidBlock("wrong chain id"));
        }
        if h.height != self.next_height() {
            return Err(KernelError::WrongHeight {
                expected: self.next_height(),
                got: h.height,
            });
        }
        if h.last_block_id != self.last_block_id {
            return Err(KernelError::InvalidBlock("wrong last block id"));
        }
        if h.app_hash != self.app_hash {
            return Err(KernelError::InvalidBlock("wrong app hash"));
        }
        if h.validators_hash != self.validators.hash()? {
            return Err(KernelError::InvalidBlock("wrong validators hash"));
        }
        if h.data_hash != txs_hash(&block.txs)? {
            return Err(KernelError::InvalidBlock("wrong data hash"));
        }
        if h.last_commit_hash != commit_hash(&block.last_commit)? {
            return Err(KernelError::InvalidBlock("wrong last commit hash"));
        }
        if !self.validators.contains(h.proposer) {
            return Err(KernelError::UnknownValidator(h.proposer));
        }

        match (&block.last_commit, h.height == self.initial_height) {
            (None, true) => Ok(()),
            (Some(_), true) => Err(KernelError::InvalidBlock("commit at initial height")),
            (None, false) => Err(KernelError::InvalidBlock("missing last commit")),
            (Some(commit), false) => self.validate_last_commit(commit),
        }
    }

    fn validate_last_commit(&self, commit: &Commit) -> KernelResult<()> {
        if commit.height != self.last_block_height {
            return Err(KernelError::WrongHeight {
                expected: self.last_block_height,
                got: commit.height,
            });
        }
        if Some(commit.block_id) != self.last_block_id {
            return Err(KernelError::InvalidBlock("commit for another block"));
        }
        let mut seen: Vec<ValidatorId> = Vec::with_capacity(commit.signatures.len());
        let mut power = 0u64;
        for sig in &commit.signatures {
            if seen.contains(&sig.validator) {
                return Err(KernelError::InvalidBlock("duplicate commit signature"));
            }
            seen.push(sig.validator);
            power += self
                .validators
                .get(sig.validator)
                .ok_or(KernelError::UnknownValidator(sig.validator))?
                .voting_power;
        }
        if power < self.validators.quorum() {
            return Err(KernelError::InvalidBlock("commit without quorum"));
        }
        Ok(())
    }

    /// State after the block at `height` was executed and committed.
    pub fn next_state(&self, height: u64, block_id: BlockId, app_hash: Hash, results_hash: Hash) -> ChainState {
        ChainState {
            chain_id: self.chain_id.clone(),
            initial_height: self.initial_height,
            last_block_height: height,
            last_block_id: Some(block_id),
            validators: self.validators.clone(),
            app_hash,
            last_results_hash: results_hash,
        }
    }
}
