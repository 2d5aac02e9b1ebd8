// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Blocks, block ids and commits.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::KernelResult;
use crate::types::hash::{decode, encode};
use crate::types::{Hash, PartSet, PartSetHeader, Signature, ValidatorId};

pub type Tx = Vec<u8>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Hash,
    pub parts: PartSetHeader,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub height: u64,
    pub last_block_id: Option<BlockId>,
    pub data_hash: Hash,
    /// Application state after executing the previous block.
    pub app_hash: Hash,
    pub last_commit_hash: Hash,
    pub validators_hash: Hash,
    pub proposer: ValidatorId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Tx>,
    /// Quorum certificate for the previous block. `None` at the first height.
    pub last_commit: Option<Commit>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> KernelResult<Hash> {
        Hash::of(&self.header)
    }

    pub fn to_bytes(&self) -> KernelResult<Vec<u8>> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> KernelResult<Self> {
        decode(bytes)
    }

    pub fn make_part_set(&self, part_size: usize) -> KernelResult<PartSet> {
        Ok(PartSet::from_data(&self.to_bytes()?, part_size))
    }

    pub fn block_id(&self, part_size: usize) -> KernelResult<BlockId> {
        Ok(BlockId {
            hash: self.hash()?,
            parts: self.make_part_set(part_size)?.header(),
        })
    }
}

pub fn txs_hash(txs: &[Tx]) -> KernelResult<Hash> {
    Hash::of(&txs)
}

pub fn commit_hash(commit: &Option<Commit>) -> KernelResult<Hash> {
    match commit {
        Some(c) => Hash::of(c),
        None => Ok(Hash::ZERO),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub validator: ValidatorId,
    pub signature: Signature,
}

/// Precommits from more than two thirds of the voting power for one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}
