// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Votes and proposals.
//!
//! Sign bytes never include wall-clock time, so re-signing the same vote after
//! a restart yields the same signature.

use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::error::KernelResult;
use crate::types::hash::encode;
use crate::types::{BlockId, ValidatorId};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Signature(pub [u8; 32]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VoteType {
    Prevote,
    Precommit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: u64,
    pub round: u32,
    /// `None` is a vote for nil.
    pub block_id: Option<BlockId>,
    pub validator: ValidatorId,
    pub signature: Signature,
}

#[derive(Serialize)]
struct VoteSignBytes<'a> {
    chain_id: &'a str,
    vote_type: VoteType,
    height: u64,
    round: u32,
    block_id: &'a Option<BlockId>,
}

impl Vote {
    pub fn sign_bytes(&self, chain_id: &str) -> KernelResult<Vec<u8>> {
        encode(&VoteSignBytes {
            chain_id,
            vote_type: self.vote_type,
            height: self.height,
            round: self.round,
            block_id: &self.block_id,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub height: u64,
    pub round: u32,
    /// Round in which the proposed block was last locked, if any.
    pub pol_round: Option<u32>,
    pub block_id: BlockId,
    pub proposer: ValidatorId,
    pub signature: Signature,
}

#[derive(Serialize)]
struct ProposalSignBytes<'a> {
    chain_id: &'a str,
    height: u64,
    round: u32,
    pol_round: Option<u32>,
    block_id: &'a BlockId,
}

impl Proposal {
    pub fn sign_bytes(&self, chain_id: &str) -> KernelResult<Vec<u8>> {
        encode(&ProposalSignBytes {
            chain_id,
            height: self.height,
            round: self.round,
            pol_round: self.pol_round,
            block_id: &self.block_id,
        })
    }
}

/// Identifies which message a signer is being asked to sign, for double-sign checks.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignStep {
    Proposal,
    Prevote,
    Precommit,
}

impl From<VoteType> for SignStep {
    fn from(t: VoteType) -> Self {
        match t {
            VoteType::Prevote => SignStep::Prevote,
            VoteType::Precommit => SignStep::Precommit,
        }
    }
}
