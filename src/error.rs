// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use core::fmt;

use crate::types::{Hash, ValidatorId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Canonical encoding or decoding failed.
    Encoding,
    /// Message is for a height other than the one being decided.
    WrongHeight { expected: u64, got: u64 },
    /// Message is for a round other than the current one.
    WrongRound { expected: u32, got: u32 },
    /// Signer is not part of the validator set.
    UnknownValidator(ValidatorId),
    /// Proposal signed by someone other than the round's proposer.
    WrongProposer { expected: ValidatorId, got: ValidatorId },
    /// A proposal for this round was already accepted.
    DuplicateProposal,
    /// Same validator voted twice for different blocks in one round.
    ConflictingVote { validator: ValidatorId, round: u32 },
    /// Part does not fit the expected part set.
    InvalidPart { index: u32, total: u32 },
    /// No part set header is known yet for this height.
    UnexpectedPart,
    /// Assembled parts do not hash to the advertised root.
    PartSetMismatch { expected: Hash, got: Hash },
    /// Block contents failed validation against the chain state.
    InvalidBlock(&'static str),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Encoding => write!(f, "canonical encoding failed"),
            KernelError::WrongHeight { expected, got } => {
                write!(f, "wrong height: expected {}, got {}", expected, got)
            }
            KernelError::WrongRound { expected, got } => {
                write!(f, "wrong round: expected {}, got {}", expected, got)
            }
            KernelError::UnknownValidator(id) => write!(f, "unknown validator {}", id),
            KernelError::WrongProposer { expected, got } => {
                write!(f, "wrong proposer: expected {}, got {}", expected, got)
            }
            KernelError::DuplicateProposal => write!(f, "proposal already set for this round"),
            KernelError::ConflictingVote { validator, round } => {
                write!(f, "conflicting vote from {} in round {}", validator, round)
            }
            KernelError::InvalidPart { index, total } => {
                write!(f, "invalid part {} of {}", index, total)
            }
            KernelError::UnexpectedPart => write!(f, "block part without a known part set"),
            KernelError::PartSetMismatch { expected, got } => {
                write!(f, "part set hash mismatch: expected {}, got {}", expected, got)
            }
            KernelError::InvalidBlock(reason) => write!(f, "invalid block: {}", reason),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KernelError {}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
pub type Result<T> = KernelResult<T>;
