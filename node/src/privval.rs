// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Vote and proposal signing.
//!
//! [`MockPv`] stands in for a real key: its "signature" is a BLAKE3 MAC over
//! the sign bytes. It still enforces the last-sign-state rules a real signer
//! must, so a restarted node can never sign two different things at one
//! height/round/step.

use cairn_kernel::types::{Proposal, SignStep, Signature, ValidatorId, Vote};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("conflicting data at height {height} round {round} step {step:?}")]
    DoubleSign { height: u64, round: u32, step: SignStep },
    #[error("height/round/step regression: last signed {last:?}, asked for {requested:?}")]
    Regression {
        last: (u64, u32, SignStep),
        requested: (u64, u32, SignStep),
    },
    #[error("could not encode sign bytes")]
    Encoding,
}

pub trait PrivValidator: Send {
    fn id(&self) -> ValidatorId;
    fn sign_vote(&mut self, chain_id: &str, vote: &mut Vote) -> Result<(), SignError>;
    fn sign_proposal(&mut self, chain_id: &str, proposal: &mut Proposal) -> Result<(), SignError>;
}

#[derive(Debug, Clone)]
struct LastSignState {
    height: u64,
    round: u32,
    step: SignStep,
    sign_bytes: Vec<u8>,
    signature: Signature,
}

#[derive(Debug, Clone)]
pub struct MockPv {
    id: ValidatorId,
    key: [u8; 32],
    last: Option<LastSignState>,
}

impl MockPv {
    pub fn new(id: ValidatorId) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cairn-mock-pv");
        hasher.update(&id.0.to_le_bytes());
        Self {
            id,
            key: *hasher.finalize().as_bytes(),
            last: None,
        }
    }

    pub fn signature_for(&self, sign_bytes: &[u8]) -> Signature {
        Signature(*blake3::keyed_hash(&self.key, sign_bytes).as_bytes())
    }

    pub fn verify(&self, sign_bytes: &[u8], signature: &Signature) -> bool {
        self.signature_for(sign_bytes) == *signature
    }

    fn sign(&mut self, height: u64, round: u32, step: SignStep, sign_bytes: Vec<u8>) -> Result<Signature, SignError> {
        if let Some(last) = &self.last {
            let requested = (height, round, step.clone());
            let previous = (last.height, last.round, last.step.clone());
            if requested < previous {
                return Err(SignError::Regression {
                    last: previous,
                    requested,
                });
            }
            if requested == previous {
                if last.sign_bytes == sign_bytes {
                    return Ok(last.signature);
                }
                return Err(SignError::DoubleSign { height, round, step });
            }
        }

        let signature = self.signature_for(&sign_bytes);
        self.last = Some(LastSignState {
            height,
            round,
            step,
            sign_bytes,
            signature,
        });
        Ok(signature)
    }
}

impl PrivValidator for MockPv {
    fn id(&self) -> ValidatorId {
        self.id
    }

    fn sign_vote(&mut self, chain_id: &str, vote: &mut Vote) -> Result<(), SignError> {
        let bytes = vote.sign_bytes(chain_id).map_err(|_| SignError::Encoding)?;
        vote.signature = self.sign(vote.height, vote.round, vote.vote_type.into(), bytes)?;
        Ok(())
    }

    fn sign_proposal(&mut self, chain_id: &str, proposal: &mut Proposal) -> Result<(), SignError> {
        let bytes = proposal.sign_bytes(chain_id).map_err(|_| SignError::Encoding)?;
        proposal.signature = self.sign(proposal.height, proposal.round, SignStep::Proposal, bytes)?;
        Ok(())
    }
}
