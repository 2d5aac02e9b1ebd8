// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! 32-byte digests.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn digest(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// Digest of the canonical (bincode, standard config) encoding of `value`.
    pub fn of<T: Serialize>(value: &T) -> KernelResult<Self> {
        let bytes = encode(value)?;
        Ok(Self::digest(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Canonical encoding used for hashing and for everything written to disk.
pub fn encode<T: Serialize>(value: &T) -> KernelResult<alloc::vec::Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|_| KernelError::Encoding)
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> KernelResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|_| KernelError::Encoding)
}
