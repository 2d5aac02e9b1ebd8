//! Block parts.
//!
//! A block travels as its canonical bytes split into fixed-size parts. The
//! part set hash commits to the ordered part digests; individual parts are
//! only trusted once the full set reassembles to the advertised root.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::types::Hash;

pub const BLOCK_PART_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub index: u32,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Option<Part>>,
    count: u32,
}

fn root_of<'a>(chunks: impl Iterator<Item = &'a [u8]>) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for chunk in chunks {
        hasher.update(blake3::hash(chunk).as_bytes());
    }
    Hash(*hasher.finalize().as_bytes())
}

impl PartSet {
    pub fn from_data(data: &[u8], part_size: usize) -> Self {
        let part_size = part_size.max(1);
        let parts: Vec<Option<Part>> = data
            .chunks(part_size)
            .enumerate()
            .map(|(i, chunk)| {
                Some(Part {
                    index: i as u32,
                    bytes: chunk.to_vec(),
                })
            })
            .collect();
        let total = parts.len() as u32;
        let hash = root_of(data.chunks(part_size));
        Self {
            header: PartSetHeader { total, hash },
            parts,
            count: total,
        }
    }

    /// Empty set waiting for the parts described by `header`.
    pub fn from_header(header: PartSetHeader) -> Self {
        let mut parts = Vec::with_capacity(header.total as usize);
        parts.resize(header.total as usize, None);
        Self {
            header,
            parts,
            count: 0,
        }
    }

    pub fn header(&self) -> PartSetHeader {
        self.header
    }

    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        self.header == *header
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.header.total
    }

    pub fn parts(&self) -> impl DoubleEndedIterator<Item = &Part> {
        self.parts.iter().flatten()
    }

    /// Returns `Ok(false)` when the part was already present.
    pub fn add_part(&mut self, part: Part) -> KernelResult<bool> {
        let slot = self
            .parts
            .get_mut(part.index as usize)
            .ok_or(KernelError::InvalidPart {
                index: part.index,
                total: self.header.total,
            })?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(part);
        self.count += 1;
        Ok(true)
    }

    /// Concatenated bytes of a complete set, checked against the header hash.
    pub fn assemble(&self) -> KernelResult<Vec<u8>> {
        if !self.is_complete() {
            return Err(KernelError::InvalidPart {
                index: self.count,
                total: self.header.total,
            });
        }
        let got = root_of(self.parts().map(|p| p.bytes.as_slice()));
        if got != self.header.hash {
            return Err(KernelError::PartSetMismatch {
                expected: self.header.hash,
                got,
            });
        }
        let mut out = Vec::new();
        for part in self.parts() {
            out.extend_from_slice(&part.bytes);
        }
        Ok(out)
    }
}
