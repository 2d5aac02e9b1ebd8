// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Validators and the deterministic proposer schedule.

use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::error::KernelResult;
use crate::types::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ValidatorId(pub u64);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ValidatorId,
    pub voting_power: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Builds a set ordered by validator id. Duplicate ids keep the first entry.
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.sort_by_key(|v| v.id);
        validators.dedup_by_key(|v| v.id);
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    pub fn get(&self, id: ValidatorId) -> Option<&Validator> {
        self.validators
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .map(|idx| &self.validators[idx])
    }

    pub fn contains(&self, id: ValidatorId) -> bool {
        self.get(id).is_some()
    }

    pub fn total_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }

    /// Smallest voting power strictly greater than two thirds of the total.
    pub fn quorum(&self) -> u64 {
        self.total_power() * 2 / 3 + 1
    }

    /// Round-robin proposer for `(height, round)`.
    pub fn proposer(&self, height: u64, round: u32) -> Option<ValidatorId> {
        if self.validators.is_empty() {
            return None;
        }
        let n = self.validators.len() as u64;
        let idx = (height.wrapping_add(round as u64)) % n;
        Some(self.validators[idx as usize].id)
    }

    pub fn hash(&self) -> KernelResult<Hash> {
        Hash::of(&self.validators)
    }
}
