// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Boundary to the replicated application.
//!
//! The application is a deterministic state machine driven one block at a
//! time: every transaction through `deliver_tx`, then `commit`, which returns
//! the new app hash. Calls may fail to model a broken connection.

pub mod kvstore;
pub mod replayed;

use cairn_kernel::types::{Hash, ValidatorSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use kvstore::KvStoreApp;
pub use replayed::ReplayedResponsesApp;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("application connection failed: {0}")]
    Connection(String),
    #[error("application state exhausted: {0}")]
    Exhausted(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppInfo {
    pub last_block_height: u64,
    pub last_block_app_hash: Hash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// 0 is success.
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// DeliverTx results of one block, saved before the application commits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciResponses {
    pub deliver_txs: Vec<TxResult>,
}

impl AbciResponses {
    pub fn results_hash(&self) -> Hash {
        Hash::of(&self.deliver_txs).unwrap_or(Hash::ZERO)
    }
}

pub trait Application: Send {
    fn info(&self) -> AppResult<AppInfo>;

    /// Called once, when the application reports height 0. May replace the
    /// genesis validator set.
    fn init_chain(&mut self, validators: &ValidatorSet) -> AppResult<Option<ValidatorSet>>;

    fn deliver_tx(&mut self, tx: &[u8]) -> AppResult<TxResult>;

    fn commit(&mut self) -> AppResult<Hash>;
}

impl<A: Application + ?Sized> Application for Box<A> {
    fn info(&self) -> AppResult<AppInfo> {
        (**self).info()
    }

    fn init_chain(&mut self, validators: &ValidatorSet) -> AppResult<Option<ValidatorSet>> {
        (**self).init_chain(validators)
    }

    fn deliver_tx(&mut self, tx: &[u8]) -> AppResult<TxResult> {
        (**self).deliver_tx(tx)
    }

    fn commit(&mut self) -> AppResult<Hash> {
        (**self).commit()
    }
}
