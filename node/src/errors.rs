// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cairn_kernel::error::KernelError;
use thiserror::Error;

use crate::executor::ExecError;
use crate::handshake::HandshakeError;
use crate::persistence::StoreError;
use crate::privval::SignError;
use crate::recovery::ReplayError;
use crate::wal_writer::WalError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Signing error: {0}")]
    Sign(#[from] SignError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Engine already running")]
    AlreadyRunning,
    #[error("Consensus thread panicked")]
    Panicked,
}

impl EngineError {
    /// True when the WAL wrapper stopped the node on purpose (a test stop
    /// height), as opposed to a real failure.
    pub fn is_planned_stop(&self) -> bool {
        matches!(self, EngineError::Wal(WalError::ReachedHeight(_)))
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Replay failed: {0}")]
    Replay(#[from] ReplayError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
}
