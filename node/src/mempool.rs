// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cairn_kernel::types::Tx;
use std::collections::VecDeque;

/// Source of transactions for proposals.
pub trait Mempool: Send {
    /// Up to `max_txs` transactions for a block at `height`.
    fn reap(&mut self, height: u64, max_txs: usize) -> Vec<Tx>;

    /// Drops transactions committed in the block at `height`.
    fn update(&mut self, height: u64, committed: &[Tx]);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO mempool. Reaping does not remove; only `update` does.
#[derive(Debug, Default)]
pub struct VecMempool {
    txs: VecDeque<Tx>,
}

impl VecMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: Tx) {
        if !self.txs.contains(&tx) {
            self.txs.push_back(tx);
        }
    }
}

impl Mempool for VecMempool {
    fn reap(&mut self, _height: u64, max_txs: usize) -> Vec<Tx> {
        self.txs.iter().take(max_txs).cloned().collect()
    }

    fn update(&mut self, _height: u64, committed: &[Tx]) {
        self.txs.retain(|tx| !committed.contains(tx));
    }

    fn len(&self) -> usize {
        self.txs.len()
    }
}
