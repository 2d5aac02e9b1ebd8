// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cairn_kernel::types::{Hash, ValidatorSet};
use std::collections::BTreeMap;

use super::{AppInfo, AppResult, Application, TxResult};

/// In-memory key/value application.
///
/// A transaction `key=value` sets `key`; a transaction without `=` stores
/// itself under its own bytes. The app hash is a BLAKE3 digest of the height
/// and the sorted contents, so every committed block moves it.
#[derive(Debug, Clone, Default)]
pub struct KvStoreApp {
    store: BTreeMap<Vec<u8>, Vec<u8>>,
    height: u64,
    app_hash: Hash,
    validator_update: Option<ValidatorSet>,
}

impl KvStoreApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `validators` from `init_chain`.
    pub fn with_validator_update(mut self, validators: ValidatorSet) -> Self {
        self.validator_update = Some(validators);
        self
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.store.get(key).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn compute_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.height.to_le_bytes());
        for (k, v) in &self.store {
            hasher.update(&(k.len() as u32).to_le_bytes());
            hasher.update(k);
            hasher.update(&(v.len() as u32).to_le_bytes());
            hasher.update(v);
        }
        Hash(*hasher.finalize().as_bytes())
    }
}

impl Application for KvStoreApp {
    fn info(&self) -> AppResult<AppInfo> {
        Ok(AppInfo {
            last_block_height: self.height,
            last_block_app_hash: self.app_hash,
        })
    }

    fn init_chain(&mut self, _validators: &ValidatorSet) -> AppResult<Option<ValidatorSet>> {
        Ok(self.validator_update.clone())
    }

    fn deliver_tx(&mut self, tx: &[u8]) -> AppResult<TxResult> {
        if tx.is_empty() {
            return Ok(TxResult {
                code: 1,
                data: Vec::new(),
                log: "empty transaction".to_string(),
            });
        }
        let (key, value) = match tx.iter().position(|b| *b == b'=') {
            Some(i) => (&tx[..i], &tx[i + 1..]),
            None => (tx, tx),
        };
        self.store.insert(key.to_vec(), value.to_vec());
        Ok(TxResult {
            code: 0,
            data: key.to_vec(),
            log: String::new(),
        })
    }

    fn commit(&mut self) -> AppResult<Hash> {
        self.height += 1;
        self.app_hash = self.compute_hash();
        Ok(self.app_hash)
    }
}
