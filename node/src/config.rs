// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cairn_kernel::state::TimeoutParams;
use cairn_persistence::DEFAULT_MAX_RECORD_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wal_reader::SearchOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the WAL, block store and state snapshot.
    pub home: PathBuf,
    pub chain_id: String,
    pub wal: WalConfig,
    pub consensus: ConsensusConfig,
    /// Stop the consensus loop once this height is committed.
    pub target_height: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("./cairn-data"),
            chain_id: "cairn-devnet".to_string(),
            wal: WalConfig::default(),
            consensus: ConsensusConfig::default(),
            target_height: None,
        }
    }
}

impl NodeConfig {
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&raw)?)
    }

    pub fn wal_file(&self) -> PathBuf {
        match &self.wal.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.home.join(p),
            None => self.home.join("wal").join("consensus.wal"),
        }
    }

    pub fn blocks_file(&self) -> PathBuf {
        self.home.join("data").join("blocks.db")
    }

    pub fn state_file(&self) -> PathBuf {
        self.home.join("data").join("state.bin")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Relative paths resolve against `home`.
    pub path: Option<PathBuf>,
    pub queue_capacity: usize,
    pub flush_interval_ms: u64,
    pub max_record_size: u32,
    /// Skip damaged records during replay instead of refusing to start.
    pub ignore_data_corruption: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: None,
            queue_capacity: 1024,
            flush_interval_ms: 2000,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            ignore_data_corruption: false,
        }
    }
}

impl WalConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            ignore_data_corruption: self.ignore_data_corruption,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub timeout_propose_ms: u64,
    pub timeout_propose_delta_ms: u64,
    pub timeout_prevote_ms: u64,
    pub timeout_prevote_delta_ms: u64,
    pub timeout_precommit_ms: u64,
    pub timeout_precommit_delta_ms: u64,
    pub timeout_commit_ms: u64,
    pub max_block_txs: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let t = TimeoutParams::default();
        Self {
            timeout_propose_ms: t.propose_ms,
            timeout_propose_delta_ms: t.propose_delta_ms,
            timeout_prevote_ms: t.prevote_ms,
            timeout_prevote_delta_ms: t.prevote_delta_ms,
            timeout_precommit_ms: t.precommit_ms,
            timeout_precommit_delta_ms: t.precommit_delta_ms,
            timeout_commit_ms: t.commit_ms,
            max_block_txs: 256,
        }
    }
}

impl ConsensusConfig {
    pub fn timeouts(&self) -> TimeoutParams {
        TimeoutParams {
            propose_ms: self.timeout_propose_ms,
            propose_delta_ms: self.timeout_propose_delta_ms,
            prevote_ms: self.timeout_prevote_ms,
            prevote_delta_ms: self.timeout_prevote_delta_ms,
            precommit_ms: self.timeout_precommit_ms,
            precommit_delta_ms: self.timeout_precommit_delta_ms,
            commit_ms: self.timeout_commit_ms,
        }
    }
}
