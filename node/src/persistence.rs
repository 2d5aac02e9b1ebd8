// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Block and chain-state storage.
//!
//! Both stores are shared handles (`&self` methods, internal locking) so the
//! handshaker, executor and engine can hold the same store.

use cairn_kernel::state::ChainState;
use cairn_kernel::types::{Block, Commit};
use cairn_persistence::wal::{open_reader, repair_tail, sync_parent_dir, write_new_file, FileHeader, BLOCKS_MAGIC};
use cairn_persistence::{encode_record, PersistenceError, RecordKind};
use crc32fast::Hasher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::app::AbciResponses;

const STATE_MAGIC: u32 = 0x4341_5354; // CAST
const SCHEMA_VERSION: u32 = 1;
pub const MAX_BLOCK_RECORD: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Serialization error: {0}")]
    Encoding(String),
    #[error("Store corrupted: {0}")]
    Corrupted(String),
    #[error("Block {got} does not follow stored height {height}")]
    NonContiguous { height: u64, got: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| StoreError::Encoding(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| StoreError::Corrupted(e.to_string()))
}

pub trait BlockStore: Send + Sync {
    /// Highest stored height, 0 when empty.
    fn height(&self) -> u64;
    fn load_block(&self, height: u64) -> StoreResult<Option<Block>>;
    /// The commit for `height` as included in block `height + 1`.
    fn load_block_commit(&self, height: u64) -> StoreResult<Option<Commit>>;
    /// The commit this node saw when it decided `height`.
    fn load_seen_commit(&self, height: u64) -> StoreResult<Option<Commit>>;
    fn save_block(&self, block: &Block, seen_commit: &Commit) -> StoreResult<()>;
}

pub trait StateStore: Send + Sync {
    fn load_state(&self) -> StoreResult<Option<ChainState>>;
    fn save_state(&self, state: &ChainState) -> StoreResult<()>;
    fn save_abci_responses(&self, height: u64, responses: &AbciResponses) -> StoreResult<()>;
    fn load_abci_responses(&self, height: u64) -> StoreResult<Option<AbciResponses>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredBlock {
    block: Block,
    seen_commit: Commit,
}

#[derive(Debug, Default)]
struct BlockIndex {
    blocks: Vec<StoredBlock>,
}

impl BlockIndex {
    fn height(&self) -> u64 {
        self.blocks.last().map_or(0, |b| b.block.height())
    }

    fn get(&self, height: u64) -> Option<&StoredBlock> {
        let first = self.blocks.first()?.block.height();
        let idx = height.checked_sub(first)? as usize;
        self.blocks.get(idx)
    }

    fn check_next(&self, block: &Block) -> StoreResult<()> {
        let height = self.height();
        if !self.blocks.is_empty() && block.height() != height + 1 {
            return Err(StoreError::NonContiguous {
                height,
                got: block.height(),
            });
        }
        Ok(())
    }
}

/// In-memory block store; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemBlockStore {
    inner: Arc<Mutex<BlockIndex>>,
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemBlockStore {
    fn height(&self) -> u64 {
        self.inner.lock().height()
    }

    fn load_block(&self, height: u64) -> StoreResult<Option<Block>> {
        Ok(self.inner.lock().get(height).map(|b| b.block.clone()))
    }

    fn load_block_commit(&self, height: u64) -> StoreResult<Option<Commit>> {
        Ok(self
            .inner
            .lock()
            .get(height + 1)
            .and_then(|b| b.block.last_commit.clone()))
    }

    fn load_seen_commit(&self, height: u64) -> StoreResult<Option<Commit>> {
        Ok(self.inner.lock().get(height).map(|b| b.seen_commit.clone()))
    }

    fn save_block(&self, block: &Block, seen_commit: &Commit) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.check_next(block)?;
        inner.blocks.push(StoredBlock {
            block: block.clone(),
            seen_commit: seen_commit.clone(),
        });
        Ok(())
    }
}

struct FileBlocks {
    index: BlockIndex,
    file: File,
}

/// Append-only block file in the shared record format, held in memory once
/// opened. Each save is fsynced before it returns.
pub struct FileBlockStore {
    path: PathBuf,
    inner: Mutex<FileBlocks>,
}

impl FileBlockStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut index = BlockIndex::default();
        let fresh = std::fs::metadata(&path)
            .map(|m| m.len() < FileHeader::SIZE as u64)
            .unwrap_or(true);
        if fresh {
            write_new_file(&path, &FileHeader::new(BLOCKS_MAGIC).to_bytes())?;
        } else {
            let removed = repair_tail(&path, BLOCKS_MAGIC, MAX_BLOCK_RECORD)?;
            if removed > 0 {
                tracing::warn!("Dropped {} bytes of partial block from {:?}", removed, path);
            }
            for record in open_reader(&path, BLOCKS_MAGIC, MAX_BLOCK_RECORD)? {
                let record = record?;
                if record.kind != RecordKind::Block {
                    return Err(StoreError::Corrupted(format!(
                        "unexpected {:?} record at offset {}",
                        record.kind, record.offset
                    )));
                }
                let stored: StoredBlock = decode(&record.payload)?;
                index.check_next(&stored.block)?;
                index.blocks.push(stored);
            }
            tracing::info!("Loaded {} blocks from {:?}", index.blocks.len(), path);
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(FileBlocks { index, file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockStore for FileBlockStore {
    fn height(&self) -> u64 {
        self.inner.lock().index.height()
    }

    fn load_block(&self, height: u64) -> StoreResult<Option<Block>> {
        Ok(self.inner.lock().index.get(height).map(|b| b.block.clone()))
    }

    fn load_block_commit(&self, height: u64) -> StoreResult<Option<Commit>> {
        Ok(self
            .inner
            .lock()
            .index
            .get(height + 1)
            .and_then(|b| b.block.last_commit.clone()))
    }

    fn load_seen_commit(&self, height: u64) -> StoreResult<Option<Commit>> {
        Ok(self.inner.lock().index.get(height).map(|b| b.seen_commit.clone()))
    }

    fn save_block(&self, block: &Block, seen_commit: &Commit) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.index.check_next(block)?;
        let stored = StoredBlock {
            block: block.clone(),
            seen_commit: seen_commit.clone(),
        };
        let payload = encode(&stored)?;
        inner.file.write_all(&encode_record(RecordKind::Block, &payload))?;
        inner.file.sync_data()?;
        inner.index.blocks.push(stored);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StateSnapshot {
    state: Option<ChainState>,
    responses: BTreeMap<u64, AbciResponses>,
}

impl StateSnapshot {
    /// Responses are only read back for the block the saved state has not
    /// caught up with, so anything below the new height is dropped.
    fn set_state(&mut self, state: &ChainState) {
        self.responses = self.responses.split_off(&state.last_block_height);
        self.state = Some(state.clone());
    }
}

/// In-memory state store; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemStateStore {
    inner: Arc<Mutex<StateSnapshot>>,
}

impl MemStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemStateStore {
    fn load_state(&self) -> StoreResult<Option<ChainState>> {
        Ok(self.inner.lock().state.clone())
    }

    fn save_state(&self, state: &ChainState) -> StoreResult<()> {
        self.inner.lock().set_state(state);
        Ok(())
    }

    fn save_abci_responses(&self, height: u64, responses: &AbciResponses) -> StoreResult<()> {
        self.inner.lock().responses.insert(height, responses.clone());
        Ok(())
    }

    fn load_abci_responses(&self, height: u64) -> StoreResult<Option<AbciResponses>> {
        Ok(self.inner.lock().responses.get(&height).cloned())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct SnapshotMeta {
    version: u32,
    last_block_height: u64,
    body_len: u64,
}

/// Chain state and ABCI responses in one snapshot file, rewritten through a
/// temp file and rename on every save.
///
/// Layout: `[MAGIC][VER][META_LEN][META_JSON][BODY][CRC32]`.
pub struct FileStateStore {
    path: PathBuf,
    inner: Mutex<StateSnapshot>,
}

impl FileStateStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let snapshot = if path.exists() {
            let buffer = std::fs::read(&path)?;
            let snapshot = Self::parse(&buffer)?;
            tracing::info!(
                "Loaded state snapshot {:?} at height {}",
                path,
                snapshot.state.as_ref().map_or(0, |s| s.last_block_height)
            );
            snapshot
        } else {
            StateSnapshot::default()
        };
        Ok(Self {
            path,
            inner: Mutex::new(snapshot),
        })
    }

    fn persist(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let body = encode(snapshot)?;
        let meta = SnapshotMeta {
            version: SCHEMA_VERSION,
            last_block_height: snapshot.state.as_ref().map_or(0, |s| s.last_block_height),
            body_len: body.len() as u64,
        };
        let meta_json = serde_json::to_vec(&meta).map_err(|e| StoreError::Encoding(e.to_string()))?;

        {
            let mut file = File::create(&tmp_path)?;
            let mut hasher = Hasher::new();
            let mut write_chunk = |data: &[u8]| -> std::io::Result<()> {
                file.write_all(data)?;
                hasher.update(data);
                Ok(())
            };

            write_chunk(&STATE_MAGIC.to_le_bytes())?;
            write_chunk(&SCHEMA_VERSION.to_le_bytes())?;
            write_chunk(&(meta_json.len() as u32).to_le_bytes())?;
            write_chunk(&meta_json)?;
            write_chunk(&body)?;

            let checksum = hasher.finalize();
            file.write_all(&checksum.to_le_bytes())?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;
        Ok(())
    }

    fn parse(buffer: &[u8]) -> StoreResult<StateSnapshot> {
        if buffer.len() < 16 {
            return Err(StoreError::Corrupted("snapshot too short".into()));
        }
        let (content, trailer) = buffer.split_at(buffer.len() - 4);
        let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let mut hasher = Hasher::new();
        hasher.update(content);
        if hasher.finalize() != stored_crc {
            return Err(StoreError::Corrupted("checksum mismatch".into()));
        }

        let word = |at: usize| u32::from_le_bytes([content[at], content[at + 1], content[at + 2], content[at + 3]]);
        if word(0) != STATE_MAGIC {
            return Err(StoreError::Corrupted("invalid magic".into()));
        }
        if word(4) != SCHEMA_VERSION {
            return Err(StoreError::Corrupted(format!("unsupported version {}", word(4))));
        }
        let meta_end = 12 + word(8) as usize;
        if content.len() < meta_end {
            return Err(StoreError::Corrupted("truncated metadata".into()));
        }
        let meta: SnapshotMeta =
            serde_json::from_slice(&content[12..meta_end]).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        let body = &content[meta_end..];
        if body.len() as u64 != meta.body_len {
            return Err(StoreError::Corrupted(format!(
                "meta claims {} body bytes, found {}",
                meta.body_len,
                body.len()
            )));
        }
        decode(body)
    }
}

impl StateStore for FileStateStore {
    fn load_state(&self) -> StoreResult<Option<ChainState>> {
        Ok(self.inner.lock().state.clone())
    }

    fn save_state(&self, state: &ChainState) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let mut next = inner.clone();
        next.set_state(state);
        self.persist(&next)?;
        *inner = next;
        Ok(())
    }

    fn save_abci_responses(&self, height: u64, responses: &AbciResponses) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let mut next = inner.clone();
        next.responses.insert(height, responses.clone());
        self.persist(&next)?;
        *inner = next;
        Ok(())
    }

    fn load_abci_responses(&self, height: u64) -> StoreResult<Option<AbciResponses>> {
        Ok(self.inner.lock().responses.get(&height).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TxResult;
    use cairn_kernel::state::Genesis;
    use cairn_kernel::types::{BlockId, Validator, ValidatorId, ValidatorSet};
    use tempfile::tempdir;

    fn chain() -> ChainState {
        Genesis::new(
            "store-test",
            ValidatorSet::new(vec![Validator {
                id: ValidatorId(0),
                voting_power: 10,
            }]),
        )
        .to_state()
    }

    fn block_at(height: u64) -> (Block, Commit) {
        let state = chain();
        let last_commit = (height > 1).then(|| Commit {
            height: height - 1,
            round: 0,
            block_id: BlockId::default(),
            signatures: vec![],
        });
        let block = state
            .make_block(height, vec![format!("k{}=v", height).into_bytes()], last_commit, ValidatorId(0))
            .unwrap();
        let commit = Commit {
            height,
            round: 0,
            block_id: BlockId::default(),
            signatures: vec![],
        };
        (block, commit)
    }

    fn fill(store: &dyn BlockStore, n: u64) {
        for h in 1..=n {
            let (block, commit) = block_at(h);
            store.save_block(&block, &commit).unwrap();
        }
    }

    #[test]
    fn test_mem_block_store_commits() {
        let store = MemBlockStore::new();
        fill(&store, 3);
        assert_eq!(store.height(), 3);
        assert_eq!(store.load_block(2).unwrap().unwrap().height(), 2);
        assert_eq!(store.load_block_commit(1).unwrap().unwrap().height, 1);
        assert!(store.load_block_commit(3).unwrap().is_none());
        assert_eq!(store.load_seen_commit(3).unwrap().unwrap().height, 3);
        assert!(store.load_block(4).unwrap().is_none());

        let (gap, commit) = block_at(5);
        assert!(matches!(
            store.save_block(&gap, &commit),
            Err(StoreError::NonContiguous { height: 3, got: 5 })
        ));
    }

    #[test]
    fn test_file_block_store_reopen_and_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.db");
        {
            let store = FileBlockStore::open(&path).unwrap();
            fill(&store, 3);
        }
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 5).unwrap();

        let store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.height(), 2);
        let (block, commit) = block_at(3);
        store.save_block(&block, &commit).unwrap();
        drop(store);

        let store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.height(), 3);
        assert_eq!(store.load_block(3).unwrap().unwrap(), block);
    }

    #[test]
    fn test_file_state_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let mut state = chain();
        state.last_block_height = 4;
        let responses = AbciResponses {
            deliver_txs: vec![TxResult::default()],
        };
        {
            let store = FileStateStore::open(&path).unwrap();
            assert!(store.load_state().unwrap().is_none());
            store.save_abci_responses(4, &responses).unwrap();
            store.save_state(&state).unwrap();
        }

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.load_state().unwrap(), Some(state));
        assert_eq!(store.load_abci_responses(4).unwrap(), Some(responses));
        assert!(store.load_abci_responses(5).unwrap().is_none());
    }

    #[test]
    fn test_state_snapshot_stays_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let store = FileStateStore::open(&path).unwrap();
        let mut state = chain();
        let responses = AbciResponses {
            deliver_txs: vec![TxResult {
                code: 0,
                data: vec![7; 200],
                log: String::new(),
            }],
        };

        let mut sizes = Vec::new();
        for height in 1..=200u64 {
            store.save_abci_responses(height, &responses).unwrap();
            state.last_block_height = height;
            store.save_state(&state).unwrap();
            if height % 50 == 0 {
                sizes.push(std::fs::metadata(&path).unwrap().len());
            }
        }
        let spread = sizes.iter().max().unwrap() - sizes.iter().min().unwrap();
        assert!(spread < 16, "snapshot grew: {:?}", sizes);
        drop(store);

        let store = FileStateStore::open(&path).unwrap();
        assert!(store.load_abci_responses(1).unwrap().is_none());
        assert!(store.load_abci_responses(199).unwrap().is_none());
        assert_eq!(store.load_abci_responses(200).unwrap(), Some(responses));
    }

    #[test]
    fn test_block_store_recreates_stub_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.db");
        std::fs::write(&path, b"CB").unwrap();

        let store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.height(), 0);
        fill(&store, 2);
        drop(store);
        assert_eq!(FileBlockStore::open(&path).unwrap().height(), 2);
    }

    #[test]
    fn test_file_state_store_detects_bit_rot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        FileStateStore::open(&path).unwrap().save_state(&chain()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(FileStateStore::open(&path), Err(StoreError::Corrupted(_))));
    }
}
