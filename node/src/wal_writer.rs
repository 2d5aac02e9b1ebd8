// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consensus write-ahead log.
//!
//! Every input the consensus loop acts on is appended here before it is
//! applied. Appends go through a bounded queue to a dedicated writer thread
//! that owns the file; `write` returns once the record is queued, the `*_sync`
//! variants once it is on stable storage.
//!
//! # Guarantees
//! - Records land in the order they were submitted.
//! - A failed append, flush or fsync halts the log for good. Every later call
//!   reports [`WalError::Halted`].
//! - A new file starts with a synced marker for height 0.

use cairn_kernel::wal::{HeightMarker, TimedWalMessage, WalMessage};
use cairn_persistence::wal::{repair_tail, write_new_file, FileHeader, WAL_MAGIC};
use cairn_persistence::{encode_record, MarkerEntry, PersistenceError, RecordKind};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::WalConfig;
use crate::wal_reader::{encode_message, search_for_height, SearchOptions, WalDecoder};

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Serialization error: {0}")]
    Encoding(String),

    #[error("Record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge { len: usize, max: u32 },

    #[error("WAL corrupted at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },

    #[error("WAL is not running")]
    NotRunning,

    #[error("WAL is already running")]
    AlreadyRunning,

    #[error("WAL halted: {0}")]
    Halted(String),

    #[error("Injected fault at write #{write}")]
    InjectedFault { write: u64 },

    #[error("Reached stop height {0}")]
    ReachedHeight(u64),
}

pub type WalResult<T> = Result<T, WalError>;

/// Durable, ordered log of consensus inputs.
pub trait Wal: Send {
    /// Queues `msg`. It may be lost if the process dies before the next sync.
    fn write(&mut self, msg: &WalMessage) -> WalResult<()>;

    /// Appends `msg` and returns once it is on stable storage.
    fn write_sync(&mut self, msg: &WalMessage) -> WalResult<()>;

    /// Appends the marker for a new height and syncs it.
    fn write_meta_sync(&mut self, marker: HeightMarker) -> WalResult<()>;

    fn flush_and_sync(&mut self) -> WalResult<()>;

    /// Decoder positioned just after the marker for `height`, if the log has one.
    fn search_for_height(&self, height: u64, options: SearchOptions) -> WalResult<Option<WalDecoder>>;

    fn start(&mut self) -> WalResult<()>;

    /// Asks the writer to drain and exit. Does not block.
    fn stop(&mut self) -> WalResult<()>;

    /// Blocks until the writer has exited.
    fn wait(&mut self);
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

enum WriterCommand {
    Record { kind: RecordKind, payload: Vec<u8> },
    /// Framed by the writer, which knows the offset it lands at.
    Marker { height: u64 },
    Sync { ack: Sender<WalResult<()>> },
    Shutdown,
}

type HaltLatch = Arc<Mutex<Option<String>>>;

pub struct FileWal {
    path: PathBuf,
    config: WalConfig,
    tx: Option<Sender<WriterCommand>>,
    worker: Option<JoinHandle<()>>,
    halted: HaltLatch,
}

impl FileWal {
    /// Opens or creates the log at `path`. A torn final record left by a crash
    /// is cut off so that new appends follow the last complete record.
    pub fn open(path: impl AsRef<Path>, config: WalConfig) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        // Shorter than a header means creation never completed.
        let fresh = std::fs::metadata(&path)
            .map(|m| m.len() < FileHeader::SIZE as u64)
            .unwrap_or(true);
        if fresh {
            Self::initialize(&path)?;
            tracing::info!("Created WAL at {:?}", path);
        } else {
            match repair_tail(&path, WAL_MAGIC, config.max_record_size) {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::warn!("Truncated {} bytes of torn record from WAL tail {:?}", removed, path)
                }
                // Damage in the body is left for the decoder to report.
                Err(e) if e.is_corruption() => {
                    tracing::warn!(error = %e, "WAL {:?} is corrupted; not repairing", path)
                }
                Err(e) => return Err(e.into()),
            }
            tracing::info!("Opened WAL at {:?}", path);
        }

        Ok(Self {
            path,
            config,
            tx: None,
            worker: None,
            halted: Arc::new(Mutex::new(None)),
        })
    }

    fn initialize(path: &Path) -> WalResult<()> {
        let genesis = MarkerEntry {
            height: 0,
            offset: FileHeader::SIZE as u64,
        };
        let mut bytes = FileHeader::new(WAL_MAGIC).to_bytes().to_vec();
        bytes.extend_from_slice(&encode_record(RecordKind::Marker, &genesis.to_bytes()));
        write_new_file(path, &bytes)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    fn sender(&self) -> WalResult<&Sender<WriterCommand>> {
        if let Some(reason) = self.halted.lock().as_ref() {
            return Err(WalError::Halted(reason.clone()));
        }
        self.tx.as_ref().ok_or(WalError::NotRunning)
    }

    fn send(&self, cmd: WriterCommand) -> WalResult<()> {
        self.sender()?.send(cmd).map_err(|_| self.writer_gone())
    }

    fn writer_gone(&self) -> WalError {
        let reason = self
            .halted
            .lock()
            .clone()
            .unwrap_or_else(|| "writer thread exited".to_string());
        WalError::Halted(reason)
    }

    fn sync(&self) -> WalResult<()> {
        let (ack, done) = bounded(1);
        self.send(WriterCommand::Sync { ack })?;
        done.recv().map_err(|_| self.writer_gone())?
    }

    fn spawn_writer<F: LogFile>(&mut self, file: F, offset: u64) -> WalResult<()> {
        let (tx, rx) = bounded(self.config.queue_capacity.max(1));
        let worker = Writer {
            out: BufWriter::new(file),
            offset,
            dirty: false,
            halted: self.halted.clone(),
        };
        let flush_interval = self.config.flush_interval();
        let handle = std::thread::Builder::new()
            .name("cairn-wal-writer".to_string())
            .spawn(move || worker.run(rx, flush_interval))?;

        self.tx = Some(tx);
        self.worker = Some(handle);
        tracing::info!("WAL writer started at offset {}", offset);
        Ok(())
    }
}

impl Wal for FileWal {
    fn write(&mut self, msg: &WalMessage) -> WalResult<()> {
        let timed = TimedWalMessage {
            time_ms: now_ms(),
            msg: msg.clone(),
        };
        let payload = encode_message(&timed)?;
        if payload.len() > self.config.max_record_size as usize {
            return Err(WalError::RecordTooLarge {
                len: payload.len(),
                max: self.config.max_record_size,
            });
        }
        self.send(WriterCommand::Record {
            kind: RecordKind::Message,
            payload,
        })
    }

    fn write_sync(&mut self, msg: &WalMessage) -> WalResult<()> {
        self.write(msg)?;
        self.sync()
    }

    fn write_meta_sync(&mut self, marker: HeightMarker) -> WalResult<()> {
        self.send(WriterCommand::Marker { height: marker.height })?;
        self.sync()
    }

    fn flush_and_sync(&mut self) -> WalResult<()> {
        self.sync()
    }

    fn search_for_height(&self, height: u64, options: SearchOptions) -> WalResult<Option<WalDecoder>> {
        if self.is_running() {
            self.sync()?;
        }
        search_for_height(&self.path, height, self.config.max_record_size, options)
    }

    fn start(&mut self) -> WalResult<()> {
        if self.tx.is_some() {
            return Err(WalError::AlreadyRunning);
        }
        if let Some(reason) = self.halted.lock().as_ref() {
            return Err(WalError::Halted(reason.clone()));
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let offset = file.metadata()?.len();
        self.spawn_writer(file, offset)
    }

    fn stop(&mut self) -> WalResult<()> {
        match self.tx.take() {
            Some(tx) => {
                // A halted writer has already exited; nothing to tell it.
                let _ = tx.send(WriterCommand::Shutdown);
                Ok(())
            }
            None => Err(WalError::NotRunning),
        }
    }

    fn wait(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("WAL writer thread panicked");
            }
        }
    }
}

impl Drop for FileWal {
    fn drop(&mut self) {
        let _ = self.stop();
        self.wait();
    }
}

/// Append handle owned by the writer thread.
trait LogFile: Write + Send + 'static {
    fn sync_data(&self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn sync_data(&self) -> std::io::Result<()> {
        File::sync_data(self)
    }
}

struct Writer<F: LogFile> {
    out: BufWriter<F>,
    offset: u64,
    dirty: bool,
    halted: HaltLatch,
}

impl<F: LogFile> Writer<F> {
    fn run(mut self, rx: Receiver<WriterCommand>, flush_interval: Duration) {
        loop {
            let cmd = match rx.recv_timeout(flush_interval) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => {
                    if self.dirty && !self.is_halted() {
                        let res = self.out.flush();
                        self.dirty = false;
                        self.check(res.map_err(WalError::from));
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match cmd {
                WriterCommand::Record { kind, payload } => {
                    if !self.is_halted() {
                        let res = self.append(kind, &payload);
                        self.check(res);
                    }
                }
                WriterCommand::Marker { height } => {
                    if !self.is_halted() {
                        let entry = MarkerEntry {
                            height,
                            offset: self.offset,
                        };
                        let res = self.append(RecordKind::Marker, &entry.to_bytes());
                        self.check(res);
                    }
                }
                WriterCommand::Sync { ack } => {
                    if !self.is_halted() {
                        let res = self.sync_data();
                        self.check(res);
                    }
                    let res = match self.halted.lock().clone() {
                        Some(reason) => Err(WalError::Halted(reason)),
                        None => Ok(()),
                    };
                    let _ = ack.send(res);
                }
                WriterCommand::Shutdown => break,
            }
        }

        if !self.is_halted() {
            if let Err(e) = self.sync_data() {
                tracing::error!("Final WAL sync failed: {}", e);
            }
        }
        tracing::info!("WAL writer stopped at offset {}", self.offset);
    }

    fn append(&mut self, kind: RecordKind, payload: &[u8]) -> WalResult<()> {
        let bytes = encode_record(kind, payload);
        self.out.write_all(&bytes)?;
        self.offset += bytes.len() as u64;
        self.dirty = true;
        metrics::counter!("cairn_wal_records_written_total", 1);
        metrics::counter!("cairn_wal_bytes_written_total", bytes.len() as u64);
        Ok(())
    }

    fn sync_data(&mut self) -> WalResult<()> {
        let start = Instant::now();
        self.out.flush()?;
        LogFile::sync_data(self.out.get_ref())?;
        self.dirty = false;
        metrics::histogram!("cairn_wal_fsync_duration_seconds", start.elapsed().as_secs_f64());
        Ok(())
    }

    fn is_halted(&self) -> bool {
        self.halted.lock().is_some()
    }

    fn check(&self, res: WalResult<()>) {
        if let Err(e) = res {
            let mut latch = self.halted.lock();
            if latch.is_none() {
                tracing::error!("WAL write failed, halting: {}", e);
                *latch = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal_reader::WalRecord;
    use cairn_kernel::wal::WalMessage;
    use tempfile::tempdir;

    fn end(height: u64) -> WalMessage {
        WalMessage::EndHeight { height }
    }

    /// Handle that accepts bytes until told to fail, like a disk filling up.
    struct FailingFile {
        fail_writes: bool,
        fail_sync: bool,
    }

    impl Write for FailingFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail_writes {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for FailingFile {
        fn sync_data(&self) -> std::io::Result<()> {
            if self.fail_sync {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "fsync failed"));
            }
            Ok(())
        }
    }

    fn assert_halted_for_good(wal: &mut FileWal) {
        assert!(matches!(wal.write(&end(3)), Err(WalError::Halted(_))));
        assert!(matches!(wal.write_sync(&end(3)), Err(WalError::Halted(_))));
        assert!(matches!(
            wal.write_meta_sync(HeightMarker { height: 3 }),
            Err(WalError::Halted(_))
        ));
        assert!(matches!(wal.flush_and_sync(), Err(WalError::Halted(_))));

        wal.stop().unwrap();
        wal.wait();
        assert!(matches!(wal.start(), Err(WalError::Halted(_))));
    }

    #[test]
    fn test_failed_fsync_halts_log() {
        let dir = tempdir().unwrap();
        let mut wal = FileWal::open(dir.path().join("c.wal"), WalConfig::default()).unwrap();
        wal.spawn_writer(
            FailingFile {
                fail_writes: false,
                fail_sync: true,
            },
            0,
        )
        .unwrap();

        wal.write(&end(1)).unwrap();
        match wal.write_sync(&end(2)) {
            Err(WalError::Halted(reason)) => assert!(reason.contains("fsync failed")),
            other => panic!("expected Halted, got {:?}", other),
        }
        assert_halted_for_good(&mut wal);
    }

    #[test]
    fn test_failed_append_halts_log() {
        let dir = tempdir().unwrap();
        let mut wal = FileWal::open(dir.path().join("c.wal"), WalConfig::default()).unwrap();
        wal.spawn_writer(
            FailingFile {
                fail_writes: true,
                fail_sync: false,
            },
            0,
        )
        .unwrap();

        // Queued before the failure surfaces; the sync reports it.
        wal.write(&end(1)).unwrap();
        match wal.flush_and_sync() {
            Err(WalError::Halted(reason)) => assert!(reason.contains("no space")),
            other => panic!("expected Halted, got {:?}", other),
        }
        assert_halted_for_good(&mut wal);
    }

    #[test]
    fn test_new_file_has_genesis_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal").join("consensus.wal");
        let wal = FileWal::open(&path, WalConfig::default()).unwrap();

        let mut dec = wal
            .search_for_height(0, SearchOptions::default())
            .unwrap()
            .expect("genesis marker");
        assert_eq!(dec.decode().unwrap(), None);
    }

    #[test]
    fn test_header_stub_is_recreated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        std::fs::write(&path, b"CWA").unwrap();

        let wal = FileWal::open(&path, WalConfig::default()).unwrap();
        assert!(wal.search_for_height(0, SearchOptions::default()).unwrap().is_some());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_write_requires_running_writer() {
        let dir = tempdir().unwrap();
        let mut wal = FileWal::open(dir.path().join("c.wal"), WalConfig::default()).unwrap();
        assert!(matches!(wal.write(&end(1)), Err(WalError::NotRunning)));

        wal.start().unwrap();
        assert!(matches!(wal.start(), Err(WalError::AlreadyRunning)));
        wal.write(&end(1)).unwrap();
        wal.stop().unwrap();
        wal.wait();
        assert!(matches!(wal.write_sync(&end(2)), Err(WalError::NotRunning)));
    }

    #[test]
    fn test_records_survive_restart_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        {
            let mut wal = FileWal::open(&path, WalConfig::default()).unwrap();
            wal.start().unwrap();
            wal.write(&end(0)).unwrap();
            wal.write_meta_sync(HeightMarker { height: 1 }).unwrap();
            wal.write(&end(1)).unwrap();
            wal.write_sync(&end(2)).unwrap();
        }

        let wal = FileWal::open(&path, WalConfig::default()).unwrap();
        let dec = wal.search_for_height(1, SearchOptions::default()).unwrap().unwrap();
        let msgs: Vec<_> = dec
            .map(|r| match r.unwrap() {
                WalRecord::Message(m) => m.msg,
                WalRecord::Marker(m) => panic!("unexpected marker {:?}", m),
            })
            .collect();
        assert_eq!(msgs, vec![end(1), end(2)]);
    }

    #[test]
    fn test_marker_records_own_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        let mut wal = FileWal::open(&path, WalConfig::default()).unwrap();
        wal.start().unwrap();
        wal.write(&end(0)).unwrap();
        wal.write_meta_sync(HeightMarker { height: 1 }).unwrap();

        let markers = cairn_persistence::read_markers(&path, 1024).unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].offset, FileHeader::SIZE as u64);
        let scan = cairn_persistence::scan_file(&path, WAL_MAGIC, 1024).unwrap();
        assert_eq!(scan.records, 3);
        assert!(markers[1].offset > markers[0].offset);
    }

    #[test]
    fn test_open_repairs_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        {
            let mut wal = FileWal::open(&path, WalConfig::default()).unwrap();
            wal.start().unwrap();
            wal.write_sync(&end(5)).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(len - 3).unwrap();
        }

        let mut wal = FileWal::open(&path, WalConfig::default()).unwrap();
        wal.start().unwrap();
        wal.write_sync(&end(6)).unwrap();

        let dec = wal.search_for_height(0, SearchOptions::default()).unwrap().unwrap();
        let heights: Vec<u64> = dec
            .filter_map(|r| match r.unwrap() {
                WalRecord::Message(m) => Some(m.msg.height()),
                WalRecord::Marker(_) => None,
            })
            .collect();
        assert_eq!(heights, vec![6]);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let dir = tempdir().unwrap();
        let config = WalConfig {
            max_record_size: 4,
            ..WalConfig::default()
        };
        let mut wal = FileWal::open(dir.path().join("c.wal"), config).unwrap();
        wal.start().unwrap();
        assert!(matches!(
            wal.write(&end(u64::MAX)),
            Err(WalError::RecordTooLarge { max: 4, .. })
        ));
    }
}
