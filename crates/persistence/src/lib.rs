//! On-disk record framing shared by the consensus WAL and the block store.
//!
//! ```text
//! [magic: 4][version: u32 LE]                     file header
//! [kind: u8][len: u32 LE][crc64: u64 LE][payload] record, repeated
//! ```
//!
//! Files are append-only and scanned front to back; there is no separate
//! index. A record cut short at the end of the file is a torn tail, the
//! expected shape of a crash mid-append. A checksum mismatch anywhere is
//! corruption.

pub mod error;
pub mod wal;
pub mod idx;

pub use error::{PersistenceError, Result};
pub use idx::{read_markers, MarkerEntry};
pub use wal::{
    encode_record, open_reader, repair_tail, scan_file, FileHeader, ReadOutcome, Record, RecordKind,
    RecordReader, ScanReport, sync_parent_dir, write_new_file, BLOCKS_MAGIC, DEFAULT_MAX_RECORD_SIZE, WAL_MAGIC,
};
