use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Invalid magic bytes in header: {found:?}")]
    InvalidMagic { found: [u8; 4] },
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("Checksum mismatch at offset {offset}: expected {expected:#018x}, found {found:#018x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u64,
        found: u64,
    },
    #[error("Invalid record kind {kind} at offset {offset}")]
    InvalidKind { offset: u64, kind: u8 },
    #[error("Record at offset {offset} declares {len} bytes, limit is {max}")]
    RecordTooLarge { offset: u64, len: u32, max: u32 },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

impl PersistenceError {
    /// True for errors that mean the bytes on disk are damaged, as opposed
    /// to the file being unreadable.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PersistenceError::ChecksumMismatch { .. }
                | PersistenceError::InvalidKind { .. }
                | PersistenceError::RecordTooLarge { .. }
                | PersistenceError::InvalidFormat(_)
        )
    }

    /// Offset of the damaged record, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            PersistenceError::ChecksumMismatch { offset, .. }
            | PersistenceError::InvalidKind { offset, .. }
            | PersistenceError::RecordTooLarge { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
