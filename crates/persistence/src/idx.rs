use crate::error::{PersistenceError, Result};
use crate::wal::{open_reader, RecordKind};
use std::path::Path;

/// Payload of a marker record: the height the log reaches next and the
/// byte offset of the marker record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarkerEntry {
    pub height: u64,
    pub offset: u64,
}

impl MarkerEntry {
    pub const SIZE: usize = 8 + 8;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(PersistenceError::InvalidFormat(format!(
                "marker payload is {} bytes, expected {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        let mut height = [0u8; 8];
        let mut offset = [0u8; 8];
        height.copy_from_slice(&bytes[0..8]);
        offset.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            height: u64::from_le_bytes(height),
            offset: u64::from_le_bytes(offset),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }
}

/// Collects every marker in a WAL file, in file order. Stops quietly at a
/// torn tail.
pub fn read_markers(path: impl AsRef<Path>, max_record_size: u32) -> Result<Vec<MarkerEntry>> {
    let reader = open_reader(path, crate::wal::WAL_MAGIC, max_record_size)?;
    let mut markers = Vec::new();
    for record in reader {
        let record = record?;
        if record.kind == RecordKind::Marker {
            markers.push(MarkerEntry::from_bytes(&record.payload)?);
        }
    }
    Ok(markers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{encode_record, FileHeader, WAL_MAGIC};
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_marker_layout() {
        let entry = MarkerEntry { height: 7, offset: 0x0102 };
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[0..8], &7u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x0102u64.to_le_bytes());
        assert_eq!(MarkerEntry::from_bytes(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_short_payload_rejected() {
        let err = MarkerEntry::from_bytes(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidFormat(_)));
    }

    #[test]
    fn test_read_markers_in_file_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        let mut file = File::create(&path).unwrap();
        file.write_all(&FileHeader::new(WAL_MAGIC).to_bytes()).unwrap();

        let mut offset = FileHeader::SIZE as u64;
        for height in 0..3u64 {
            let marker = MarkerEntry { height, offset }.to_bytes();
            let bytes = encode_record(RecordKind::Marker, &marker);
            file.write_all(&bytes).unwrap();
            offset += bytes.len() as u64;
            let msg = encode_record(RecordKind::Message, b"vote");
            file.write_all(&msg).unwrap();
            offset += msg.len() as u64;
        }
        // half a marker at the end
        let torn = encode_record(RecordKind::Marker, &MarkerEntry { height: 3, offset }.to_bytes());
        file.write_all(&torn[..10]).unwrap();
        drop(file);

        let markers = read_markers(&path, 1024).unwrap();
        assert_eq!(markers.iter().map(|m| m.height).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(markers[0].offset, FileHeader::SIZE as u64);
    }
}
