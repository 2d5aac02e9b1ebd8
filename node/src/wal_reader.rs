// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! WAL decoder used by replay, search and offline tooling.
//!
//! A record cut short at the end of the file ends the stream like EOF. Any
//! other damage is reported as [`WalError::Corrupted`], or skipped with a
//! warning when the decoder was opened with `ignore_data_corruption`.

use cairn_kernel::wal::TimedWalMessage;
use cairn_persistence::wal::{open_reader, WAL_MAGIC};
use cairn_persistence::{MarkerEntry, PersistenceError, ReadOutcome, Record, RecordKind, RecordReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::wal_writer::{WalError, WalResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Message(TimedWalMessage),
    Marker(MarkerEntry),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Skip damaged records instead of failing.
    pub ignore_data_corruption: bool,
}

pub fn decode_message(payload: &[u8]) -> Result<TimedWalMessage, String> {
    bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map(|(msg, _)| msg)
        .map_err(|e| e.to_string())
}

pub fn encode_message(msg: &TimedWalMessage) -> WalResult<Vec<u8>> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| WalError::Encoding(e.to_string()))
}

pub struct WalDecoder {
    records: RecordReader<BufReader<File>>,
    options: SearchOptions,
    skipped: u64,
}

impl WalDecoder {
    /// Opens `path` positioned at its first record.
    pub fn open(path: impl AsRef<Path>, max_record_size: u32, options: SearchOptions) -> WalResult<Self> {
        let records = open_reader(path, WAL_MAGIC, max_record_size)?;
        Ok(Self {
            records,
            options,
            skipped: 0,
        })
    }

    /// File offset of the next record.
    pub fn offset(&self) -> u64 {
        self.records.offset()
    }

    /// Damaged records passed over so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next record, or `None` at the end of the valid log.
    pub fn decode(&mut self) -> WalResult<Option<WalRecord>> {
        loop {
            let outcome = match self.records.next_record() {
                Ok(outcome) => outcome,
                // A bad length or kind leaves the reader mid-record; nothing
                // after it can be framed, so only checksum damage is skippable.
                Err(e @ PersistenceError::ChecksumMismatch { .. }) if self.options.ignore_data_corruption => {
                    self.skip(&e);
                    continue;
                }
                Err(e) if e.is_corruption() => {
                    return Err(WalError::Corrupted {
                        offset: e.offset().unwrap_or(self.records.offset()),
                        reason: e.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            };

            let record = match outcome {
                ReadOutcome::Record(record) => record,
                ReadOutcome::End => return Ok(None),
                ReadOutcome::TornTail { offset } => {
                    tracing::debug!("WAL ends in a torn record at offset {}", offset);
                    return Ok(None);
                }
            };

            match Self::parse(&record) {
                Ok(parsed) => return Ok(Some(parsed)),
                Err(reason) if self.options.ignore_data_corruption => {
                    self.skipped += 1;
                    tracing::warn!(offset = record.offset, %reason, "Skipping undecodable WAL record");
                }
                Err(reason) => {
                    return Err(WalError::Corrupted {
                        offset: record.offset,
                        reason,
                    })
                }
            }
        }
    }

    fn skip(&mut self, err: &PersistenceError) {
        self.skipped += 1;
        tracing::warn!(error = %err, "Skipping corrupted WAL record");
    }

    fn parse(record: &Record) -> Result<WalRecord, String> {
        match record.kind {
            RecordKind::Message => decode_message(&record.payload).map(WalRecord::Message),
            RecordKind::Marker => MarkerEntry::from_bytes(&record.payload)
                .map(WalRecord::Marker)
                .map_err(|e| e.to_string()),
            RecordKind::Block => Err("block record in a WAL file".to_string()),
        }
    }
}

impl Iterator for WalDecoder {
    type Item = WalResult<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode().transpose()
    }
}

/// Scans forward for the marker of `height`. The returned decoder yields the
/// records that follow it.
pub fn search_for_height(
    path: impl AsRef<Path>,
    height: u64,
    max_record_size: u32,
    options: SearchOptions,
) -> WalResult<Option<WalDecoder>> {
    let mut decoder = WalDecoder::open(path, max_record_size, options)?;
    while let Some(record) = decoder.decode()? {
        if let WalRecord::Marker(marker) = record {
            if marker.height == height {
                return Ok(Some(decoder));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_kernel::wal::WalMessage;
    use cairn_persistence::{encode_record, FileHeader};
    use std::io::Write;
    use tempfile::tempdir;

    fn timed(height: u64) -> TimedWalMessage {
        TimedWalMessage {
            time_ms: 1_700_000_000_000 + height,
            msg: WalMessage::EndHeight { height },
        }
    }

    fn marker_bytes(height: u64, offset: u64) -> Vec<u8> {
        encode_record(RecordKind::Marker, &MarkerEntry { height, offset }.to_bytes())
    }

    fn write_log(path: &Path, chunks: &[Vec<u8>]) {
        let mut file = File::create(path).unwrap();
        file.write_all(&FileHeader::new(WAL_MAGIC).to_bytes()).unwrap();
        for chunk in chunks {
            file.write_all(chunk).unwrap();
        }
    }

    fn message_bytes(height: u64) -> Vec<u8> {
        encode_record(RecordKind::Message, &encode_message(&timed(height)).unwrap())
    }

    #[test]
    fn test_search_positions_after_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consensus.wal");
        write_log(
            &path,
            &[marker_bytes(0, 8), message_bytes(0), marker_bytes(1, 0), message_bytes(1)],
        );

        let mut dec = search_for_height(&path, 1, 1024, SearchOptions::default())
            .unwrap()
            .expect("marker 1 present");
        assert_eq!(dec.decode().unwrap(), Some(WalRecord::Message(timed(1))));
        assert_eq!(dec.decode().unwrap(), None);

        assert!(search_for_height(&path, 7, 1024, SearchOptions::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_torn_tail_is_end_of_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consensus.wal");
        let torn = message_bytes(2);
        write_log(&path, &[marker_bytes(0, 8), message_bytes(1), torn[..torn.len() - 1].to_vec()]);

        let records: Vec<_> = WalDecoder::open(&path, 1024, SearchOptions::default())
            .unwrap()
            .collect::<WalResult<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_corruption_fatal_unless_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consensus.wal");
        let mut bad = message_bytes(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        write_log(&path, &[marker_bytes(0, 8), bad, message_bytes(2)]);

        let mut strict = WalDecoder::open(&path, 1024, SearchOptions::default()).unwrap();
        assert!(matches!(strict.decode().unwrap(), Some(WalRecord::Marker(_))));
        let err = strict.decode().unwrap_err();
        assert!(matches!(err, WalError::Corrupted { offset, .. } if offset == 8 + 13 + 16));

        let lenient = WalDecoder::open(
            &path,
            1024,
            SearchOptions {
                ignore_data_corruption: true,
            },
        )
        .unwrap();
        let records: Vec<_> = lenient.collect::<WalResult<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], WalRecord::Message(timed(2)));
    }

    #[test]
    fn test_garbage_payload_with_valid_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consensus.wal");
        write_log(&path, &[encode_record(RecordKind::Message, &[0xFF; 3])]);

        let mut dec = WalDecoder::open(&path, 1024, SearchOptions::default()).unwrap();
        assert!(matches!(dec.decode(), Err(WalError::Corrupted { offset: 8, .. })));
    }
}
