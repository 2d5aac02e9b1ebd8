use anyhow::bail;
use cairn_kernel::wal::WalMessage;
use cairn_node::wal_reader::decode_message;
use cairn_persistence::{FileHeader, MarkerEntry, PersistenceError, ReadOutcome, RecordKind, RecordReader, WAL_MAGIC};
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub offset: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub records: u64,
    pub messages: u64,
    pub markers: u64,
    /// Offset of a partial final record. Opening the log for writing cuts it.
    pub torn_tail: Option<u64>,
    pub problems: Vec<Problem>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, offset: u64, reason: impl Into<String>) {
        self.problems.push(Problem {
            offset,
            reason: reason.into(),
        });
    }
}

/// Walks every record, checking framing, checksums, payload decoding and the
/// marker discipline: the marker of height `h >= 2` directly follows
/// `EndHeight { h - 1 }` and records its own offset.
pub fn check(wal_path: &Path, max_record_size: u32) -> anyhow::Result<VerifyReport> {
    let file = File::open(wal_path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    if mmap.len() < FileHeader::SIZE {
        bail!("{} is too short for a WAL header", wal_path.display());
    }
    FileHeader::read_from(&mmap[..FileHeader::SIZE], WAL_MAGIC)?;

    let mut reader = RecordReader::new(&mmap[FileHeader::SIZE..], FileHeader::SIZE as u64, max_record_size);
    let mut report = VerifyReport::default();
    let mut last_end: Option<u64> = None;
    let mut after_end = false;

    loop {
        let record = match reader.next_record() {
            Ok(ReadOutcome::Record(record)) => record,
            Ok(ReadOutcome::End) => break,
            Ok(ReadOutcome::TornTail { offset }) => {
                report.torn_tail = Some(offset);
                break;
            }
            Err(e @ PersistenceError::ChecksumMismatch { .. }) => {
                // The damaged record was consumed; framing is intact.
                report.problem(e.offset().unwrap_or(reader.offset()), e.to_string());
                after_end = false;
                continue;
            }
            Err(e) if e.is_corruption() => {
                report.problem(e.offset().unwrap_or(reader.offset()), e.to_string());
                break;
            }
            Err(e) => return Err(e.into()),
        };
        report.records += 1;

        match record.kind {
            RecordKind::Message => {
                report.messages += 1;
                after_end = false;
                match decode_message(&record.payload) {
                    Ok(timed) => {
                        if let WalMessage::EndHeight { height } = timed.msg {
                            last_end = Some(height);
                            after_end = true;
                        }
                    }
                    Err(reason) => report.problem(record.offset, reason),
                }
            }
            RecordKind::Marker => {
                report.markers += 1;
                match MarkerEntry::from_bytes(&record.payload) {
                    Ok(marker) => {
                        if marker.offset != record.offset {
                            report.problem(
                                record.offset,
                                format!("marker {} claims offset {}", marker.height, marker.offset),
                            );
                        }
                        let follows_end = after_end && last_end == Some(marker.height.saturating_sub(1));
                        if marker.height >= 2 && !follows_end {
                            report.problem(
                                record.offset,
                                format!("marker {} does not follow EndHeight {}", marker.height, marker.height - 1),
                            );
                        }
                    }
                    Err(e) => report.problem(record.offset, e.to_string()),
                }
                after_end = false;
            }
            RecordKind::Block => report.problem(record.offset, "block record in a WAL file"),
        }
    }
    Ok(report)
}

pub fn run(wal_path: &Path, max_record_size: u32) -> anyhow::Result<VerifyReport> {
    let report = check(wal_path, max_record_size)?;

    if report.is_clean() {
        println!("\n✅ VERIFIED\n");
    } else {
        println!("\n❌ CORRUPTED\n");
        for problem in &report.problems {
            println!("  offset {:>10}: {}", problem.offset, problem.reason);
        }
        println!();
    }
    println!("Records:  {}", report.records);
    println!("Messages: {}", report.messages);
    println!("Markers:  {}", report.markers);
    if let Some(offset) = report.torn_tail {
        println!("Torn tail at offset {} (cut on next open)", offset);
    }
    println!();

    if !report.is_clean() {
        bail!("{} problem(s) found in {}", report.problems.len(), wal_path.display());
    }
    Ok(report)
}
