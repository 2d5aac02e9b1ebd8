use crate::error::{PersistenceError, Result};
use crate::idx::MarkerEntry;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use crc64fast::Digest;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::Path;

pub const WAL_MAGIC: [u8; 4] = *b"CWAL";
pub const BLOCKS_MAGIC: [u8; 4] = *b"CBLK";
pub const FORMAT_VERSION: u32 = 1;
pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u32,
}

impl FileHeader {
    pub const SIZE: usize = 4 + 4;

    pub fn new(magic: [u8; 4]) -> Self {
        Self {
            magic,
            version: FORMAT_VERSION,
        }
    }

    pub fn read_from<R: Read>(mut reader: R, expected_magic: [u8; 4]) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != expected_magic {
            return Err(PersistenceError::InvalidMagic { found: magic });
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }
        Ok(Self { magic, version })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    Message = 1,
    Marker = 2,
    Block = 3,
}

impl TryFrom<u8> for RecordKind {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            1 => Ok(RecordKind::Message),
            2 => Ok(RecordKind::Marker),
            3 => Ok(RecordKind::Block),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: u8,
    pub payload_len: u32,
    pub checksum: u64,
}

impl RecordHeader {
    pub const SIZE: usize = 1 + 4 + 8; // 13 bytes

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let kind = reader.read_u8()?;
        let payload_len = reader.read_u32::<LittleEndian>()?;
        let checksum = reader.read_u64::<LittleEndian>()?;
        Ok(Self {
            kind,
            payload_len,
            checksum,
        })
    }
}

pub fn checksum(kind: u8, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&[kind]);
    digest.write(&(payload.len() as u32).to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

/// Frames `payload` as a single record.
pub fn encode_record(kind: RecordKind, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(RecordHeader::SIZE + payload.len());
    buf.put_u8(kind as u8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_u64_le(checksum(kind as u8, payload));
    buf.put_slice(payload);
    buf.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    /// Byte offset of the record header in the file.
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn encoded_len(&self) -> u64 {
        (RecordHeader::SIZE + self.payload.len()) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Record(Record),
    /// Clean end of file on a record boundary.
    End,
    /// The file ends inside the record starting at `offset`.
    TornTail { offset: u64 },
}

/// Fills as much of `buf` as the reader has. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub struct RecordReader<R> {
    reader: R,
    offset: u64,
    max_record_size: u32,
}

impl<R: Read> RecordReader<R> {
    /// `offset` is the file position `reader` starts at, used for reporting.
    pub fn new(reader: R, offset: u64, max_record_size: u32) -> Self {
        Self {
            reader,
            offset,
            max_record_size,
        }
    }

    /// Position just past the last record returned (or skipped).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next record. On a checksum mismatch the damaged record has
    /// already been consumed, so a caller that tolerates corruption can keep
    /// reading.
    pub fn next_record(&mut self) -> Result<ReadOutcome> {
        let start = self.offset;

        let mut head = [0u8; RecordHeader::SIZE];
        let n = read_full(&mut self.reader, &mut head)?;
        if n == 0 {
            return Ok(ReadOutcome::End);
        }
        if n < RecordHeader::SIZE {
            return Ok(ReadOutcome::TornTail { offset: start });
        }
        let header = RecordHeader::read_from(&head[..])?;

        let kind = RecordKind::try_from(header.kind).map_err(|kind| PersistenceError::InvalidKind {
            offset: start,
            kind,
        })?;
        if header.payload_len > self.max_record_size {
            return Err(PersistenceError::RecordTooLarge {
                offset: start,
                len: header.payload_len,
                max: self.max_record_size,
            });
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        let n = read_full(&mut self.reader, &mut payload)?;
        if n < payload.len() {
            return Ok(ReadOutcome::TornTail { offset: start });
        }
        self.offset += (RecordHeader::SIZE + payload.len()) as u64;

        // Verify Checksum
        let found = checksum(header.kind, &payload);
        if found != header.checksum {
            return Err(PersistenceError::ChecksumMismatch {
                offset: start,
                expected: header.checksum,
                found,
            });
        }

        Ok(ReadOutcome::Record(Record {
            kind,
            offset: start,
            payload,
        }))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    /// Yields records up to the end of the valid log; a torn tail ends
    /// iteration like a clean EOF.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(ReadOutcome::Record(r)) => Some(Ok(r)),
            Ok(ReadOutcome::End) | Ok(ReadOutcome::TornTail { .. }) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Opens `path`, checks its header and returns a reader positioned at the
/// first record.
pub fn open_reader(
    path: impl AsRef<Path>,
    magic: [u8; 4],
    max_record_size: u32,
) -> Result<RecordReader<BufReader<File>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    FileHeader::read_from(&mut reader, magic)?;
    Ok(RecordReader::new(reader, FileHeader::SIZE as u64, max_record_size))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub header: FileHeader,
    pub records: u64,
    pub markers: Vec<MarkerEntry>,
    /// End of the last complete record.
    pub valid_len: u64,
    pub file_len: u64,
    pub torn_tail: bool,
}

/// Walks the whole file. Fails on the first corrupt record.
pub fn scan_file(path: impl AsRef<Path>, magic: [u8; 4], max_record_size: u32) -> Result<ScanReport> {
    let path = path.as_ref();
    let file_len = std::fs::metadata(path)?.len();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let header = FileHeader::read_from(&mut reader, magic)?;
    let mut records = RecordReader::new(reader, FileHeader::SIZE as u64, max_record_size);

    let mut report = ScanReport {
        header,
        records: 0,
        markers: Vec::new(),
        valid_len: FileHeader::SIZE as u64,
        file_len,
        torn_tail: false,
    };
    loop {
        match records.next_record()? {
            ReadOutcome::Record(record) => {
                if record.kind == RecordKind::Marker {
                    report.markers.push(MarkerEntry::from_bytes(&record.payload)?);
                }
                report.records += 1;
                report.valid_len = records.offset();
            }
            ReadOutcome::End => break,
            ReadOutcome::TornTail { .. } => {
                report.torn_tail = true;
                break;
            }
        }
    }
    Ok(report)
}

/// Truncates a torn final record. Returns the number of bytes removed.
pub fn repair_tail(path: impl AsRef<Path>, magic: [u8; 4], max_record_size: u32) -> Result<u64> {
    let path = path.as_ref();
    let report = scan_file(path, magic, max_record_size)?;
    if !report.torn_tail {
        return Ok(0);
    }
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(report.valid_len)?;
    file.sync_all()?;
    Ok(report.file_len - report.valid_len)
}

/// Fsyncs the directory holding `path` so a create or rename in it is durable.
pub fn sync_parent_dir(path: impl AsRef<Path>) -> io::Result<()> {
    match path.as_ref().parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

/// Creates `path` holding exactly `bytes`, through a synced temp file and a
/// rename. After a crash the file is either absent or complete.
pub fn write_new_file(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        io::Write::write_all(&mut file, bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    sync_parent_dir(path)
}
