use cairn_node::config::NodeConfig;
use cairn_node::persistence::{FileStateStore, StateStore, MAX_BLOCK_RECORD};
use cairn_persistence::{scan_file, BLOCKS_MAGIC, DEFAULT_MAX_RECORD_SIZE, WAL_MAGIC};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub wal: PathBuf,
    pub blocks: PathBuf,
    pub state: PathBuf,
}

impl StorePaths {
    /// Resolves the node's file layout under `home`, letting explicit paths
    /// override each file.
    pub fn resolve(
        home: Option<PathBuf>,
        wal: Option<PathBuf>,
        blocks: Option<PathBuf>,
        state: Option<PathBuf>,
    ) -> Self {
        let config = NodeConfig::with_home(home.unwrap_or_else(|| PathBuf::from(".")));
        Self {
            wal: wal.unwrap_or_else(|| config.wal_file()),
            blocks: blocks.unwrap_or_else(|| config.blocks_file()),
            state: state.unwrap_or_else(|| config.state_file()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Found,
    Torn,
    Missing,
    Corrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: &'static str,
    pub status: FileStatus,
    pub details: String,
}

fn scan(file: &'static str, path: &Path, magic: [u8; 4], max: u32) -> FileReport {
    if !path.exists() {
        return FileReport {
            file,
            status: FileStatus::Missing,
            details: path.display().to_string(),
        };
    }
    match scan_file(path, magic, max) {
        Ok(report) => {
            let mut details = format!("{} records, {} bytes", report.records, report.valid_len);
            if let (Some(first), Some(last)) = (report.markers.first(), report.markers.last()) {
                details.push_str(&format!(", markers {}..={}", first.height, last.height));
            }
            let status = if report.torn_tail {
                details.push_str(&format!(", torn tail of {} bytes", report.file_len - report.valid_len));
                FileStatus::Torn
            } else {
                FileStatus::Found
            };
            FileReport { file, status, details }
        }
        Err(e) => FileReport {
            file,
            status: FileStatus::Corrupt,
            details: e.to_string(),
        },
    }
}

fn state(path: &Path) -> FileReport {
    if !path.exists() {
        return FileReport {
            file: "State",
            status: FileStatus::Missing,
            details: path.display().to_string(),
        };
    }
    let loaded = FileStateStore::open(path).and_then(|store| store.load_state());
    match loaded {
        Ok(Some(state)) => FileReport {
            file: "State",
            status: FileStatus::Found,
            details: format!(
                "chain {}, height {}, app hash {}",
                state.chain_id, state.last_block_height, state.app_hash
            ),
        },
        Ok(None) => FileReport {
            file: "State",
            status: FileStatus::Found,
            details: "no state saved yet".to_string(),
        },
        Err(e) => FileReport {
            file: "State",
            status: FileStatus::Corrupt,
            details: e.to_string(),
        },
    }
}

pub fn collect(paths: &StorePaths) -> Vec<FileReport> {
    vec![
        scan("WAL", &paths.wal, WAL_MAGIC, DEFAULT_MAX_RECORD_SIZE),
        scan("Blocks", &paths.blocks, BLOCKS_MAGIC, MAX_BLOCK_RECORD),
        state(&paths.state),
    ]
}

pub fn run(paths: &StorePaths, json: bool) -> anyhow::Result<Vec<FileReport>> {
    let reports = collect(paths);
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(reports);
    }

    println!("\nCairn Status Report");
    println!("-------------------");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Status", "Details"]);
    for report in &reports {
        let status = match report.status {
            FileStatus::Found => "FOUND",
            FileStatus::Torn => "TORN",
            FileStatus::Missing => "MISSING",
            FileStatus::Corrupt => "CORRUPT",
        };
        table.add_row(vec![report.file, status, &report.details]);
    }
    println!("{table}\n");

    Ok(reports)
}
