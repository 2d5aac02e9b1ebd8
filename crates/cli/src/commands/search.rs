use anyhow::anyhow;
use cairn_node::wal_reader::{search_for_height, SearchOptions, WalRecord};
use cairn_persistence::DEFAULT_MAX_RECORD_SIZE;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use std::path::Path;

use super::{describe, format_ms};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedMessage {
    pub offset: u64,
    pub time_ms: u64,
    pub height: u64,
    pub kind: &'static str,
    pub detail: String,
}

/// Messages logged after the marker for `height`, up to the next height's
/// marker.
pub fn collect(wal_path: &Path, height: u64, options: SearchOptions) -> anyhow::Result<Vec<LoggedMessage>> {
    let mut decoder = search_for_height(wal_path, height, DEFAULT_MAX_RECORD_SIZE, options)?
        .ok_or_else(|| anyhow!("no marker for height {} in {}", height, wal_path.display()))?;

    let mut found = Vec::new();
    loop {
        let offset = decoder.offset();
        match decoder.decode()? {
            Some(WalRecord::Marker(marker)) if marker.height != height => break,
            Some(WalRecord::Marker(_)) => {}
            Some(WalRecord::Message(timed)) => {
                let (kind, detail) = describe(&timed.msg);
                found.push(LoggedMessage {
                    offset,
                    time_ms: timed.time_ms,
                    height: timed.msg.height(),
                    kind,
                    detail,
                });
            }
            None => break,
        }
    }
    Ok(found)
}

pub fn run(wal_path: &Path, height: u64, options: SearchOptions, json: bool) -> anyhow::Result<Vec<LoggedMessage>> {
    let found = collect(wal_path, height, options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(found);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Offset", "Time", "Height", "Kind", "Detail"]);
    for msg in &found {
        table.add_row(vec![
            msg.offset.to_string(),
            format_ms(msg.time_ms),
            msg.height.to_string(),
            msg.kind.to_string(),
            msg.detail.clone(),
        ]);
    }

    println!("\nHeight {} ({} messages)\n", height, found.len());
    println!("{table}\n");

    Ok(found)
}
