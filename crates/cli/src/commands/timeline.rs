use anyhow::bail;
use cairn_kernel::wal::{ConsensusMessage, WalMessage};
use cairn_node::wal_reader::{SearchOptions, WalDecoder, WalRecord};
use cairn_persistence::DEFAULT_MAX_RECORD_SIZE;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use std::path::Path;

use super::format_ms;

/// Everything logged between one height marker and the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeightSpan {
    pub height: u64,
    pub marker_offset: u64,
    pub messages: u64,
    pub votes: u64,
    pub timeouts: u64,
    pub first_ms: Option<u64>,
    pub last_ms: Option<u64>,
    pub ended: bool,
}

pub fn collect(wal_path: &Path, options: SearchOptions) -> anyhow::Result<Vec<HeightSpan>> {
    let mut decoder = WalDecoder::open(wal_path, DEFAULT_MAX_RECORD_SIZE, options)?;
    let mut spans: Vec<HeightSpan> = Vec::new();

    loop {
        let offset = decoder.offset();
        let record = match decoder.decode()? {
            Some(record) => record,
            None => break,
        };
        match record {
            // A restart can log the marker of the height it resumes again.
            WalRecord::Marker(marker) if spans.last().map(|s| s.height) == Some(marker.height) => {}
            WalRecord::Marker(marker) => spans.push(HeightSpan {
                height: marker.height,
                marker_offset: offset,
                ..HeightSpan::default()
            }),
            WalRecord::Message(timed) => {
                let span = match spans.last_mut() {
                    Some(span) => span,
                    None => bail!("message at offset {} precedes the first height marker", offset),
                };
                span.messages += 1;
                span.first_ms.get_or_insert(timed.time_ms);
                span.last_ms = Some(timed.time_ms);
                match timed.msg {
                    WalMessage::Event(ev) if matches!(ev.msg, ConsensusMessage::Vote(_)) => span.votes += 1,
                    WalMessage::Timeout(_) => span.timeouts += 1,
                    WalMessage::EndHeight { .. } => span.ended = true,
                    WalMessage::Event(_) => {}
                }
            }
        }
    }
    Ok(spans)
}

pub fn run(wal_path: &Path, options: SearchOptions, json: bool) -> anyhow::Result<Vec<HeightSpan>> {
    let spans = collect(wal_path, options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&spans)?);
        return Ok(spans);
    }

    if !spans.windows(2).all(|w| w[0].height < w[1].height) {
        println!("\n⚠️  WARNING: Height markers are not sequential.\n");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Height", "Offset", "Messages", "Votes", "Timeouts", "Started", "Span", "Ended"]);

    for span in &spans {
        let started = span.first_ms.map(format_ms).unwrap_or_default();
        let took = match (span.first_ms, span.last_ms) {
            (Some(first), Some(last)) => format!("{}ms", last.saturating_sub(first)),
            _ => String::new(),
        };
        table.add_row(vec![
            span.height.to_string(),
            span.marker_offset.to_string(),
            span.messages.to_string(),
            span.votes.to_string(),
            span.timeouts.to_string(),
            started,
            took,
            if span.ended { "yes".to_string() } else { "no".to_string() },
        ]);
    }

    println!("\nHeight Timeline\n");
    println!("{table}\n");

    Ok(spans)
}
