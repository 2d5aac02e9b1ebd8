// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Crash Recovery
//!
//! Rebuilds in-memory round state by replaying the consensus WAL from the
//! marker of the last stored block. Replay runs through the same entry point
//! as live consensus, so the state after replay is the state the node had
//! when it stopped.

use cairn_kernel::wal::WalMessage;
use std::time::Instant;
use thiserror::Error;

use crate::engine::Engine;
use crate::errors::EngineError;
use crate::wal_reader::{SearchOptions, WalRecord};
use crate::wal_writer::WalError;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("WAL error: {0}")]
    Wal(WalError),
    #[error("WAL corrupted at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },
    #[error("WAL has EndHeight {height} but the block store ends at {store_height}")]
    EndHeightBeyondStore { height: u64, store_height: u64 },
    #[error("engine error during replay: {0}")]
    Engine(#[from] EngineError),
}

impl From<WalError> for ReplayError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Corrupted { offset, reason } => ReplayError::Corrupted { offset, reason },
            other => ReplayError::Wal(other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Height the search started from (the block store height).
    pub from_height: u64,
    pub messages: u64,
    pub markers: u64,
    /// Records skipped because of damage, with `ignore_data_corruption`.
    pub skipped: u64,
    /// Blocks finalized while replaying.
    pub finalized: u64,
}

/// Replays the WAL into `engine` and starts the WAL writer. Must run before
/// the engine sees any live input.
pub fn catchup_replay(engine: &mut Engine, options: SearchOptions) -> Result<ReplayReport, ReplayError> {
    let start = Instant::now();
    let store_height = engine.block_store().height();
    let mut report = ReplayReport {
        from_height: store_height,
        ..ReplayReport::default()
    };

    let decoder = match engine.wal().search_for_height(store_height, options)? {
        Some(decoder) => decoder,
        None => {
            tracing::info!("No WAL marker for height {}, nothing to replay", store_height);
            engine.wal_mut().start()?;
            return Ok(report);
        }
    };

    // Read everything before the writer starts appending behind us.
    let mut records = Vec::new();
    let mut decoder = decoder;
    while let Some(record) = decoder.decode()? {
        records.push(record);
    }
    report.skipped = decoder.skipped();
    drop(decoder);

    engine.wal_mut().start()?;
    engine.begin_replay();
    engine.note_marker(store_height);
    tracing::info!("Replaying {} WAL records after marker {}", records.len(), store_height);

    let committed_before = engine.committed_height();
    for record in records {
        match record {
            WalRecord::Marker(marker) => {
                report.markers += 1;
                tracing::debug!(height = marker.height, "Replaying height");
                engine.note_marker(marker.height);
            }
            WalRecord::Message(timed) => {
                let msg = timed.msg;
                if let WalMessage::EndHeight { height } = msg {
                    let store_height = engine.block_store().height();
                    if height > store_height {
                        return Err(ReplayError::EndHeightBeyondStore { height, store_height });
                    }
                }
                report.messages += 1;
                engine.handle_msg(&msg)?;
            }
        }
    }
    report.finalized = engine.committed_height() - committed_before;
    engine.finish_replay()?;

    metrics::counter!("cairn_replay_messages_total", report.messages);
    metrics::histogram!("cairn_replay_duration_seconds", start.elapsed().as_secs_f64());
    tracing::info!(
        messages = report.messages,
        markers = report.markers,
        skipped = report.skipped,
        finalized = report.finalized,
        "WAL replay complete in {:?}",
        start.elapsed()
    );
    Ok(report)
}
