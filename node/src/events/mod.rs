// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-process event bus.
//!
//! The consensus thread fires [`Event`]s; listeners subscribe by
//! [`EventKind`]. Delivery is best effort: a listener that cannot keep up is
//! dropped rather than stalling consensus.

pub mod diagnostics;
pub mod switch;

pub use diagnostics::{CountingDiagnostics, DropReason, ListenerDiagnostics, NoopDiagnostics};
pub use switch::{EventSwitch, ListenerId};

use cairn_kernel::state::Notice;
use cairn_kernel::types::{BlockId, Hash, Vote};
use cairn_kernel::wal::TimeoutInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A block was finalized and applied, live or during replay.
    NewBlock { height: u64, hash: Hash, txs: usize },
    NewRound { height: u64, round: u32 },
    CompleteProposal { height: u64, round: u32, block_id: BlockId },
    Vote(Vote),
    /// A scheduled timeout fired and was handed to consensus.
    Timeout(TimeoutInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    NewBlock,
    NewRound,
    CompleteProposal,
    Vote,
    Timeout,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewBlock { .. } => EventKind::NewBlock,
            Event::NewRound { .. } => EventKind::NewRound,
            Event::CompleteProposal { .. } => EventKind::CompleteProposal,
            Event::Vote(_) => EventKind::Vote,
            Event::Timeout(_) => EventKind::Timeout,
        }
    }
}

impl From<Notice> for Event {
    fn from(notice: Notice) -> Self {
        match notice {
            Notice::NewRound { height, round } => Event::NewRound { height, round },
            Notice::CompleteProposal {
                height,
                round,
                block_id,
            } => Event::CompleteProposal {
                height,
                round,
                block_id,
            },
            Notice::Vote(vote) => Event::Vote(vote),
        }
    }
}
