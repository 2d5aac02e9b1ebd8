// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! WAL message model.
//!
//! Every input that mutates round state is first captured as a [`WalMessage`].
//! Replaying the same sequence of messages into a fresh state machine yields
//! the same round state.

use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::state::Step;
use crate::types::{Part, Proposal, Vote};

/// Opaque name of the peer a message came from. Empty for messages the
/// node generated itself. Diagnostics only; never affects state.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn local() -> Self {
        PeerId(String::new())
    }

    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    BlockPart { height: u64, round: u32, part: Part },
}

impl ConsensusMessage {
    pub fn height(&self) -> u64 {
        match self {
            ConsensusMessage::Proposal(p) => p.height,
            ConsensusMessage::Vote(v) => v.height,
            ConsensusMessage::BlockPart { height, .. } => *height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    pub msg: ConsensusMessage,
    pub peer: PeerId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    pub duration_ms: u64,
    pub height: u64,
    pub round: u32,
    pub step: Step,
}

impl TimeoutInfo {
    /// Orders timeouts by the position in consensus they were scheduled for.
    pub fn position(&self) -> (u64, u32, Step) {
        (self.height, self.round, self.step)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalMessage {
    Event(EventMessage),
    Timeout(TimeoutInfo),
    /// The block at `height` is saved and the height is over.
    EndHeight { height: u64 },
}

impl WalMessage {
    pub fn height(&self) -> u64 {
        match self {
            WalMessage::Event(ev) => ev.msg.height(),
            WalMessage::Timeout(ti) => ti.height,
            WalMessage::EndHeight { height } => *height,
        }
    }
}

/// A message as stored in the log. `time_ms` is informational only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedWalMessage {
    pub time_ms: u64,
    pub msg: WalMessage,
}

/// Seek target written once per height transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeightMarker {
    pub height: u64,
}
