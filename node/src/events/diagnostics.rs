// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::atomic::{AtomicU64, Ordering};

use super::{EventKind, ListenerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The listener's buffer was full.
    Lagging,
    /// The receiving side went away.
    Disconnected,
    /// A one-shot listener got its event.
    Delivered,
}

/// Hooks the [`EventSwitch`](super::EventSwitch) calls while dispatching.
/// Both are invoked with the switch's table lock held and must not call
/// back into the switch.
pub trait ListenerDiagnostics: Send + Sync {
    fn on_fire(&self, _kind: EventKind, _delivered: usize) {}

    fn on_drop(&self, _kind: EventKind, _id: ListenerId, _reason: DropReason) {}
}

#[derive(Debug, Default)]
pub struct NoopDiagnostics;

impl ListenerDiagnostics for NoopDiagnostics {}

/// Counts dispatch activity. Handy in tests.
#[derive(Debug, Default)]
pub struct CountingDiagnostics {
    fired: AtomicU64,
    delivered: AtomicU64,
    lagging: AtomicU64,
    disconnected: AtomicU64,
}

impl CountingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn lagging(&self) -> u64 {
        self.lagging.load(Ordering::Relaxed)
    }

    pub fn disconnected(&self) -> u64 {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl ListenerDiagnostics for CountingDiagnostics {
    fn on_fire(&self, _kind: EventKind, delivered: usize) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
    }

    fn on_drop(&self, kind: EventKind, id: ListenerId, reason: DropReason) {
        match reason {
            DropReason::Lagging => {
                tracing::warn!(?kind, id, "Dropping lagging listener");
                self.lagging.fetch_add(1, Ordering::Relaxed);
            }
            DropReason::Disconnected => {
                self.disconnected.fetch_add(1, Ordering::Relaxed);
            }
            DropReason::Delivered => {}
        }
    }
}
