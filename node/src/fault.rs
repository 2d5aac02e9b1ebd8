// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic crash simulation for the WAL.
//!
//! [`CrashingWal`] wraps any [`Wal`] and consults a [`FaultInjector`] around
//! every write. Once the injector trips, the wrapper behaves like a dead
//! process: every later call fails with the same error.

use cairn_kernel::wal::{HeightMarker, WalMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::wal_reader::{SearchOptions, WalDecoder};
use crate::wal_writer::{Wal, WalError, WalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalWrite<'a> {
    Message(&'a WalMessage),
    Marker(HeightMarker),
}

pub trait FaultInjector: Send {
    /// Called with the 0-based index of the write about to be forwarded.
    fn before_write(&mut self, index: u64, write: WalWrite<'_>) -> WalResult<()>;

    /// Called once the write with `index` has been handed to the inner log.
    fn after_write(&mut self, index: u64, write: WalWrite<'_>) -> WalResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// The write never reaches the log.
    Before,
    /// The write reaches the log, then the process dies.
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    Never,
    /// Crash around the write with index `n`.
    FailAfterWrites { n: u64, point: FaultPoint },
    /// Stop cleanly once `EndHeight` for this height is logged.
    StopAtHeight(u64),
}

impl FaultInjector for FaultPolicy {
    fn before_write(&mut self, index: u64, _write: WalWrite<'_>) -> WalResult<()> {
        match *self {
            FaultPolicy::FailAfterWrites {
                n,
                point: FaultPoint::Before,
            } if index == n => Err(WalError::InjectedFault { write: index }),
            _ => Ok(()),
        }
    }

    fn after_write(&mut self, index: u64, write: WalWrite<'_>) -> WalResult<()> {
        match *self {
            FaultPolicy::FailAfterWrites {
                n,
                point: FaultPoint::After,
            } if index == n => Err(WalError::InjectedFault { write: index }),
            FaultPolicy::StopAtHeight(stop) => match write {
                WalWrite::Message(WalMessage::EndHeight { height }) if *height == stop => {
                    Err(WalError::ReachedHeight(stop))
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

pub struct CrashingWal<W, F = FaultPolicy> {
    inner: W,
    injector: F,
    writes: Arc<AtomicU64>,
    tripped: Option<(u64, bool)>,
}

impl<W: Wal, F: FaultInjector> CrashingWal<W, F> {
    pub fn new(inner: W, injector: F) -> Self {
        Self {
            inner,
            injector,
            writes: Arc::new(AtomicU64::new(0)),
            tripped: None,
        }
    }

    /// Shared count of writes attempted so far, readable after the wrapper
    /// has been moved into an engine.
    pub fn write_counter(&self) -> Arc<AtomicU64> {
        self.writes.clone()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn dead(&self) -> WalResult<()> {
        match self.tripped {
            Some((height, true)) => Err(WalError::ReachedHeight(height)),
            Some((index, false)) => Err(WalError::InjectedFault { write: index }),
            None => Ok(()),
        }
    }

    fn trip(&mut self, err: WalError) -> WalError {
        match &err {
            WalError::ReachedHeight(h) => {
                tracing::info!("WAL stop height {} reached", h);
                self.tripped = Some((*h, true));
            }
            WalError::InjectedFault { write } => {
                tracing::warn!("Injected WAL fault at write #{}", write);
                self.tripped = Some((*write, false));
            }
            _ => {}
        }
        err
    }

    fn guarded(
        &mut self,
        write: WalWrite<'_>,
        forward: impl FnOnce(&mut W) -> WalResult<()>,
    ) -> WalResult<()> {
        self.dead()?;
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.injector.before_write(index, write) {
            return Err(self.trip(e));
        }
        forward(&mut self.inner)?;
        if let Err(e) = self.injector.after_write(index, write) {
            return Err(self.trip(e));
        }
        Ok(())
    }
}

impl<W: Wal, F: FaultInjector> Wal for CrashingWal<W, F> {
    fn write(&mut self, msg: &WalMessage) -> WalResult<()> {
        self.guarded(WalWrite::Message(msg), |w| w.write(msg))
    }

    fn write_sync(&mut self, msg: &WalMessage) -> WalResult<()> {
        self.guarded(WalWrite::Message(msg), |w| w.write_sync(msg))
    }

    fn write_meta_sync(&mut self, marker: HeightMarker) -> WalResult<()> {
        self.guarded(WalWrite::Marker(marker), |w| w.write_meta_sync(marker))
    }

    fn flush_and_sync(&mut self) -> WalResult<()> {
        self.dead()?;
        self.inner.flush_and_sync()
    }

    fn search_for_height(&self, height: u64, options: SearchOptions) -> WalResult<Option<WalDecoder>> {
        self.inner.search_for_height(height, options)
    }

    fn start(&mut self) -> WalResult<()> {
        self.inner.start()
    }

    fn stop(&mut self) -> WalResult<()> {
        self.inner.stop()
    }

    fn wait(&mut self) {
        self.inner.wait()
    }
}
