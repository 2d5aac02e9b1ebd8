// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Single-slot timeout scheduler.
//!
//! Holds at most one pending timeout. A newly scheduled timeout replaces the
//! pending one only if it is for a later (height, round, step); anything else
//! is ignored.

use cairn_kernel::wal::TimeoutInfo;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum Command {
    Schedule(TimeoutInfo),
    Stop,
}

pub struct TimeoutTicker {
    commands: Sender<Command>,
    tocks: Receiver<TimeoutInfo>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutTicker {
    pub fn spawn() -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (tock_tx, tock_rx) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("cairn-ticker".into())
            .spawn(move || run(cmd_rx, tock_tx))?;
        Ok(Self {
            commands: cmd_tx,
            tocks: tock_rx,
            handle: Some(handle),
        })
    }

    pub fn schedule(&self, ti: TimeoutInfo) {
        if self.commands.send(Command::Schedule(ti)).is_err() {
            tracing::warn!("Timeout ticker is gone, dropping {:?}", ti);
        }
    }

    /// Fired timeouts, in firing order.
    pub fn tocks(&self) -> &Receiver<TimeoutInfo> {
        &self.tocks
    }

    pub fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(commands: Receiver<Command>, tocks: Sender<TimeoutInfo>) {
    // The last accepted timeout is kept after it fires so that stale
    // reschedules for the same position stay ignored.
    let mut last: Option<TimeoutInfo> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let cmd = match deadline {
            Some(at) => {
                let wait = at.saturating_duration_since(Instant::now());
                match commands.recv_timeout(wait) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match commands.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => return,
            },
        };

        match cmd {
            Some(Command::Schedule(ti)) => {
                if let Some(prev) = &last {
                    if ti.position() <= prev.position() {
                        tracing::trace!(?ti, "Ignoring stale timeout");
                        continue;
                    }
                }
                deadline = Some(Instant::now() + Duration::from_millis(ti.duration_ms));
                last = Some(ti);
            }
            Some(Command::Stop) => return,
            None => {
                deadline = None;
                if let Some(ti) = last {
                    tracing::debug!(height = ti.height, round = ti.round, step = %ti.step, "Timeout fired");
                    if tocks.send(ti).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
