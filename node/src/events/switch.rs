// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::diagnostics::{DropReason, ListenerDiagnostics, NoopDiagnostics};
use super::{Event, EventKind};

pub type ListenerId = u64;

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

enum Sink {
    Channel(Sender<Event>),
    Once(oneshot::Sender<Event>),
    Callback(Callback),
}

#[derive(Default)]
struct Inner {
    next_id: ListenerId,
    table: BTreeMap<EventKind, Vec<(ListenerId, Sink)>>,
}

impl Inner {
    fn insert(&mut self, kind: EventKind, sink: Sink) -> ListenerId {
        self.next_id += 1;
        let id = self.next_id;
        self.table.entry(kind).or_default().push((id, sink));
        id
    }
}

/// Cloneable handle to a shared listener table.
#[derive(Clone)]
pub struct EventSwitch {
    inner: Arc<Mutex<Inner>>,
    diagnostics: Arc<dyn ListenerDiagnostics>,
}

impl Default for EventSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSwitch {
    pub fn new() -> Self {
        Self::with_diagnostics(Arc::new(NoopDiagnostics))
    }

    pub fn with_diagnostics(diagnostics: Arc<dyn ListenerDiagnostics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            diagnostics,
        }
    }

    /// Bounded subscription. The listener is removed the first time its
    /// buffer is full when an event fires.
    pub fn subscribe(&self, kind: EventKind, capacity: usize) -> (ListenerId, Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let id = self.inner.lock().insert(kind, Sink::Channel(tx));
        (id, rx)
    }

    /// Resolves with the next event of `kind`, then unsubscribes itself.
    pub fn subscribe_once(&self, kind: EventKind) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(kind, Sink::Once(tx));
        rx
    }

    /// Runs `f` on the firing thread for every event of `kind`.
    pub fn add_listener<F>(&self, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.lock().insert(kind, Sink::Callback(Arc::new(f)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let mut removed = false;
        for listeners in inner.table.values_mut() {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            removed |= listeners.len() != before;
        }
        inner.table.retain(|_, l| !l.is_empty());
        removed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.lock().table.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every listener of its kind and returns how many
    /// received it. Callbacks run after the table lock is released.
    pub fn fire(&self, event: Event) -> usize {
        let kind = event.kind();
        let mut callbacks = Vec::new();
        let mut delivered = 0;
        {
            let mut inner = self.inner.lock();
            let Some(listeners) = inner.table.get_mut(&kind) else {
                self.diagnostics.on_fire(kind, 0);
                return 0;
            };

            let mut kept = Vec::with_capacity(listeners.len());
            for (id, sink) in listeners.drain(..) {
                match sink {
                    Sink::Channel(tx) => match tx.try_send(event.clone()) {
                        Ok(()) => {
                            delivered += 1;
                            kept.push((id, Sink::Channel(tx)));
                        }
                        Err(TrySendError::Full(_)) => {
                            self.diagnostics.on_drop(kind, id, DropReason::Lagging);
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            self.diagnostics.on_drop(kind, id, DropReason::Disconnected);
                        }
                    },
                    Sink::Once(tx) => {
                        let reason = match tx.send(event.clone()) {
                            Ok(()) => {
                                delivered += 1;
                                DropReason::Delivered
                            }
                            Err(_) => DropReason::Disconnected,
                        };
                        self.diagnostics.on_drop(kind, id, reason);
                    }
                    Sink::Callback(f) => {
                        callbacks.push(f.clone());
                        delivered += 1;
                        kept.push((id, Sink::Callback(f)));
                    }
                }
            }
            *listeners = kept;
            if listeners.is_empty() {
                inner.table.remove(&kind);
            }
            self.diagnostics.on_fire(kind, delivered);
        }

        for f in callbacks {
            f(&event);
        }
        delivered
    }
}
