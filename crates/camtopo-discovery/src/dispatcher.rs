//! Event dispatch thread
//!
//! Transports push [`Signal`]s onto an unbounded channel. A dedicated thread
//! drains it, keeps its own view of which devices sit on which interface, and
//! delivers each event to the matching subscriptions. Callbacks never run
//! while a registry lock is held, so they may refresh or register.

use camtopo_core::TopologySnapshot;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::registry::Shared;
use crate::transport::TopologyEvent;

pub(crate) const THREAD_NAME: &str = "camtopo-dispatch";

/// Message to the dispatcher thread
#[derive(Debug)]
pub(crate) enum Signal {
    Event { seq: u64, event: TopologyEvent },
    /// A refresh produced a new snapshot; resync the live view.
    /// Events numbered above `after` may be missing from it.
    Seed {
        snapshot: Arc<TopologySnapshot>,
        after: u64,
    },
    Shutdown,
}

#[derive(Debug, Default)]
struct QueueState {
    last: u64,
    /// Marks of enumerations whose seed the dispatcher has not applied yet
    open: VecDeque<u64>,
}

/// Signal channel shared by the registry and its transport
///
/// Events are numbered under the same lock that queues them, so queue order
/// and numbering agree.
pub(crate) struct SignalQueue {
    tx: mpsc::UnboundedSender<Signal>,
    state: Mutex<QueueState>,
}

impl SignalQueue {
    pub fn new(tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self {
            tx,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn emit(&self, event: TopologyEvent) -> bool {
        let mut state = self.state.lock();
        state.last += 1;
        self.tx
            .send(Signal::Event {
                seq: state.last,
                event,
            })
            .is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Signal::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Record the start of an enumeration and return its mark
    pub fn begin_enumeration(&self) -> u64 {
        let mut state = self.state.lock();
        let mark = state.last;
        state.open.push_back(mark);
        mark
    }

    /// Forget an enumeration that produced no snapshot
    pub fn abandon_enumeration(&self) {
        self.state.lock().open.pop_back();
    }

    /// Hand the dispatcher a snapshot enumerated after `mark`
    pub fn seed(&self, snapshot: Arc<TopologySnapshot>, mark: u64) {
        let _ = self.tx.send(Signal::Seed {
            snapshot,
            after: mark,
        });
    }

    fn seed_applied(&self) {
        self.state.lock().open.pop_front();
    }

    /// Events at or below this number can never need replaying
    fn replay_floor(&self) -> u64 {
        let state = self.state.lock();
        state.open.front().copied().unwrap_or(state.last)
    }
}

/// Attachment view maintained from snapshots and events
///
/// Used to guarantee that every device on a departing interface is reported
/// removed before the interface itself.
#[derive(Debug, Default)]
pub(crate) struct LiveTopology {
    attached: BTreeMap<String, Vec<u64>>,
    /// Processed events a pending seed may not reflect
    recent: VecDeque<(u64, TopologyEvent)>,
}

impl LiveTopology {
    pub fn seed(&mut self, snapshot: &TopologySnapshot) {
        self.attached = snapshot
            .interfaces()
            .iter()
            .map(|iface| {
                let serials = iface.devices.iter().map(|d| d.serial).collect();
                (iface.identity.id.clone(), serials)
            })
            .collect();
    }

    /// Seed from `snapshot`, then replay the processed events numbered above `after`
    pub fn resync(&mut self, snapshot: &TopologySnapshot, after: u64) {
        self.seed(snapshot);
        self.recent.retain(|(seq, _)| *seq > after);
        let replay: Vec<TopologyEvent> = self.recent.iter().map(|(_, e)| e.clone()).collect();
        for event in replay {
            self.expand(event);
        }
    }

    /// Remember a processed event until no seed can predate it
    pub fn record(&mut self, seq: u64, event: TopologyEvent, floor: u64) {
        self.recent.push_back((seq, event));
        while self.recent.front().is_some_and(|(seq, _)| *seq <= floor) {
            self.recent.pop_front();
        }
    }

    /// Apply one event and return the events to deliver, in order
    pub fn expand(&mut self, event: TopologyEvent) -> Vec<TopologyEvent> {
        match &event {
            TopologyEvent::InterfaceArrival { interface_id } => {
                self.attached.entry(interface_id.clone()).or_default();
                vec![event]
            }
            TopologyEvent::InterfaceRemoval { interface_id } => {
                let mut out: Vec<TopologyEvent> = self
                    .attached
                    .remove(interface_id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|serial| TopologyEvent::DeviceRemoval {
                        interface_id: interface_id.clone(),
                        serial,
                    })
                    .collect();
                if !out.is_empty() {
                    debug!(
                        interface = %interface_id,
                        devices = out.len(),
                        "Synthesizing device removals ahead of interface removal"
                    );
                }
                out.push(event);
                out
            }
            TopologyEvent::DeviceArrival { interface_id, serial } => {
                let mut out = Vec::with_capacity(2);
                // A device can only sit on one interface; a move is a removal then an arrival.
                for (owner, serials) in self.attached.iter_mut() {
                    if owner != interface_id {
                        if let Some(pos) = serials.iter().position(|s| s == serial) {
                            serials.remove(pos);
                            out.push(TopologyEvent::DeviceRemoval {
                                interface_id: owner.clone(),
                                serial: *serial,
                            });
                        }
                    }
                }
                let serials = self.attached.entry(interface_id.clone()).or_default();
                if !serials.contains(serial) {
                    serials.push(*serial);
                }
                out.push(event);
                out
            }
            TopologyEvent::DeviceRemoval { interface_id, serial } => {
                if let Some(serials) = self.attached.get_mut(interface_id) {
                    serials.retain(|s| s != serial);
                }
                vec![event]
            }
        }
    }

    #[cfg(test)]
    pub fn devices_on(&self, interface_id: &str) -> &[u64] {
        self.attached
            .get(interface_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Spawn the dispatcher thread
pub(crate) fn spawn(
    shared: Weak<Shared>,
    mut rx: mpsc::UnboundedReceiver<Signal>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || {
            let mut live = LiveTopology::default();
            while let Some(signal) = rx.blocking_recv() {
                match signal {
                    Signal::Shutdown => break,
                    Signal::Seed { snapshot, after } => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        live.resync(&snapshot, after);
                        shared.signals.seed_applied();
                        trace!(generation = snapshot.generation(), after, "Dispatcher resynced");
                    }
                    Signal::Event { seq, event } => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        if shared.is_released() {
                            break;
                        }
                        for event in live.expand(event.clone()) {
                            deliver(&shared, &event);
                        }
                        live.record(seq, event, shared.signals.replay_floor());
                    }
                }
            }
            debug!("Dispatcher stopped");
        })
}

fn deliver(shared: &Shared, event: &TopologyEvent) {
    let current = shared.generation();
    // Clone the matching entries out so no lock is held during callbacks.
    let entries = shared.subscriptions.matching(event, current);
    debug!(event = %event, subscribers = entries.len(), "Dispatching topology event");

    for entry in entries {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.subscription.deliver(event)));
        if outcome.is_err() {
            warn!(subscription = %entry.id, event = %event, "Event callback panicked");
        }
    }

    // No receivers is fine.
    let _ = shared.events.send(event.clone());
}
