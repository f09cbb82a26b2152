//! Telemetry fan-out channel.
//!
//! Delivers [`TelemetryEvent`]s to any number of observers, each with its
//! own bounded delivery queue. Publishing never blocks on a slow observer:
//! when a queue is full the oldest event is dropped and a loss counter is
//! incremented, surfaced to that observer in-band as a `log` event before
//! its next delivery. A freshly subscribed observer is seeded with a full
//! state snapshot, so reconnecting clients resync by resubscribing rather
//! than by sequence-numbered resumption.
//!
//! Within one observer's queue events are strictly delivery-ordered as
//! produced; across observers no relative ordering is guaranteed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::model::TelemetryEvent;

/// Default per-observer queue capacity before drop-oldest kicks in.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 256;

struct ObserverQueue {
    events: VecDeque<TelemetryEvent>,
    /// Events dropped since the observer last drained past the overflow.
    lost: u64,
    closed: bool,
}

struct Observer {
    queue: Mutex<ObserverQueue>,
    notify: Notify,
}

impl Observer {
    fn push(&self, event: TelemetryEvent, capacity: usize) {
        let mut queue = self.queue.lock().unwrap();
        if queue.closed {
            return;
        }
        if queue.events.len() >= capacity {
            queue.events.pop_front();
            queue.lost += 1;
        }
        queue.events.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.queue.lock().unwrap().closed = true;
        self.notify.notify_one();
    }
}

/// Fan-out hub between the orchestration core and its observers.
pub struct TelemetryChannel {
    observers: Mutex<HashMap<u64, Arc<Observer>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl TelemetryChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OBSERVER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer whose queue is preloaded with `initial`
    /// snapshot events.
    ///
    /// Registration and preload happen atomically with respect to
    /// [`publish`](Self::publish), so no concurrently published event can
    /// land between the snapshot and the diff stream.
    pub fn subscribe_with(self: &Arc<Self>, initial: Vec<TelemetryEvent>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let observer = Arc::new(Observer {
            queue: Mutex::new(ObserverQueue {
                events: VecDeque::from(initial),
                lost: 0,
                closed: false,
            }),
            notify: Notify::new(),
        });

        self.observers
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&observer));
        debug!(observer_id = id, "Observer subscribed");

        ObserverHandle {
            id,
            observer,
            channel: Arc::clone(self),
        }
    }

    /// Append `event` to every observer's queue. Never blocks the caller.
    pub fn publish(&self, event: TelemetryEvent) {
        let observers = self.observers.lock().unwrap();
        for observer in observers.values() {
            observer.push(event.clone(), self.capacity);
        }
    }

    /// Deregister an observer. Idempotent; unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let removed = self.observers.lock().unwrap().remove(&id);
        if let Some(observer) = removed {
            observer.close();
            debug!(observer_id = id, "Observer unsubscribed");
        }
    }

    /// Number of currently registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// Close every observer queue and drop all registrations. Used when
    /// draining the process for shutdown.
    pub fn close_all(&self) {
        let drained: Vec<Arc<Observer>> =
            self.observers.lock().unwrap().drain().map(|(_, o)| o).collect();
        for observer in drained {
            observer.close();
        }
    }
}

impl Default for TelemetryChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One observer's receiving end of the channel.
///
/// Dropping the handle unsubscribes it.
pub struct ObserverHandle {
    id: u64,
    observer: Arc<Observer>,
    channel: Arc<TelemetryChannel>,
}

impl ObserverHandle {
    /// Receive the next event, in production order.
    ///
    /// If events were dropped because this observer fell behind, a `log`
    /// event reporting the loss is delivered before the surviving backlog.
    /// Returns `None` once the channel side has closed the queue.
    ///
    /// Cancel-safe: a cancelled call consumes no event.
    pub async fn next(&mut self) -> Option<TelemetryEvent> {
        loop {
            let notified = self.observer.notify.notified();
            {
                let mut queue = self.observer.queue.lock().unwrap();
                if queue.lost > 0 {
                    let lost = queue.lost;
                    queue.lost = 0;
                    return Some(TelemetryEvent::Log {
                        message: format!(
                            "telemetry backlog overflow: {lost} events dropped, resubscribe for a full snapshot"
                        ),
                    });
                }
                if let Some(event) = queue.events.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}

// ============================================================================
// Observer-side reconnection contract
// ============================================================================

/// Connection state machine an observer is expected to run against the
/// channel transport. Kept here so the backoff contract is testable
/// without any actual network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverConnState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Backoff before reconnect attempt number `retry` (0-based), as a pure
/// function of the retry count: 3 s doubling per attempt, capped at 48 s.
pub fn reconnect_delay(retry: u32) -> Duration {
    const BASE_SECS: u64 = 3;
    const CAP_SECS: u64 = 48;
    let secs = BASE_SECS.saturating_mul(1u64 << retry.min(4));
    Duration::from_secs(secs.min(CAP_SECS))
}

/// Tracks one observer connection through disconnect/backoff/resubscribe.
#[derive(Debug)]
pub struct ObserverConnection {
    state: ObserverConnState,
    retries: u32,
}

impl ObserverConnection {
    pub fn new() -> Self {
        Self {
            state: ObserverConnState::Disconnected,
            retries: 0,
        }
    }

    pub fn state(&self) -> ObserverConnState {
        self.state
    }

    /// Called when the transport drops. Returns how long to wait before
    /// the next connect attempt.
    pub fn connection_lost(&mut self) -> Duration {
        self.state = ObserverConnState::Disconnected;
        let delay = reconnect_delay(self.retries);
        self.retries = self.retries.saturating_add(1);
        delay
    }

    pub fn connect_started(&mut self) {
        self.state = ObserverConnState::Connecting;
    }

    /// Called once `subscribe` succeeded. Prior partial state must be
    /// discarded by the caller; the channel guarantees a fresh snapshot.
    pub fn subscribed(&mut self) {
        self.state = ObserverConnState::Subscribed;
        self.retries = 0;
    }
}

impl Default for ObserverConnection {
    fn default() -> Self {
        Self::new()
    }
}
