//! Observer fan-out for status, progress and cache-hit events

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use genorch_cache::EntryMetadata;
use tracing::error;

use crate::error::{panic_message, GenerationError};
use crate::task::{Status, TaskKey};

/// Something observers may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent<A> {
    StatusChanged {
        subject_id: String,
        fingerprint: String,
        status: Status,
        result: Option<A>,
        error: Option<GenerationError>,
    },
    Progress {
        subject_id: String,
        fingerprint: String,
        progress: u8,
        stage: Option<String>,
    },
    CacheHit {
        subject_id: String,
        fingerprint: String,
        artifact: A,
        metadata: EntryMetadata,
    },
}

impl<A> GenerationEvent<A> {
    pub(crate) fn status(key: &TaskKey, status: Status) -> Self {
        GenerationEvent::StatusChanged {
            subject_id: key.subject_id.clone(),
            fingerprint: key.fingerprint.clone(),
            status,
            result: None,
            error: None,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            GenerationEvent::StatusChanged { subject_id, .. }
            | GenerationEvent::Progress { subject_id, .. }
            | GenerationEvent::CacheHit { subject_id, .. } => subject_id,
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            GenerationEvent::StatusChanged { fingerprint, .. }
            | GenerationEvent::Progress { fingerprint, .. }
            | GenerationEvent::CacheHit { fingerprint, .. } => fingerprint,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.subject_id(), self.fingerprint())
    }

    /// The status carried by a `StatusChanged` event
    pub fn status_change(&self) -> Option<Status> {
        match self {
            GenerationEvent::StatusChanged { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Receives every event emitted by an orchestrator
pub trait GenerationListener<A>: Send + Sync {
    fn on_event(&self, event: &GenerationEvent<A>);
}

impl<A, F> GenerationListener<A> for F
where
    F: Fn(&GenerationEvent<A>) + Send + Sync,
{
    fn on_event(&self, event: &GenerationEvent<A>) {
        self(event)
    }
}

/// Collects every event it receives
///
/// Clones share the same log, so one clone can be subscribed while another
/// is inspected.
#[derive(Clone)]
pub struct EventRecorder<A> {
    events: Arc<Mutex<Vec<GenerationEvent<A>>>>,
}

impl<A: Clone> EventRecorder<A> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<GenerationEvent<A>> {
        self.lock().clone()
    }

    /// Status transitions in delivery order
    pub fn statuses(&self) -> Vec<Status> {
        self.lock()
            .iter()
            .filter_map(GenerationEvent::status_change)
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GenerationEvent<A>>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<A: Clone> Default for EventRecorder<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + Send> GenerationListener<A> for EventRecorder<A> {
    fn on_event(&self, event: &GenerationEvent<A>) {
        self.lock().push(event.clone());
    }
}

/// Handle returned by [`ListenerHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Synchronous, in-process fan-out in subscription order
///
/// Events are queued with [`publish`](Self::publish) while the caller still
/// holds the lock that ordered them, then delivered by [`flush`](Self::flush).
/// Only one thread delivers at a time and it drains the queue in FIFO order,
/// so every listener sees events in the order they were produced. A flush
/// that finds delivery already in progress returns at once; the active
/// drainer picks its events up, which keeps re-entrant callbacks safe.
///
/// The listener list is snapshotted before each delivery, so a callback may
/// subscribe, unsubscribe or call back into the orchestrator. A panicking
/// listener is logged and skipped; the rest still receive the event.
pub struct ListenerHub<A> {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn GenerationListener<A>>)>>,
    pending: Mutex<VecDeque<GenerationEvent<A>>>,
    draining: AtomicBool,
    next_id: AtomicU64,
}

impl<A> Default for ListenerHub<A> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<A> ListenerHub<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<L>(&self, listener: L) -> ListenerId
    where
        L: GenerationListener<A> + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<dyn GenerationListener<A>> = Arc::new(listener);
        self.lock().push((id, listener));
        id
    }

    /// Returns false when the handle was not subscribed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Queue an event behind everything published before it
    pub fn publish(&self, event: GenerationEvent<A>) {
        self.queue().push_back(event);
    }

    /// Deliver queued events unless another caller is already delivering
    pub fn flush(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            while let Some(event) = self.next_pending() {
                self.deliver(&event);
            }
            self.draining.store(false, Ordering::SeqCst);

            // An event published after the last pop but before the flag
            // was cleared saw delivery in progress and left it to us.
            if !self.has_pending() {
                return;
            }
        }
    }

    /// Publish and flush in one step
    pub fn emit(&self, event: GenerationEvent<A>) {
        self.publish(event);
        self.flush();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn deliver(&self, event: &GenerationEvent<A>) {
        let snapshot: Vec<(ListenerId, Arc<dyn GenerationListener<A>>)> = self.lock().clone();

        for (id, listener) in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                error!(
                    "Listener {:?} panicked while handling event for {}: {}",
                    id,
                    event.key(),
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn next_pending(&self) -> Option<GenerationEvent<A>> {
        self.queue().pop_front()
    }

    fn has_pending(&self) -> bool {
        !self.queue().is_empty()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<GenerationEvent<A>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<dyn GenerationListener<A>>)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
