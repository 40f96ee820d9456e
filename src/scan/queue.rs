use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::event::{Event, EventType};

/// The central FIFO between the pipeline and the driver loop.
pub struct EventQueue {
    tx: UnboundedSender<Arc<Event>>,
    rx: Mutex<Option<UnboundedReceiver<Arc<Event>>>>,
    queued: AtomicUsize,
    queued_types: Mutex<ahash::AHashMap<EventType, usize>>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            queued: AtomicUsize::new(0),
            queued_types: Mutex::new(ahash::AHashMap::new()),
        }
    }

    pub fn push(&self, event: Arc<Event>) -> bool {
        let event_type = event.event_type();
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        *self.queued_types.lock().entry(event_type).or_insert(0) += 1;
        true
    }

    /// The receiving half. Only one consumer ever gets it.
    pub fn take_receiver(&self) -> Option<UnboundedReceiver<Arc<Event>>> {
        self.rx.lock().take()
    }

    /// Whether nobody has taken the receiving half yet.
    pub fn has_receiver(&self) -> bool {
        self.rx.lock().is_some()
    }

    /// Account for an event taken off the receiver.
    pub fn mark_dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events ever queued, per type, most frequent first.
    pub fn type_summary(&self) -> Vec<(EventType, usize)> {
        let mut summary: Vec<(EventType, usize)> = self.queued_types.lock().iter().map(|(t, n)| (*t, *n)).collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
