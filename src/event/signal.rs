use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit};

/// Single-fire completion signal. Goes from unset to set exactly once;
/// any number of tasks may wait on it.
#[derive(Debug, Default)]
pub struct ResolvedSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl ResolvedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn set(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Wait at most `timeout`. Returns whether the signal is set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Concurrency permit held by an event's producer until the event is fully
/// processed. Releasing is idempotent: only the first call frees the slot.
#[derive(Debug, Default)]
pub struct EventPermit(Mutex<Option<OwnedSemaphorePermit>>);

impl EventPermit {
    pub fn new(permit: Option<OwnedSemaphorePermit>) -> Self {
        Self(Mutex::new(permit))
    }

    pub fn release(&self) -> bool {
        self.0.lock().take().is_some()
    }

    pub fn is_held(&self) -> bool {
        self.0.lock().is_some()
    }
}
