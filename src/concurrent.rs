use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::ScanConfig;
use crate::error::ScanError;

/// Decrements a pool's pending counter when the task it was issued for is
/// finished or dropped.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded concurrent task executor.
///
/// A task counts as pending from the moment it is submitted until it has run
/// to completion (or been dropped), so `queued()` covers both tasks waiting
/// for a slot and tasks currently running.
pub struct TaskPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl TaskPool {
    pub fn new(name: &'static str, concurrency: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn `fut` onto the pool without waiting for a slot.
    ///
    /// Returns `PoolShutdown` once `shutdown()` has been called. A task that was
    /// accepted but never got a slot (pool closed meanwhile) is dropped unrun.
    pub fn submit_task<Fut>(&self, fut: Fut) -> Result<JoinHandle<Option<Fut::Output>>, ScanError>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        if self.semaphore.is_closed() {
            return Err(ScanError::PoolShutdown(self.name));
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = PendingGuard(self.pending.clone());
        let semaphore = self.semaphore.clone();
        let completed = self.completed.clone();

        Ok(tokio::spawn(async move {
            let _pending = pending;
            let _permit = semaphore.acquire_owned().await.ok()?;
            let out = fut.await;
            completed.fetch_add(1, Ordering::Relaxed);
            Some(out)
        }))
    }

    /// Run `fut` inline once a slot is free, counting it as pool work meanwhile.
    pub async fn run<Fut: Future>(&self, fut: Fut) -> Result<Fut::Output, ScanError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _pending = PendingGuard(self.pending.clone());
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ScanError::PoolShutdown(self.name))?;
        let out = fut.await;
        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(out)
    }

    pub fn queued(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.semaphore.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn get_stats(&self) -> (usize, usize) {
        (self.completed.load(Ordering::Relaxed), self.queued())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueuedTasks {
    pub main: usize,
    pub event: usize,
    pub dns: usize,
    pub internal: usize,
    pub total: usize,
}

/// The four pools a scan runs on.
pub struct ScanPools {
    /// Scan and output module handlers.
    pub main: TaskPool,
    /// Event pipeline runs.
    pub event: TaskPool,
    pub dns: TaskPool,
    /// Internal module handlers.
    pub internal: TaskPool,
}

impl ScanPools {
    pub fn from_config(cfg: &ScanConfig) -> Self {
        Self {
            main: TaskPool::new("main", cfg.main_threads),
            event: TaskPool::new("event", cfg.event_threads),
            dns: TaskPool::new("dns", cfg.dns_threads),
            internal: TaskPool::new("internal", cfg.internal_threads),
        }
    }

    pub fn queued_tasks(&self) -> QueuedTasks {
        let main = self.main.queued();
        let event = self.event.queued();
        let dns = self.dns.queued();
        let internal = self.internal.queued();
        QueuedTasks {
            main,
            event,
            dns,
            internal,
            total: main + event + dns + internal,
        }
    }

    pub fn shutdown(&self) {
        self.main.shutdown();
        self.event.shutdown();
        self.dns.shutdown();
        self.internal.shutdown();
    }
}

/// Shared result cache using parking_lot RwLock for better performance
pub struct ResultCache<K, V> {
    cache: Arc<RwLock<ahash::AHashMap<K, V>>>,
}

impl<K: std::hash::Hash + Eq + Clone, V: Clone> ResultCache<K, V> {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(ahash::AHashMap::new())),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.read().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.cache.write().insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

impl<K, V> Default for ResultCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
