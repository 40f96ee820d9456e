use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::error::ScanError;
use crate::event::{Event, EventModule, EventType, TAG_INTERNAL};
use crate::scan::{EmitOptions, Scan};

use super::{EventCounts, Module, ModuleKind, ModuleMessage, ModuleStatus, TaskCounts};

/// Leaf behavior of a module. [`QueuedModule`] supplies queueing, batching,
/// accounting and error state around it.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> ModuleKind {
        ModuleKind::Scan
    }

    fn watched_events(&self) -> &[EventType];

    fn accept_dupes(&self) -> bool {
        false
    }

    /// Repeats of this module's own events are dropped by the pipeline.
    fn suppress_dupes(&self) -> bool {
        true
    }

    fn emit_graph_trail(&self) -> bool {
        false
    }

    /// Events handed to `handle_batch` at once. 1 means `handle_event` per event.
    fn batch_size(&self) -> usize {
        1
    }

    /// Longest a partial batch waits before it is handled anyway.
    fn batch_wait(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Module-specific acceptance check, applied after the generic ones.
    fn filter_event(&self, _event: &Event) -> Result<(), String> {
        Ok(())
    }

    async fn setup(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()>;

    async fn handle_batch(&self, ctx: &ModuleContext, events: Vec<Arc<Event>>) -> anyhow::Result<()> {
        for event in events {
            self.handle_event(ctx, event).await?;
        }
        Ok(())
    }

    /// Called each time the scan goes idle after a round that produced events.
    async fn finish(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn report(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What a handler sees of the scan: event construction and emission under
/// the module's own identity and emit permits.
#[derive(Clone)]
pub struct ModuleContext {
    scan: Arc<Scan>,
    module: EventModule,
    permits: Arc<Semaphore>,
}

impl ModuleContext {
    pub fn scan(&self) -> &Arc<Scan> {
        &self.scan
    }

    pub fn module(&self) -> &EventModule {
        &self.module
    }

    pub fn make_event(&self, value: &str, event_type: EventType, source: &Arc<Event>) -> Result<Event, ScanError> {
        self.scan.make_event(value, event_type, self.module.clone(), source)
    }

    /// Emit an event, waiting for one of the module's emit permits first.
    /// The permit travels with the event and is released when its pipeline
    /// run ends.
    pub async fn emit_event(&self, event: Event, options: EmitOptions) -> Result<bool, ScanError> {
        let permit = tokio::select! {
            _ = self.scan.stop_token().cancelled() => return Err(ScanError::Cancelled),
            permit = self.permits.clone().acquire_owned() => permit.map_err(|_| ScanError::Cancelled)?,
        };
        Ok(self.scan.emit_event(Arc::new(event.with_permit(permit)), options))
    }

    /// Build and emit in one go. Invalid values are logged and skipped.
    pub async fn emit(&self, value: &str, event_type: EventType, source: &Arc<Event>) -> Result<bool, ScanError> {
        match self.make_event(value, event_type, source) {
            Ok(event) => self.emit_event(event, EmitOptions::default()).await,
            Err(ScanError::Validation { .. }) => {
                tracing::debug!("{}: dropping invalid {} \"{}\"", self.module, event_type, value);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

struct ModuleState<H> {
    handler: H,
    module: EventModule,
    tx: Mutex<Option<UnboundedSender<ModuleMessage>>>,
    rx: Mutex<Option<UnboundedReceiver<ModuleMessage>>>,
    incoming: AtomicUsize,
    tasks: AtomicUsize,
    running: AtomicBool,
    errored: AtomicBool,
    flush: Notify,
    emit_limit: AtomicUsize,
    permits: Mutex<Option<Arc<Semaphore>>>,
    ctx: Mutex<Option<ModuleContext>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Runs an [`EventHandler`] behind an unbounded inbound queue.
pub struct QueuedModule<H> {
    state: Arc<ModuleState<H>>,
}

impl<H: EventHandler> QueuedModule<H> {
    pub fn new(handler: H) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let module = EventModule::new(handler.name(), handler.kind()).with_suppress_dupes(handler.suppress_dupes());
        Self {
            state: Arc::new(ModuleState {
                handler,
                module,
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                incoming: AtomicUsize::new(0),
                tasks: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                errored: AtomicBool::new(false),
                flush: Notify::new(),
                emit_limit: AtomicUsize::new(0),
                permits: Mutex::new(None),
                ctx: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn shared(handler: H) -> Arc<dyn Module> {
        Arc::new(Self::new(handler))
    }

    pub fn handler(&self) -> &H {
        &self.state.handler
    }
}

impl<H: EventHandler> ModuleState<H> {
    fn name(&self) -> &str {
        self.module.name()
    }

    fn outgoing(&self) -> usize {
        match &*self.permits.lock() {
            Some(permits) => self.emit_limit.load(Ordering::SeqCst).saturating_sub(permits.available_permits()),
            None => 0,
        }
    }

    /// Run one handler call inside the scan's pool for this module kind.
    /// An abort drops the call wherever it is suspended.
    async fn call<F>(&self, ctx: &ModuleContext, what: &str, fut: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>>,
    {
        let scan = ctx.scan();
        let pool = if self.module.kind() == ModuleKind::Internal {
            &scan.pools().internal
        } else {
            &scan.pools().main
        };
        let name = format!("{}.{}", self.name(), what);
        self.tasks.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let run = pool.run(scan.catch_then(&name, false, fut, || {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }));
        tokio::select! {
            _ = scan.stop_token().cancelled() => {
                tracing::debug!("{} interrupted by abort", name);
                self.running.store(false, Ordering::SeqCst);
            }
            result = run => {
                if let Err(e) = result {
                    tracing::debug!("{}: {}", name, e);
                    self.running.store(false, Ordering::SeqCst);
                }
            }
        }
        self.tasks.fetch_sub(1, Ordering::SeqCst);
    }

    async fn flush_batch(&self, ctx: &ModuleContext, batch: &mut Vec<Arc<Event>>) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::take(batch);
        let n = events.len();
        self.call(ctx, "handle_batch", self.handler.handle_batch(ctx, events)).await;
        self.incoming.fetch_sub(n, Ordering::SeqCst);
    }

    async fn work(self: Arc<Self>, ctx: ModuleContext, mut rx: UnboundedReceiver<ModuleMessage>) {
        let done = ctx.scan().done_token().clone();
        let batch_size = self.handler.batch_size().max(1);
        let batch_wait = self.handler.batch_wait();
        let mut batch: Vec<Arc<Event>> = Vec::new();

        loop {
            let message = tokio::select! {
                _ = done.cancelled() => break,
                _ = self.flush.notified() => {
                    self.flush_batch(&ctx, &mut batch).await;
                    continue;
                }
                _ = tokio::time::sleep(batch_wait), if !batch.is_empty() => {
                    self.flush_batch(&ctx, &mut batch).await;
                    continue;
                }
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };

            if self.errored.load(Ordering::SeqCst) {
                self.incoming.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            match message {
                ModuleMessage::Event(event) if batch_size > 1 => {
                    batch.push(event);
                    if batch.len() >= batch_size {
                        self.flush_batch(&ctx, &mut batch).await;
                    }
                }
                ModuleMessage::Event(event) => {
                    self.call(&ctx, "handle_event", self.handler.handle_event(&ctx, event)).await;
                    self.incoming.fetch_sub(1, Ordering::SeqCst);
                }
                ModuleMessage::Finished => {
                    self.flush_batch(&ctx, &mut batch).await;
                    self.call(&ctx, "finish", self.handler.finish(&ctx)).await;
                    self.incoming.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }

        if !batch.is_empty() {
            self.incoming.fetch_sub(batch.len(), Ordering::SeqCst);
        }
        while rx.try_recv().is_ok() {
            self.incoming.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::debug!("{} worker stopped", self.name());
    }
}

#[async_trait]
impl<H: EventHandler> Module for QueuedModule<H> {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn kind(&self) -> ModuleKind {
        self.state.module.kind()
    }

    fn accept_dupes(&self) -> bool {
        self.state.handler.accept_dupes()
    }

    fn emit_graph_trail(&self) -> bool {
        self.state.handler.emit_graph_trail()
    }

    fn filter_event(&self, event: &Event, precheck_only: bool) -> (bool, String) {
        let handler = &self.state.handler;
        let watched = handler.watched_events();
        if !watched.contains(&event.event_type()) {
            return (false, "its type is not in watched_events".into());
        }
        // addresses speculated from a range are redundant for modules that take the range itself
        let from_range = event.source().map(|s| s.event_type() == EventType::IpRange).unwrap_or(false);
        if from_range
            && event.event_type() == EventType::IpAddress
            && event.module().name() == "speculate"
            && self.name() != "speculate"
            && watched.contains(&EventType::IpRange)
        {
            return (false, "module consumes IP ranges directly".into());
        }
        if precheck_only {
            return (true, "precheck succeeded".into());
        }

        if event.module().name() == self.name() {
            return (false, "it came from ourselves".into());
        }
        if self.kind() == ModuleKind::Output && event.has_tag(TAG_INTERNAL) && !event.force_output() {
            return (false, "it is internal".into());
        }
        if let Err(reason) = handler.filter_event(event) {
            return (false, reason);
        }
        (true, String::new())
    }

    fn queue_event(&self, message: ModuleMessage) -> bool {
        if let ModuleMessage::Event(event) = &message {
            let (acceptable, reason) = self.filter_event(event, false);
            if !acceptable {
                tracing::debug!("Not accepting {} because {}", event, reason);
                return false;
            }
        }
        let tx = self.state.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return false;
        };
        self.state.incoming.fetch_add(1, Ordering::SeqCst);
        if tx.send(message).is_err() {
            self.state.incoming.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn status(&self) -> ModuleStatus {
        ModuleStatus {
            running: self.state.running.load(Ordering::SeqCst),
            errored: self.errored(),
            events: EventCounts {
                incoming: self.state.incoming.load(Ordering::SeqCst),
                outgoing: self.state.outgoing(),
            },
            tasks: TaskCounts {
                total: self.state.tasks.load(Ordering::SeqCst),
            },
        }
    }

    fn errored(&self) -> bool {
        self.state.errored.load(Ordering::SeqCst)
    }

    fn has_live_queue(&self) -> bool {
        self.state.tx.lock().is_some()
    }

    fn set_error_state(&self) {
        if !self.state.errored.swap(true, Ordering::SeqCst) {
            tracing::warn!("Setting error state for module {}", self.name());
        }
        self.state.tx.lock().take();
        // not started yet: nobody else will drain it
        if let Some(mut rx) = self.state.rx.lock().take() {
            while rx.try_recv().is_ok() {
                self.state.incoming.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn handle_batch(&self, force: bool) {
        if force {
            self.state.flush.notify_one();
        }
    }

    async fn start(&self, scan: Arc<Scan>) -> anyhow::Result<()> {
        let limit = scan.config().module_emit_limit;
        let permits = Arc::new(Semaphore::new(limit));
        self.state.emit_limit.store(limit, Ordering::SeqCst);
        *self.state.permits.lock() = Some(permits.clone());
        let ctx = ModuleContext {
            scan,
            module: self.state.module.clone(),
            permits,
        };
        *self.state.ctx.lock() = Some(ctx.clone());

        if let Err(e) = self.state.handler.setup(&ctx).await {
            self.set_error_state();
            return Err(e.context(format!("setup of module {} failed", self.name())));
        }
        let Some(rx) = self.state.rx.lock().take() else {
            anyhow::bail!("module {} has no inbound queue", self.name());
        };
        let worker = tokio::spawn(self.state.clone().work(ctx, rx));
        *self.state.worker.lock() = Some(worker);
        Ok(())
    }

    async fn report(&self) -> anyhow::Result<()> {
        let ctx = self.state.ctx.lock().clone();
        match ctx {
            Some(ctx) => self.state.handler.report(&ctx).await,
            None => Ok(()),
        }
    }

    async fn shutdown(&self) {
        self.state.tx.lock().take();
        let worker = self.state.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::debug!("{} worker ended abnormally: {}", self.name(), e);
            }
        }
        self.state.ctx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::speculate::Speculate;

    #[test]
    fn own_events_are_turned_away() {
        let module = QueuedModule::new(Speculate::default());
        let own = Event::new("10.0.0.0/30", EventType::IpRange, EventModule::new("speculate", ModuleKind::Internal), None)
            .unwrap();
        assert_eq!(module.filter_event(&own, false), (false, "it came from ourselves".to_string()));
        // the precheck does not look at the producer
        assert!(module.filter_event(&own, true).0);

        let other = Event::new("10.0.0.0/30", EventType::IpRange, EventModule::new("test", ModuleKind::Scan), None).unwrap();
        assert!(module.filter_event(&other, false).0);
    }
}
