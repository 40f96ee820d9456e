#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use asset_hunter::config::ScanConfig;
use asset_hunter::dns::{DnsRecordType, DnsResolver};
use asset_hunter::modules::{EventHandler, ModuleContext, ModuleKind};
use asset_hunter::{Event, EventType};

/// Answers from a fixed table; everything else has no records.
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<(String, DnsRecordType), Vec<String>>,
}

impl StaticResolver {
    pub fn with(mut self, host: &str, rdtype: DnsRecordType, records: &[&str]) -> Self {
        self.records
            .insert((host.to_string(), rdtype), records.iter().map(|r| r.to_string()).collect());
        self
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, host: &str, rdtype: DnsRecordType) -> anyhow::Result<Vec<String>> {
        Ok(self.records.get(&(host.to_string(), rdtype)).cloned().unwrap_or_default())
    }
}

pub fn fast_config() -> ScanConfig {
    ScanConfig {
        poll_interval_ms: 20,
        status_frequency_secs: 600,
        ..Default::default()
    }
}

/// Records everything it is handed.
pub struct Recorder {
    name: String,
    kind: ModuleKind,
    watched: Vec<EventType>,
    accept_dupes: bool,
    graph_trail: bool,
    pub seen: Arc<Mutex<Vec<Arc<Event>>>>,
    pub finished: Arc<AtomicUsize>,
    pub reports: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new(name: &str, kind: ModuleKind, watched: &[EventType]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            watched: watched.to_vec(),
            accept_dupes: false,
            graph_trail: false,
            seen: Arc::default(),
            finished: Arc::default(),
            reports: Arc::default(),
        }
    }

    pub fn output(name: &str) -> Self {
        Self::new(name, ModuleKind::Output, &EventType::ALL)
    }

    pub fn accepting_dupes(mut self) -> Self {
        self.accept_dupes = true;
        self
    }

    pub fn following_graph_trail(mut self) -> Self {
        self.graph_trail = true;
        self
    }

    pub fn handles(&self) -> RecorderHandles {
        RecorderHandles {
            seen: self.seen.clone(),
            finished: self.finished.clone(),
            reports: self.reports.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RecorderHandles {
    pub seen: Arc<Mutex<Vec<Arc<Event>>>>,
    pub finished: Arc<AtomicUsize>,
    pub reports: Arc<AtomicUsize>,
}

impl RecorderHandles {
    pub fn values(&self, event_type: EventType) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .map(|e| e.value().to_string())
            .collect()
    }

    pub fn find(&self, event_type: EventType, value: &str) -> Option<Arc<Event>> {
        self.seen
            .lock()
            .iter()
            .find(|e| e.event_type() == event_type && e.value() == value)
            .cloned()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn watched_events(&self) -> &[EventType] {
        &self.watched
    }

    fn accept_dupes(&self) -> bool {
        self.accept_dupes
    }

    fn emit_graph_trail(&self) -> bool {
        self.graph_trail
    }

    async fn handle_event(&self, _ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        self.seen.lock().push(event);
        Ok(())
    }

    async fn finish(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn report(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Emits a fixed list of events (each `repeat` times) for every target it sees.
pub struct Emitter {
    pub emits: Vec<(String, EventType)>,
    pub repeat: usize,
}

#[async_trait]
impl EventHandler for Emitter {
    fn name(&self) -> &str {
        "emitter"
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::DnsName]
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        if !event.has_tag("target") {
            return Ok(());
        }
        for _ in 0..self.repeat {
            for (value, event_type) in &self.emits {
                ctx.emit(value, *event_type, &event).await?;
            }
        }
        Ok(())
    }
}

/// Never finishes handling an event until the scan is stopped.
pub struct Stuck;

#[async_trait]
impl EventHandler for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::DnsName]
    }

    async fn handle_event(&self, ctx: &ModuleContext, _event: Arc<Event>) -> anyhow::Result<()> {
        ctx.scan().stop_token().cancelled().await;
        Ok(())
    }
}

/// Takes its time over every event and pays no attention to aborts.
pub struct Sleeper(pub Duration);

#[async_trait]
impl EventHandler for Sleeper {
    fn name(&self) -> &str {
        "sleeper"
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::DnsName]
    }

    async fn handle_event(&self, _ctx: &ModuleContext, _event: Arc<Event>) -> anyhow::Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Cannot be set up.
pub struct BadSetup;

#[async_trait]
impl EventHandler for BadSetup {
    fn name(&self) -> &str {
        "bad_setup"
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::DnsName]
    }

    async fn setup(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        anyhow::bail!("missing API key")
    }

    async fn handle_event(&self, _ctx: &ModuleContext, _event: Arc<Event>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Takes DNS names in batches and remembers how far along it was at report time.
pub struct Batcher {
    pub size: usize,
    pub wait: Duration,
    pub batches: Arc<Mutex<Vec<Vec<String>>>>,
    pub handled_at_report: Arc<AtomicUsize>,
    pub reports: Arc<AtomicUsize>,
}

impl Batcher {
    pub fn new(size: usize, wait: Duration) -> Self {
        Self {
            size,
            wait,
            batches: Arc::default(),
            handled_at_report: Arc::default(),
            reports: Arc::default(),
        }
    }

    pub fn handled(batches: &Mutex<Vec<Vec<String>>>) -> usize {
        batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventHandler for Batcher {
    fn name(&self) -> &str {
        "batcher"
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::DnsName]
    }

    fn batch_size(&self) -> usize {
        self.size
    }

    fn batch_wait(&self) -> Duration {
        self.wait
    }

    async fn handle_event(&self, _ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        self.batches.lock().push(vec![event.value().to_string()]);
        Ok(())
    }

    async fn handle_batch(&self, _ctx: &ModuleContext, events: Vec<Arc<Event>>) -> anyhow::Result<()> {
        self.batches
            .lock()
            .push(events.iter().map(|e| e.value().to_string()).collect());
        Ok(())
    }

    async fn report(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.handled_at_report
            .store(Self::handled(&self.batches), Ordering::SeqCst);
        self.reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub const SCAN_TIMEOUT: Duration = Duration::from_secs(20);
