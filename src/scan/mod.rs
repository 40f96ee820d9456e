//! The scan context and its event orchestration core.
//!
//! Events flow: module → [`Scan::emit_event`] (pipeline, on the event pool)
//! → central queue → driver loop → [`Scan::distribute_event`] → module queues.
//! The driver polls [`Scan::modules_status`] whenever the central queue is
//! idle to decide whether the scan has quiesced.

pub mod completion;
pub mod dispatcher;
pub mod driver;
pub mod hooks;
pub mod ledger;
pub mod pipeline;
pub mod queue;
pub mod scope;
pub mod stats;
pub mod status;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::concurrent::ScanPools;
use crate::config::ScanConfig;
use crate::dns::{DnsHelper, DnsResolver, HickoryResolver};
use crate::error::ScanError;
use crate::event::{Event, EventModule, EventType};
use crate::modules::Module;
use crate::target::{ScopeList, Target};
use crate::word_cloud::WordCloud;

pub use completion::{CompletionStatus, ScanSnapshot};
pub use hooks::{DispatcherHook, LoggingHook};
pub use ledger::{DedupLedger, IdentityHasher};
pub use pipeline::EmitOptions;
pub use queue::EventQueue;
pub use scope::ScopeClassifier;
pub use stats::ScanStats;
pub use status::ScanStatus;

pub struct Scan {
    name: String,
    config: ScanConfig,
    status: RwLock<ScanStatus>,
    stop_token: CancellationToken,
    done_token: CancellationToken,
    root_event: Arc<Event>,
    target: Target,
    scope: ScopeClassifier,
    modules: Vec<Arc<dyn Module>>,
    pools: ScanPools,
    stats: ScanStats,
    word_cloud: WordCloud,
    dns: DnsHelper,
    hook: Box<dyn DispatcherHook>,
    queue: EventQueue,
    accepted: DedupLedger,
    distributed: DedupLedger,
    identity: IdentityHasher,
}

impl Scan {
    pub fn builder(name: &str) -> ScanBuilder {
        ScanBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn status(&self) -> ScanStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: ScanStatus) {
        let mut current = self.status.write();
        if *current != status {
            tracing::debug!(scan = %self.name, from = %*current, to = %status, "Scan status changed");
            *current = status;
        }
    }

    /// Request an abort. Every suspension point observes this promptly.
    pub fn stop(&self) {
        {
            let mut status = self.status.write();
            if !status.is_done() {
                *status = ScanStatus::Aborting;
            }
        }
        if !self.stop_token.is_cancelled() {
            tracing::info!("Aborting scan {}", self.name);
        }
        self.stop_token.cancel();
    }

    pub fn stopping(&self) -> bool {
        self.stop_token.is_cancelled() || self.status().is_stopping()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop_token
    }

    /// Cancelled once `run()` has returned. Module workers exit on it.
    pub fn done_token(&self) -> &CancellationToken {
        &self.done_token
    }

    pub fn root_event(&self) -> &Arc<Event> {
        &self.root_event
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn scope(&self) -> &ScopeClassifier {
        &self.scope
    }

    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    pub fn pools(&self) -> &ScanPools {
        &self.pools
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn word_cloud(&self) -> &WordCloud {
        &self.word_cloud
    }

    pub fn dns(&self) -> &DnsHelper {
        &self.dns
    }

    pub fn event_queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn accepted_ledger(&self) -> &DedupLedger {
        &self.accepted
    }

    pub fn distributed_ledger(&self) -> &DedupLedger {
        &self.distributed
    }

    pub fn make_event(
        &self,
        value: &str,
        event_type: EventType,
        module: EventModule,
        source: &Arc<Event>,
    ) -> Result<Event, ScanError> {
        Event::new(value, event_type, module, Some(source))
    }

    /// Put an event on the central queue.
    pub fn queue_event(&self, event: Arc<Event>) -> bool {
        self.queue.push(event)
    }

    /// Run `fut`, making sure nothing it does escapes.
    ///
    /// Skipped while the scan is stopping unless `force` is set. Cancellation
    /// and broken pipes are logged at debug, other errors and panics at error
    /// level. The call's duration is recorded either way.
    pub async fn catch<T, F>(&self, name: &str, force: bool, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let start = Instant::now();
        let mut out = None;
        if !self.stopping() || force {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => out = Some(value),
                Ok(Err(e)) => log_callback_error(name, &e),
                Err(panic) => tracing::error!("Panic in {}(): {}", name, panic_message(&*panic)),
            }
        }
        self.stats.function_called(name, start.elapsed());
        out
    }

    /// Like [`Scan::catch`], then run `on_finish` whatever the outcome (also
    /// when the call was skipped). A failing `on_finish` is logged on its own.
    pub async fn catch_then<T, F, C>(&self, name: &str, force: bool, fut: F, on_finish: C) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
        C: FnOnce() -> anyhow::Result<()>,
    {
        let out = self.catch(name, force, fut).await;
        match std::panic::catch_unwind(AssertUnwindSafe(on_finish)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Error in on_finish callback after {}(): {}", name, e);
                tracing::debug!("{:?}", e);
            }
            Err(panic) => tracing::error!("Panic in on_finish callback after {}(): {}", name, panic_message(&*panic)),
        }
        out
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn log_callback_error(name: &str, e: &anyhow::Error) {
    match e.downcast_ref::<ScanError>() {
        Some(ScanError::Cancelled) => {
            tracing::debug!("ScanCancelled in {}()", name);
            return;
        }
        Some(ScanError::PoolShutdown(pool)) => {
            tracing::debug!("{} pool shut down during {}()", pool, name);
            return;
        }
        Some(se) if se.is_broken_pipe() => {
            tracing::debug!("BrokenPipe in {}(): {}", name, se);
            return;
        }
        _ => {}
    }
    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        if io.kind() == std::io::ErrorKind::BrokenPipe {
            tracing::debug!("BrokenPipe in {}(): {}", name, io);
            return;
        }
    }
    tracing::error!("Error in {}(): {}", name, e);
    tracing::debug!("{:?}", e);
}

pub struct ScanBuilder {
    name: String,
    config: ScanConfig,
    targets: Vec<String>,
    whitelist: Option<Vec<String>>,
    blacklist: Vec<String>,
    modules: Vec<Arc<dyn Module>>,
    resolver: Option<Arc<dyn DnsResolver>>,
    hook: Option<Box<dyn DispatcherHook>>,
}

impl ScanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: ScanConfig::default(),
            targets: Vec::new(),
            whitelist: None,
            blacklist: Vec::new(),
            modules: Vec::new(),
            resolver: None,
            hook: None,
        }
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Defaults to the targets themselves.
    pub fn whitelist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = Some(entries.into_iter().map(Into::into).collect());
        self
    }

    pub fn blacklist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn hook(mut self, hook: Box<dyn DispatcherHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn build(self) -> Result<Arc<Scan>, ScanError> {
        self.config.validate()?;
        let mut seen = std::collections::HashSet::new();
        for m in &self.modules {
            if !seen.insert(m.name().to_string()) {
                return Err(ScanError::Config(format!("module \"{}\" registered twice", m.name())));
            }
        }

        let root_event = Arc::new(Event::root(&self.name));
        let target = Target::new(&root_event, &self.targets)?;
        let whitelist = match &self.whitelist {
            Some(entries) => ScopeList::from_entries(entries)?,
            None => target.scope().clone(),
        };
        let blacklist = ScopeList::from_entries(&self.blacklist)?;
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(HickoryResolver::from_system_conf().unwrap_or_default()));

        Ok(Arc::new(Scan {
            scope: ScopeClassifier::new(whitelist, blacklist, &self.config),
            pools: ScanPools::from_config(&self.config),
            name: self.name,
            config: self.config,
            status: RwLock::new(ScanStatus::NotStarted),
            stop_token: CancellationToken::new(),
            done_token: CancellationToken::new(),
            root_event,
            target,
            modules: self.modules,
            stats: ScanStats::new(),
            word_cloud: WordCloud::new(),
            dns: DnsHelper::new(resolver),
            hook: self.hook.unwrap_or_else(|| Box::new(LoggingHook)),
            queue: EventQueue::new(),
            accepted: DedupLedger::new(),
            distributed: DedupLedger::new(),
            identity: IdentityHasher::new(),
        }))
    }
}
