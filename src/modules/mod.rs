//! Worker modules: the capability set the scan core talks to, the queued
//! runtime that implements it for an [`EventHandler`], and the built-ins.

pub mod base;
pub mod crtsh;
pub mod human;
pub mod jsonl;
pub mod speculate;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::event::Event;
use crate::scan::Scan;

pub use crate::event::ModuleKind;
pub use base::{EventHandler, ModuleContext, QueuedModule};

/// What travels through a module's inbound queue.
#[derive(Debug, Clone)]
pub enum ModuleMessage {
    Event(Arc<Event>),
    /// The scan went idle after producing new events this round.
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub incoming: usize,
    pub outgoing: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub running: bool,
    pub errored: bool,
    pub events: EventCounts,
    pub tasks: TaskCounts,
}

impl ModuleStatus {
    pub fn is_idle(&self) -> bool {
        !self.running && self.events.incoming == 0 && self.events.outgoing == 0 && self.tasks.total == 0
    }
}

/// A pluggable worker, as seen by the dispatcher and the completion detector.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ModuleKind;
    fn accept_dupes(&self) -> bool;
    /// Output modules only: also take forced events beyond report distance.
    fn emit_graph_trail(&self) -> bool;

    /// Whether the module wants `event`. With `precheck_only`, only the
    /// checks that hold before scope classification are applied.
    fn filter_event(&self, event: &Event, precheck_only: bool) -> (bool, String);

    /// Returns `false` if the message was filtered out or the queue is closed.
    fn queue_event(&self, message: ModuleMessage) -> bool;
    fn status(&self) -> ModuleStatus;
    fn errored(&self) -> bool;
    fn has_live_queue(&self) -> bool;
    /// Close the inbound queue and discard whatever is still in it.
    fn set_error_state(&self);
    /// Hand accumulated events to the handler now instead of waiting for a full batch.
    fn handle_batch(&self, force: bool);

    async fn start(&self, scan: Arc<Scan>) -> anyhow::Result<()>;
    async fn report(&self) -> anyhow::Result<()>;
    async fn shutdown(&self);
}

/// Settings the registry needs to build modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    /// Output directory for file-writing modules.
    pub output_dir: Option<PathBuf>,
}

pub const SCAN_MODULES: &[&str] = &["speculate", "crtsh"];
pub const OUTPUT_MODULES: &[&str] = &["human", "jsonl"];

/// Build a module by name.
pub fn load_module(name: &str, options: &ModuleOptions) -> anyhow::Result<Arc<dyn Module>> {
    let module = match name {
        "speculate" => QueuedModule::shared(speculate::Speculate::default()),
        "crtsh" => QueuedModule::shared(crtsh::Crtsh::new()?),
        "human" => QueuedModule::shared(human::Human::default()),
        "jsonl" => {
            let dir = options.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
            QueuedModule::shared(jsonl::Jsonl::new(dir.join("output.jsonl")))
        }
        other => anyhow::bail!(
            "unknown module \"{}\" (available: {}, {})",
            other,
            SCAN_MODULES.join(", "),
            OUTPUT_MODULES.join(", ")
        ),
    };
    Ok(module)
}
