use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{Event, EventRecord, EventType};
use crate::output::spawn_jsonl_writer;

use super::{EventHandler, ModuleContext, ModuleKind};

/// Streams events to a JSON-lines file through a background writer.
///
/// Follows graph trails, so forced events beyond report distance are written
/// too and every line's `source` can be resolved within the file.
pub struct Jsonl {
    path: PathBuf,
    tx: Mutex<Option<mpsc::Sender<EventRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Jsonl {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            tx: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl EventHandler for Jsonl {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Output
    }

    fn watched_events(&self) -> &[EventType] {
        &EventType::ALL
    }

    fn emit_graph_trail(&self) -> bool {
        true
    }

    async fn setup(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let (tx, rx) = mpsc::channel(1024);
        *self.writer.lock() = Some(spawn_jsonl_writer(self.path.clone(), rx));
        *self.tx.lock() = Some(tx);
        tracing::info!("Writing events to {}", self.path.display());
        Ok(())
    }

    async fn handle_event(&self, _ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            tx.send(event.to_record()).await?;
        }
        Ok(())
    }

    /// Close the writer and wait until everything is on disk.
    async fn report(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.tx.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.await?;
        }
        Ok(())
    }
}
