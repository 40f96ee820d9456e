use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use crate::event::{Event, EventType};
use crate::output::format_human;

use super::{EventHandler, ModuleContext, ModuleKind};

/// Prints every reported event to stdout.
#[derive(Default)]
pub struct Human;

#[async_trait]
impl EventHandler for Human {
    fn name(&self) -> &str {
        "human"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Output
    }

    fn watched_events(&self) -> &[EventType] {
        &EventType::ALL
    }

    fn filter_event(&self, event: &Event) -> Result<(), String> {
        if event.event_type() == EventType::Scan {
            return Err("the scan event is not printed".into());
        }
        Ok(())
    }

    async fn handle_event(&self, _ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        let line = format_human(&event);
        writeln!(std::io::stdout().lock(), "{}", line)?;
        Ok(())
    }
}
