pub mod async_writer;

pub use async_writer::spawn_jsonl_writer;

use crate::event::Event;

/// One line per event: `[TYPE]  value  module  tags`.
pub fn format_human(event: &Event) -> String {
    let tags = event.tags().into_iter().collect::<Vec<_>>().join(", ");
    format!("[{}]\t{}\t{}\t{}", event.event_type(), event.value(), event.module(), tags)
}
