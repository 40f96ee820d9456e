use std::sync::Arc;

use crate::event::{Event, EventType, ModuleKind};
use crate::modules::ModuleMessage;

use super::Scan;

impl Scan {
    /// Fan one dequeued event out to every interested module.
    ///
    /// Repeats of an already distributed `TYPE:value` only go to modules that
    /// accept duplicates. Output modules get events within report distance
    /// (or forced ones, if they follow graph trails); everything else gets
    /// events within search distance.
    pub fn distribute_event(&self, event: Arc<Event>) {
        let is_duplicate = !self.distributed.insert(self.identity.distribution_hash(&event));
        if is_duplicate {
            tracing::debug!("{}: Duplicate event: {}", event.module(), event);
        }

        let distance = event.scope_distance();
        if !is_duplicate && distance == 0 && event.event_type() != EventType::Scan {
            self.word_cloud().absorb_event(&event);
        }

        let within_search = self.scope().in_search_distance(distance);
        let within_report = self.scope().in_report_distance(distance);
        let mut produced = false;
        for module in self.modules() {
            if is_duplicate && !module.accept_dupes() {
                continue;
            }
            if module.kind() == ModuleKind::Output {
                if within_report || (event.force_output() && module.emit_graph_trail()) {
                    module.queue_event(ModuleMessage::Event(event.clone()));
                    if !produced {
                        produced = true;
                        self.stats().event_produced(&event);
                    }
                }
            } else if within_search {
                module.queue_event(ModuleMessage::Event(event.clone()));
            }
        }
    }
}
