use std::time::Duration;

use dashmap::DashMap;

use crate::event::{Event, EventType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub calls: u64,
    pub total: Duration,
}

/// Statistics sink for a scan.
#[derive(Debug, Default)]
pub struct ScanStats {
    emitted: DashMap<(String, EventType), u64>,
    produced: DashMap<(String, EventType), u64>,
    calls: DashMap<String, CallStats>,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// The event made it through the pipeline onto the central queue.
    pub fn event_emitted(&self, event: &Event) {
        *self
            .emitted
            .entry((event.module().name().to_string(), event.event_type()))
            .or_insert(0) += 1;
    }

    /// The event was handed to at least one output module.
    pub fn event_produced(&self, event: &Event) {
        *self
            .produced
            .entry((event.module().name().to_string(), event.event_type()))
            .or_insert(0) += 1;
    }

    pub fn function_called(&self, name: &str, elapsed: Duration) {
        let mut entry = self.calls.entry(name.to_string()).or_default();
        entry.calls += 1;
        entry.total += elapsed;
    }

    pub fn emitted(&self, module: &str, event_type: EventType) -> u64 {
        self.emitted.get(&(module.to_string(), event_type)).map(|v| *v).unwrap_or(0)
    }

    pub fn produced(&self, module: &str, event_type: EventType) -> u64 {
        self.produced.get(&(module.to_string(), event_type)).map(|v| *v).unwrap_or(0)
    }

    pub fn emitted_total(&self) -> u64 {
        self.emitted.iter().map(|e| *e.value()).sum()
    }

    pub fn produced_total(&self) -> u64 {
        self.produced.iter().map(|e| *e.value()).sum()
    }

    pub fn calls(&self, name: &str) -> CallStats {
        self.calls.get(name).map(|c| *c).unwrap_or_default()
    }

    /// `(module, produced, emitted)` per module, most productive first.
    pub fn module_summary(&self) -> Vec<(String, u64, u64)> {
        let mut per_module: ahash::AHashMap<String, (u64, u64)> = ahash::AHashMap::new();
        for entry in self.produced.iter() {
            per_module.entry(entry.key().0.clone()).or_default().0 += *entry.value();
        }
        for entry in self.emitted.iter() {
            per_module.entry(entry.key().0.clone()).or_default().1 += *entry.value();
        }
        let mut summary: Vec<(String, u64, u64)> = per_module.into_iter().map(|(m, (p, e))| (m, p, e)).collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)).then_with(|| a.0.cmp(&b.0)));
        summary
    }

    /// Slowest callbacks by cumulative time.
    pub fn slowest_calls(&self, n: usize) -> Vec<(String, CallStats)> {
        let mut calls: Vec<(String, CallStats)> = self.calls.iter().map(|e| (e.key().clone(), *e.value())).collect();
        calls.sort_by(|a, b| b.1.total.cmp(&a.1.total));
        calls.truncate(n);
        calls
    }
}
