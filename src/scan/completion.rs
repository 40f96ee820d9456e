use std::collections::BTreeMap;

use serde::Serialize;

use crate::concurrent::QueuedTasks;
use crate::modules::ModuleStatus;

use super::{Scan, ScanStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ScanSnapshot {
    pub status: ScanStatus,
    /// Events waiting on the central queue, under `"manager"`.
    pub queued_events: BTreeMap<&'static str, usize>,
    pub queued_tasks: QueuedTasks,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionStatus {
    pub modules: BTreeMap<String, ModuleStatus>,
    pub scan: ScanSnapshot,
    pub finished: bool,
    pub modules_errored: usize,
}

impl Scan {
    /// Pool and central-queue counters. Pools are read before the queue: a
    /// pipeline run queues its event before its pool slot is released.
    pub fn status_detailed(&self) -> ScanSnapshot {
        let queued_tasks = self.pools().queued_tasks();
        let mut queued_events = BTreeMap::new();
        queued_events.insert("manager", self.event_queue().len());
        ScanSnapshot {
            status: self.status(),
            queued_events,
            queued_tasks,
        }
    }

    /// Decide whether the scan has gone quiet.
    ///
    /// An idle reading is only trusted after `passes` consecutive idle
    /// readings spaced one poll interval apart (`completion_passes` when
    /// `None`). Any busy reading returns at once with `finished = false`.
    pub async fn modules_status(&self, log: bool, passes: Option<usize>) -> CompletionStatus {
        let passes = passes.unwrap_or(self.config().completion_passes).max(1);
        let mut pass = 0;
        let (modules, scan, finished) = loop {
            pass += 1;
            // modules, then pools, then the queue: work only ever moves downstream
            let modules: BTreeMap<String, ModuleStatus> =
                self.modules().iter().map(|m| (m.name().to_string(), m.status())).collect();
            let scan = self.status_detailed();

            let mut finished = modules.values().all(ModuleStatus::is_idle);
            finished &= scan.queued_tasks.total == 0;
            finished &= scan.queued_events.values().all(|n| *n == 0);

            for module in self.modules() {
                if module.errored() && module.has_live_queue() {
                    module.set_error_state();
                }
            }

            if finished && pass < passes {
                tokio::time::sleep(self.config().poll_interval()).await;
            } else {
                break (modules, scan, finished);
            }
        };

        let modules_errored = modules.values().filter(|s| s.errored).count();
        let status = CompletionStatus {
            modules,
            scan,
            finished,
            modules_errored,
        };
        if log {
            self.log_status(&status);
        }
        status
    }

    fn log_status(&self, status: &CompletionStatus) {
        let mut busiest: Vec<(&str, usize, usize, usize)> = status
            .modules
            .iter()
            .map(|(name, s)| (name.as_str(), s.events.incoming, s.tasks.total, s.events.outgoing))
            .filter(|(_, i, t, o)| i + t + o > 0)
            .collect();
        busiest.sort_by(|a, b| (b.1 + b.2 + b.3).cmp(&(a.1 + a.2 + a.3)));
        busiest.truncate(5);
        if !busiest.is_empty() {
            let summary = busiest
                .iter()
                .map(|(m, i, t, o)| format!("{}({}:{}:{})", m, i, t, o))
                .collect::<Vec<_>>()
                .join(", ");
            tracing::info!("Modules: {}", summary);
        }

        let types = self
            .event_queue()
            .type_summary()
            .iter()
            .map(|(t, n)| format!("{}: {}", t, n))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!("Events: {}", types);

        let tasks = &status.scan.queued_tasks;
        tracing::debug!(
            "Task pools: {} (Main: {}, Event: {} waiting, {} in queue, DNS: {}, Internal: {})",
            tasks.total,
            tasks.main,
            tasks.event,
            status.scan.queued_events.get("manager").copied().unwrap_or(0),
            tasks.dns,
            tasks.internal
        );

        if status.modules_errored > 0 {
            let errored: Vec<&str> = status
                .modules
                .iter()
                .filter(|(_, s)| s.errored)
                .map(|(m, _)| m.as_str())
                .collect();
            tracing::debug!("Modules errored: {} ({})", errored.len(), errored.join(", "));
        }
    }
}
