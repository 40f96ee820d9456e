use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::TryRecvError;

use crate::error::ScanError;
use crate::modules::ModuleMessage;

use super::{EmitOptions, Scan, ScanStatus};

impl Scan {
    /// Run the scan to completion (or until `stop()`), then report and wind
    /// down every module.
    pub async fn run(self: &Arc<Self>) -> Result<ScanStatus, ScanError> {
        let stopped_early = {
            let mut status = self.status.write();
            match *status {
                ScanStatus::NotStarted => {
                    *status = ScanStatus::Starting;
                    false
                }
                // stop() before run(): nothing to start, straight to reporting
                ScanStatus::Aborting if self.event_queue().has_receiver() => true,
                _ => return Err(ScanError::Config(format!("scan {} was already started", self.name()))),
            }
        };
        if !stopped_early {
            for module in self.modules() {
                let name = format!("{}.setup", module.name());
                let scan = self.clone();
                if self.catch(&name, false, module.start(scan)).await.is_none() {
                    tracing::warn!("Module {} failed to start", module.name());
                }
            }
        }

        if !self.stopping() {
            self.set_status(ScanStatus::Running);
            self.init_events();
        }
        self.loop_until_finished().await;

        let final_status = if self.stopping() {
            ScanStatus::Aborted
        } else {
            ScanStatus::Finished
        };
        self.set_status(final_status);
        self.pools().shutdown();
        self.done_token().cancel();
        for module in self.modules() {
            module.shutdown().await;
        }
        tracing::info!("Scan {} completed with status {}", self.name(), final_status);
        Ok(final_status)
    }

    /// Seed the scan: the root event goes straight onto the central queue,
    /// targets go through the pipeline, then every module flushes its batch.
    pub fn init_events(self: &Arc<Self>) {
        self.queue_event(self.root_event().clone());
        for event in self.target().events() {
            tracing::debug!("Target: {}", event);
            self.emit_event(event.clone(), EmitOptions::default());
        }
        for module in self.modules() {
            module.handle_batch(true);
        }
    }

    /// Consume the central queue until the scan has quiesced or is aborting.
    pub async fn loop_until_finished(self: &Arc<Self>) {
        let Some(mut rx) = self.event_queue().take_receiver() else {
            tracing::error!("Event queue of scan {} is already being consumed", self.name());
            return;
        };
        self.hook.on_start(self);

        let poll = self.config().poll_interval();
        let status_frequency = self.config().status_frequency();
        let mut last_log = Instant::now();
        let mut event_counter: usize = 0;

        loop {
            if self.stopping() {
                let mut drained = 0;
                loop {
                    match rx.try_recv() {
                        Ok(_) => {
                            self.event_queue().mark_dequeued();
                            drained += 1;
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                tracing::debug!("Discarded {} queued events", drained);
                break;
            }

            if last_log.elapsed() > status_frequency {
                self.modules_status(true, Some(1)).await;
                last_log = Instant::now();
            }

            let received = tokio::select! {
                _ = self.stop_token().cancelled() => continue,
                received = tokio::time::timeout(poll, rx.recv()) => received,
            };
            match received {
                Ok(Some(event)) => {
                    self.event_queue().mark_dequeued();
                    event_counter += 1;
                    if self.status() == ScanStatus::Finishing {
                        self.set_status(ScanStatus::Running);
                    }
                    self.distribute_event(event);
                }
                Ok(None) => break,
                Err(_) => {
                    if !self.modules_status(false, None).await.finished {
                        continue;
                    }
                    if event_counter == 0 {
                        break;
                    }
                    // new work appeared since the last idle check: let modules finalize
                    self.set_status(ScanStatus::Finishing);
                    tracing::info!("Finishing scan");
                    for module in self.modules() {
                        module.queue_event(ModuleMessage::Finished);
                    }
                    event_counter = 0;
                }
            }
        }

        for module in self.modules() {
            let name = format!("{}.report", module.name());
            self.catch(&name, true, module.report()).await;
        }
    }
}
