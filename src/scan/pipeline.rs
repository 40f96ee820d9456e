//! Per-event state machine: precheck → resolve → classify → accept → queue →
//! speculate children.

use std::fmt;
use std::sync::Arc;

use crate::error::ScanError;
use crate::event::{Event, EventModule, EventType, TAG_BLACKLISTED, TAG_TARGET};

use super::{Scan, ScopeClassifier};

type AbortIf = Box<dyn Fn(&Event) -> bool + Send + Sync>;
type OnSuccess = Box<dyn FnOnce(&Arc<Event>) -> anyhow::Result<()> + Send>;

/// Options for [`Scan::emit_event`].
///
/// `quick` puts the event straight onto the central queue. On that path
/// `abort_if` and `on_success` are ignored.
#[derive(Default)]
pub struct EmitOptions {
    pub quick: bool,
    pub abort_if: Option<AbortIf>,
    pub on_success: Option<OnSuccess>,
}

impl EmitOptions {
    pub fn quick() -> Self {
        Self {
            quick: true,
            ..Default::default()
        }
    }

    pub fn abort_if(mut self, f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.abort_if = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(&Arc<Event>) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for EmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitOptions")
            .field("quick", &self.quick)
            .field("abort_if", &self.abort_if.is_some())
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

/// Releases the permit and fires the completion signal of one event when
/// dropped, whichever way its pipeline run ends.
struct Finalizer {
    scan: Arc<Scan>,
    event: Arc<Event>,
    emitted: bool,
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        if self.emitted {
            self.scan.stats().event_emitted(&self.event);
        }
        self.event.release_permit();
        self.event.resolved().set();
        tracing::debug!("{}.emit_event() finished for {}", self.event.module(), self.event);
    }
}

impl Scan {
    /// Hand an event to the pipeline.
    ///
    /// Returns `false` if it was rejected before any work was scheduled. The
    /// event's permit and completion signal are settled in every case.
    pub fn emit_event(self: &Arc<Self>, event: Arc<Event>, options: EmitOptions) -> bool {
        let mut finalizer = Finalizer {
            scan: self.clone(),
            event: event.clone(),
            emitted: false,
        };
        if !self.event_precheck(&event) {
            return false;
        }

        if options.quick {
            if options.abort_if.is_some() || options.on_success.is_some() {
                tracing::debug!("Ignoring abort_if/on_success for quick emission of {}", event);
            }
            finalizer.emitted = self.queue_event(event);
            return finalizer.emitted;
        }

        // keep the parent alive until this run has waited on it
        let source = event.source();
        let scan = self.clone();
        let task = async move {
            let mut finalizer = finalizer;
            let run = scan.run_pipeline(&mut finalizer, source, options);
            scan.catch("emit_event", false, run).await;
        };
        match self.pools().event.submit_task(task) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Could not emit {}: {}", event, e);
                false
            }
        }
    }

    /// Cheap checks that can spare an event the full pipeline.
    fn event_precheck(&self, event: &Event) -> bool {
        if event.is_dummy() {
            tracing::warn!("Cannot emit dummy event: {}", event);
            return false;
        }
        if event.is_own_source() {
            tracing::debug!("Skipping event with self as source: {}", event);
            return false;
        }
        // names still have to go through DNS before they can be judged
        if event.event_type() != EventType::DnsName {
            if self.is_duplicate_event(event, false) {
                tracing::debug!("Skipping {} because it is a duplicate", event);
                return false;
            }
            let any_acceptable = self.modules().iter().any(|m| m.filter_event(event, true).0);
            if !any_acceptable {
                tracing::debug!("Skipping {} because no modules would accept it", event);
            }
            return any_acceptable;
        }
        true
    }

    async fn run_pipeline(
        self: &Arc<Self>,
        finalizer: &mut Finalizer,
        source: Option<Arc<Event>>,
        options: EmitOptions,
    ) -> anyhow::Result<()> {
        let event = finalizer.event.clone();
        if self.stopping() {
            return Err(ScanError::Cancelled.into());
        }
        tracing::debug!("Module \"{}\" raised {}", event.module(), event);

        let mut emit = true;
        let mut dns_children = Vec::new();
        let skip_dns =
            !self.config().dns_resolution && event.has_tag(TAG_TARGET) && self.scope().blacklist().is_empty();
        if !skip_dns {
            let resolution = self
                .pools()
                .dns
                .run(self.dns().resolve_event(&event, self.scope().whitelist(), self.scope().blacklist()))
                .await?;
            event.set_resolved_hosts(resolution.resolved_hosts);

            let whitelisted = resolution.whitelisted || self.scope().whitelisted(&event);
            let blacklisted = resolution.blacklisted || self.scope().blacklisted(&event);
            if event.event_type().absorbs_dns_tags() {
                event.add_tags(resolution.tags);
            }
            if blacklisted {
                event.add_tag(TAG_BLACKLISTED);
            }
            if event.has_tag(TAG_BLACKLISTED) {
                let reason = if resolution.blacklisted { "DNS associations" } else { "event host" };
                tracing::debug!("Omitting due to blacklisted {}: {}", reason, event);
                emit = false;
            }

            if !whitelisted || !event.has_tag(TAG_TARGET) {
                self.wait_for_source(&event, source.as_ref()).await?;
            }

            let is_duplicate = self.is_duplicate_event(&event, false);
            self.scope().shepherd(&event, whitelisted, is_duplicate);
            dns_children = resolution.children;
        }

        if let Some(abort_if) = &options.abort_if {
            if abort_if(&event) {
                tracing::debug!(
                    "{}: not raising event {} due to custom criteria in abort_if()",
                    event.module(),
                    event
                );
                return Ok(());
            }
        }

        if !self.accept_event(&event) {
            return Ok(());
        }

        if emit {
            finalizer.emitted = self.queue_event(event.clone());
            if finalizer.emitted {
                if let Some(on_success) = options.on_success {
                    let cb_event = event.clone();
                    self.catch("on_success", false, async move { on_success(&cb_event) })
                        .await;
                }
            }
        }

        self.emit_children(&event, dns_children);
        Ok(())
    }

    /// Block until the parent's run has finished, then sit one hop beyond it.
    async fn wait_for_source(&self, event: &Event, source: Option<&Arc<Event>>) -> Result<(), ScanError> {
        let Some(source) = source else {
            return Ok(());
        };
        let poll = self.config().poll_interval();
        loop {
            if self.stopping() {
                return Err(ScanError::Cancelled);
            }
            tokio::select! {
                _ = self.stop_token().cancelled() => return Err(ScanError::Cancelled),
                resolved = source.resolved().wait_timeout(poll) => {
                    if resolved {
                        break;
                    }
                }
            }
        }
        event.set_scope_distance(ScopeClassifier::child_distance(source.scope_distance()));
        Ok(())
    }

    /// Schedule host speculation and DNS-record children. Each child gets its
    /// own pipeline run on the event pool.
    fn emit_children(self: &Arc<Self>, event: &Arc<Event>, dns_children: Vec<(String, crate::dns::DnsRecordType)>) {
        let distance = event.scope_distance();
        if !self.scope().spawns_dns_children(distance) {
            return;
        }

        let mut source_event = event.clone();
        if let Some(host) = event.host() {
            if !event.event_type().is_host_type() {
                match self.make_event(host, EventType::DnsName, EventModule::host(), event) {
                    Ok(speculated) => {
                        speculated.set_scope_distance(distance);
                        if event.has_tag(TAG_TARGET) {
                            speculated.add_tag(TAG_TARGET);
                        }
                        let speculated = Arc::new(speculated);
                        if event.module().name() == "speculate" {
                            // never emitted, so nothing else will settle it
                            speculated.resolved().set();
                        } else {
                            self.emit_event(speculated.clone(), EmitOptions::default());
                        }
                        source_event = speculated;
                    }
                    Err(e) => tracing::warn!("Could not speculate host of {}: {}", event, e),
                }
            }
        }

        if !self.config().dns_resolution {
            return;
        }
        for (record, rdtype) in dns_children {
            match self.make_event(&record, EventType::DnsName, EventModule::dns(rdtype.as_str()), &source_event) {
                Ok(child) => {
                    self.emit_event(Arc::new(child), EmitOptions::default());
                }
                Err(e) => tracing::warn!(
                    "Event validation failed for DNS child of {}: \"{}\" ({}): {}",
                    source_event,
                    record,
                    rdtype,
                    e
                ),
            }
        }
    }

    /// Whether `event` was already accepted from the same producer. With
    /// `add`, registers it in the same atomic step.
    pub fn is_duplicate_event(&self, event: &Event, add: bool) -> bool {
        let hash = self.identity.accept_hash(event);
        let seen = if add {
            !self.accepted.insert(hash)
        } else {
            self.accepted.contains(hash)
        };
        event.module().suppress_dupes() && seen && !event.force_output()
    }

    pub fn accept_event(&self, event: &Event) -> bool {
        if self.is_duplicate_event(event, true) {
            tracing::debug!("{}: not raising duplicate event {}", event.module(), event);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::StaticResolver;
    use crate::event::ModuleKind;

    fn scan() -> Arc<Scan> {
        Scan::builder("pipeline")
            .targets(["example.com"])
            .resolver(Arc::new(StaticResolver::default()))
            .build()
            .unwrap()
    }

    fn ip_event(scan: &Scan, module: &str) -> Arc<Event> {
        Arc::new(
            scan.make_event("1.2.3.4", EventType::IpAddress, EventModule::new(module, ModuleKind::Scan), scan.root_event())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn accept_rejects_repeats_from_same_module() {
        let scan = scan();
        assert!(scan.accept_event(&ip_event(&scan, "a")));
        assert!(!scan.accept_event(&ip_event(&scan, "a")));
        assert!(scan.accept_event(&ip_event(&scan, "b")));
    }

    #[tokio::test]
    async fn forced_output_bypasses_dedup() {
        let scan = scan();
        assert!(scan.accept_event(&ip_event(&scan, "a")));
        let forced = ip_event(&scan, "a");
        forced.set_force_output(true);
        assert!(scan.accept_event(&forced));
    }

    #[tokio::test]
    async fn modules_without_dupe_suppression_repeat() {
        let scan = scan();
        let module = EventModule::new("a", ModuleKind::Scan).with_suppress_dupes(false);
        let make = || scan.make_event("1.2.3.4", EventType::IpAddress, module.clone(), scan.root_event()).unwrap();
        assert!(scan.accept_event(&make()));
        assert!(scan.accept_event(&make()));
    }

    #[tokio::test]
    async fn precheck_rejection_settles_event() {
        let scan = scan();
        // no modules registered, so nothing would accept an IP
        let e = ip_event(&scan, "a");
        assert!(!scan.emit_event(e.clone(), EmitOptions::default()));
        assert!(e.is_resolved());
        assert!(scan.event_queue().is_empty());

        let dummy = Arc::new(
            scan.make_event("x.example.com", EventType::DnsName, EventModule::target(), scan.root_event())
                .unwrap()
                .into_dummy(),
        );
        assert!(!scan.emit_event(dummy.clone(), EmitOptions::default()));
        assert!(dummy.is_resolved());
    }

    #[tokio::test]
    async fn quick_path_queues_immediately() {
        let scan = scan();
        let e = Arc::new(
            scan.make_event("api.example.com", EventType::DnsName, EventModule::target(), scan.root_event())
                .unwrap(),
        );
        assert!(scan.emit_event(e.clone(), EmitOptions::quick().on_success(|_| anyhow::bail!("never called"))));
        assert!(e.is_resolved());
        assert_eq!(scan.event_queue().len(), 1);
        assert_eq!(scan.stats().emitted("TARGET", EventType::DnsName), 1);
    }
}
