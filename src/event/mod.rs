//! Discovery events and the identity of the modules that produce them.

pub mod signal;
pub mod types;
pub(crate) mod validators;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::ScanError;
pub use signal::{EventPermit, ResolvedSignal};
pub use types::EventType;

pub const TAG_TARGET: &str = "target";
pub const TAG_BLACKLISTED: &str = "blacklisted";
pub const TAG_INTERNAL: &str = "internal";
pub const TAG_IN_SCOPE: &str = "in-scope";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Scan,
    Output,
    Internal,
    /// Synthetic producer of DNS-record children.
    Dns,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Scan => "scan",
            ModuleKind::Output => "output",
            ModuleKind::Internal => "internal",
            ModuleKind::Dns => "DNS",
        }
    }
}

/// Identity of the module an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventModule {
    name: Arc<str>,
    kind: ModuleKind,
    suppress_dupes: bool,
}

impl EventModule {
    pub fn new(name: &str, kind: ModuleKind) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            suppress_dupes: true,
        }
    }

    pub fn with_suppress_dupes(mut self, suppress_dupes: bool) -> Self {
        self.suppress_dupes = suppress_dupes;
        self
    }

    /// Producer of children found through a DNS record of type `rdtype`.
    pub fn dns(rdtype: &str) -> Self {
        Self::new(rdtype, ModuleKind::Dns)
    }

    /// Producer of DNS_NAME events speculated from another event's host.
    pub fn host() -> Self {
        Self::new("host", ModuleKind::Internal)
    }

    pub fn target() -> Self {
        Self::new("TARGET", ModuleKind::Internal)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn suppress_dupes(&self) -> bool {
        self.suppress_dupes
    }
}

impl fmt::Display for EventModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A discovered asset.
///
/// Type, value, producer and lineage are fixed at construction. Tags, scope
/// distance, resolved hosts, the completion signal and the permit are mutated
/// by the pipeline while the event is in flight.
pub struct Event {
    id: String,
    event_type: EventType,
    value: String,
    host: Option<String>,
    module: EventModule,
    source: Weak<Event>,
    source_id: Option<String>,
    timestamp: DateTime<Utc>,
    scope_distance: AtomicI32,
    tags: Mutex<BTreeSet<String>>,
    resolved_hosts: Mutex<BTreeSet<String>>,
    force_output: AtomicBool,
    dummy: bool,
    resolved: ResolvedSignal,
    permit: EventPermit,
}

impl Event {
    /// Validate `value` as `event_type` and build an event whose scope distance
    /// starts one hop beyond its source.
    pub fn new(
        value: &str,
        event_type: EventType,
        module: EventModule,
        source: Option<&Arc<Event>>,
    ) -> Result<Self, ScanError> {
        let v = validators::validate(event_type, value)?;
        let scope_distance = match source {
            Some(s) if s.scope_distance() >= 0 => s.scope_distance() + 1,
            _ => -1,
        };
        Ok(Self {
            id: format!("{}:{}", v.event_type, v.value),
            event_type: v.event_type,
            value: v.value,
            host: v.host,
            module,
            source: source.map(Arc::downgrade).unwrap_or_default(),
            source_id: source.map(|s| s.id.clone()),
            timestamp: Utc::now(),
            scope_distance: AtomicI32::new(scope_distance),
            tags: Mutex::new(BTreeSet::new()),
            resolved_hosts: Mutex::new(BTreeSet::new()),
            force_output: AtomicBool::new(false),
            dummy: false,
            resolved: ResolvedSignal::new(),
            permit: EventPermit::default(),
        })
    }

    /// The synthetic event every lineage starts from. In scope and already resolved.
    pub fn root(scan_name: &str) -> Self {
        let event = Self {
            id: format!("{}:{}", EventType::Scan, scan_name),
            event_type: EventType::Scan,
            value: scan_name.to_string(),
            host: None,
            module: EventModule::target(),
            source: Weak::new(),
            source_id: None,
            timestamp: Utc::now(),
            scope_distance: AtomicI32::new(0),
            tags: Mutex::new(BTreeSet::new()),
            resolved_hosts: Mutex::new(BTreeSet::new()),
            force_output: AtomicBool::new(false),
            dummy: false,
            resolved: ResolvedSignal::new(),
            permit: EventPermit::default(),
        };
        event.make_in_scope(0);
        event.resolved.set();
        event
    }

    pub fn with_tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_tags(tags);
        self
    }

    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = EventPermit::new(Some(permit));
        self
    }

    pub fn with_force_output(self, force: bool) -> Self {
        self.set_force_output(force);
        self
    }

    /// Mark as a placeholder used only for filter checks. Dummy events are never emitted.
    pub fn into_dummy(mut self) -> Self {
        self.dummy = true;
        self
    }

    /// Intrinsic identity: `TYPE:value`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn module(&self) -> &EventModule {
        &self.module
    }

    /// The parent, while something else still holds it.
    pub fn source(&self) -> Option<Arc<Event>> {
        self.source.upgrade()
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn is_own_source(&self) -> bool {
        self.source_id.as_deref() == Some(self.id.as_str())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn scope_distance(&self) -> i32 {
        self.scope_distance.load(Ordering::SeqCst)
    }

    pub fn set_scope_distance(&self, distance: i32) {
        self.scope_distance.store(distance, Ordering::SeqCst);
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.tags.lock().clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.lock().contains(tag)
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        self.tags.lock().insert(tag.into());
    }

    pub fn add_tags<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.tags.lock();
        current.extend(tags.into_iter().map(Into::into));
    }

    pub fn remove_tag(&self, tag: &str) -> bool {
        self.tags.lock().remove(tag)
    }

    pub fn resolved_hosts(&self) -> BTreeSet<String> {
        self.resolved_hosts.lock().clone()
    }

    pub fn set_resolved_hosts(&self, hosts: BTreeSet<String>) {
        *self.resolved_hosts.lock() = hosts;
    }

    pub fn force_output(&self) -> bool {
        self.force_output.load(Ordering::SeqCst)
    }

    pub fn set_force_output(&self, force: bool) {
        self.force_output.store(force, Ordering::SeqCst);
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn resolved(&self) -> &ResolvedSignal {
        &self.resolved
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_set()
    }

    pub fn release_permit(&self) -> bool {
        self.permit.release()
    }

    pub fn holds_permit(&self) -> bool {
        self.permit.is_held()
    }

    pub fn make_in_scope(&self, distance: i32) {
        self.set_scope_distance(distance);
        let mut tags = self.tags.lock();
        tags.retain(|t| t != TAG_INTERNAL && t != TAG_IN_SCOPE && !t.starts_with("distance-"));
        if distance == 0 {
            tags.insert(TAG_IN_SCOPE.to_string());
        } else {
            tags.insert(format!("distance-{}", distance));
        }
    }

    pub fn make_internal(&self) {
        self.add_tag(TAG_INTERNAL);
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id.clone(),
            event_type: self.event_type,
            data: self.value.clone(),
            module: self.module.name().to_string(),
            source: self.source_id.clone(),
            scope_distance: self.scope_distance(),
            tags: self.tags().into_iter().collect(),
            resolved_hosts: self.resolved_hosts().into_iter().collect(),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(\"{}\", module={}, distance={})", self.event_type, self.value, self.module, self.scope_distance())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("module", &self.module.name())
            .field("source", &self.source_id)
            .field("scope_distance", &self.scope_distance())
            .field("tags", &self.tags())
            .finish()
    }
}

/// Serializable snapshot of an event, as written by output modules.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: String,
    pub module: String,
    pub source: Option<String>,
    pub scope_distance: i32,
    pub tags: Vec<String>,
    pub resolved_hosts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
