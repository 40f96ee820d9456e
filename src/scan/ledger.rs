use dashmap::DashSet;

use crate::event::{Event, ModuleKind};

/// Append-only set of identity hashes. Check-and-insert is atomic, so
/// concurrent pipeline runs can share one ledger without extra locking.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: DashSet<u64>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.seen.contains(&hash)
    }

    /// Returns `true` if `hash` was not seen before.
    pub fn insert(&self, hash: u64) -> bool {
        self.seen.insert(hash)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Per-scan hashing of event identities.
#[derive(Default)]
pub struct IdentityHasher {
    state: ahash::RandomState,
}

impl IdentityHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for the accepted ledger: `(type, value, module)`.
    ///
    /// Children of DNS records also hash their parent, so the same record
    /// reached through a different lineage is kept for the graph trail.
    pub fn accept_hash(&self, event: &Event) -> u64 {
        if event.module().kind() == ModuleKind::Dns {
            self.state.hash_one((event.id(), event.module().name(), event.source_id()))
        } else {
            self.state.hash_one((event.id(), event.module().name()))
        }
    }

    /// Key for the distributed ledger: the event's own `(type, value)`.
    pub fn distribution_hash(&self, event: &Event) -> u64 {
        self.state.hash_one(event.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventModule, EventType};
    use std::sync::Arc;

    #[test]
    fn ledger_insert_reports_novelty() {
        let ledger = DedupLedger::new();
        assert!(ledger.insert(42));
        assert!(!ledger.insert(42));
        assert!(ledger.contains(42));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn module_is_part_of_accept_identity() {
        let h = IdentityHasher::new();
        let a = Event::new("1.2.3.4", EventType::IpAddress, EventModule::new("a", ModuleKind::Scan), None).unwrap();
        let a2 = Event::new("1.2.3.4", EventType::IpAddress, EventModule::new("a", ModuleKind::Scan), None).unwrap();
        let b = Event::new("1.2.3.4", EventType::IpAddress, EventModule::new("b", ModuleKind::Scan), None).unwrap();
        assert_eq!(h.accept_hash(&a), h.accept_hash(&a2));
        assert_ne!(h.accept_hash(&a), h.accept_hash(&b));
        assert_eq!(h.distribution_hash(&a), h.distribution_hash(&b));
    }

    #[test]
    fn dns_children_keep_lineage() {
        let h = IdentityHasher::new();
        let root = Arc::new(Event::root("s"));
        let p1 = Arc::new(Event::new("a.example.com", EventType::DnsName, EventModule::target(), Some(&root)).unwrap());
        let p2 = Arc::new(Event::new("b.example.com", EventType::DnsName, EventModule::target(), Some(&root)).unwrap());
        let c1 = Event::new("1.2.3.4", EventType::DnsName, EventModule::dns("A"), Some(&p1)).unwrap();
        let c2 = Event::new("1.2.3.4", EventType::DnsName, EventModule::dns("A"), Some(&p2)).unwrap();
        assert_ne!(h.accept_hash(&c1), h.accept_hash(&c2));
        assert_eq!(h.distribution_hash(&c1), h.distribution_hash(&c2));
    }
}
