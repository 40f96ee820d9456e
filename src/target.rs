use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;

use crate::error::ScanError;
use crate::event::validators::normalize_host;
use crate::event::{Event, EventModule, EventType, TAG_TARGET};

/// Set of hosts, domains and networks an event's host can be matched against.
///
/// A domain entry matches itself and every subdomain; a network entry matches
/// every address (or sub-range) inside it.
#[derive(Debug, Clone, Default)]
pub struct ScopeList {
    domains: BTreeSet<String>,
    networks: Vec<IpNetwork>,
}

impl ScopeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for entry in entries {
            list.add(entry.as_ref())?;
        }
        Ok(list)
    }

    /// Add a hostname, IP, CIDR range, URL or `host:port` entry.
    pub fn add(&mut self, entry: &str) -> Result<(), ScanError> {
        let entry = entry.trim();
        if let Ok(net) = entry.parse::<IpNetwork>() {
            self.networks.push(net);
            return Ok(());
        }
        let event_type = EventType::detect(entry);
        let event_type = if event_type == EventType::DnsName && entry.contains(':') {
            EventType::OpenTcpPort
        } else {
            event_type
        };
        let v = crate::event::validators::validate(event_type, entry)?;
        match v.host {
            Some(host) => self.add_host(&host),
            None => Err(ScanError::Config(format!("scope entry has no host: {}", entry))),
        }
    }

    fn add_host(&mut self, host: &str) -> Result<(), ScanError> {
        if let Ok(net) = host.parse::<IpNetwork>() {
            self.networks.push(net);
        } else {
            self.domains.insert(host.to_string());
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.domains.len() + self.networks.len()
    }

    pub fn matches_host(&self, host: &str) -> bool {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.networks.iter().any(|n| n.contains(ip));
        }
        if let Ok(range) = host.parse::<IpNetwork>() {
            return self
                .networks
                .iter()
                .any(|n| n.contains(range.network()) && range.prefix() >= n.prefix());
        }
        let Ok((_, host)) = normalize_host(host) else {
            return false;
        };
        let mut candidate = host.as_str();
        loop {
            if self.domains.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => return false,
            }
        }
    }

    pub fn matches_event(&self, event: &Event) -> bool {
        event.host().map(|h| self.matches_host(h)).unwrap_or(false)
    }
}

/// The declared goals of a scan.
#[derive(Debug, Default)]
pub struct Target {
    events: Vec<Arc<Event>>,
    scope: ScopeList,
}

impl Target {
    /// Build target events as in-scope children of `root`, tagged "target".
    pub fn new<I, S>(root: &Arc<Event>, entries: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut target = Target::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            let event = Event::new(entry, EventType::detect(entry), EventModule::target(), Some(root))?
                .with_tags([TAG_TARGET]);
            event.make_in_scope(0);
            target.scope.add(entry)?;
            target.events.push(Arc::new(event));
        }
        Ok(target)
    }

    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn scope(&self) -> &ScopeList {
        &self.scope
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_matches_subdomains_only() {
        let list = ScopeList::from_entries(["example.com"]).unwrap();
        assert!(list.matches_host("example.com"));
        assert!(list.matches_host("www.api.example.com"));
        assert!(!list.matches_host("notexample.com"));
        assert!(!list.matches_host("example.org"));
    }

    #[test]
    fn networks_match_addresses_and_subranges() {
        let list = ScopeList::from_entries(["10.0.0.0/16", "1.2.3.4"]).unwrap();
        assert!(list.matches_host("10.0.42.1"));
        assert!(list.matches_host("10.0.1.0/24"));
        assert!(!list.matches_host("10.0.0.0/8"));
        assert!(list.matches_host("1.2.3.4"));
        assert!(!list.matches_host("1.2.3.5"));
    }

    #[test]
    fn urls_and_ports_contribute_hosts() {
        let list = ScopeList::from_entries(["https://portal.example.net/login", "db.example.org:5432"]).unwrap();
        assert!(list.matches_host("portal.example.net"));
        assert!(list.matches_host("db.example.org"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn target_events_are_tagged_and_in_scope() {
        let root = Arc::new(Event::root("t"));
        let target = Target::new(&root, ["example.com", "192.168.0.0/30", ""]).unwrap();
        assert_eq!(target.events().len(), 2);
        for e in target.events() {
            assert!(e.has_tag(TAG_TARGET));
            assert_eq!(e.scope_distance(), 0);
            assert_eq!(e.source_id(), Some("SCAN:t"));
        }
        assert!(target.scope().matches_host("192.168.0.1"));
    }

    #[test]
    fn invalid_entry_is_an_error() {
        assert!(ScopeList::from_entries(["bad..host"]).is_err());
    }
}
