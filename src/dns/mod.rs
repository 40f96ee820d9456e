//! DNS resolution for the event pipeline.
//!
//! `DnsHelper::resolve_event` turns one event into the children, tags,
//! scope verdicts and resolved addresses the pipeline needs. The actual
//! lookups go through a `DnsResolver` so tests can swap in a static table.

pub mod hickory;

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::concurrent::ResultCache;
use crate::event::{Event, EventType};
use crate::target::ScopeList;

pub use hickory::HickoryResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Ns,
    Ptr,
}

impl DnsRecordType {
    /// Record types queried for a hostname.
    pub const NAME_QUERIES: [DnsRecordType; 5] = [
        DnsRecordType::A,
        DnsRecordType::Aaaa,
        DnsRecordType::Cname,
        DnsRecordType::Mx,
        DnsRecordType::Ns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::Aaaa => "AAAA",
            DnsRecordType::Cname => "CNAME",
            DnsRecordType::Mx => "MX",
            DnsRecordType::Ns => "NS",
            DnsRecordType::Ptr => "PTR",
        }
    }

    pub fn is_address(&self) -> bool {
        matches!(self, DnsRecordType::A | DnsRecordType::Aaaa)
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Look up `rdtype` records for `host`. PTR lookups receive an IP literal.
    async fn resolve(&self, host: &str, rdtype: DnsRecordType) -> anyhow::Result<Vec<String>>;
}

/// Everything the pipeline learns from resolving one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsResolution {
    pub children: Vec<(String, DnsRecordType)>,
    pub tags: BTreeSet<String>,
    pub whitelisted: bool,
    pub blacklisted: bool,
    pub resolved_hosts: BTreeSet<String>,
}

pub struct DnsHelper {
    resolver: Arc<dyn DnsResolver>,
    cache: ResultCache<(String, DnsRecordType), Vec<String>>,
}

impl DnsHelper {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            resolver,
            cache: ResultCache::new(),
        }
    }

    /// Cached lookup. Failures count as "no records".
    pub async fn resolve(&self, host: &str, rdtype: DnsRecordType) -> Vec<String> {
        let key = (host.to_string(), rdtype);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let records = match self.resolver.resolve(host, rdtype).await {
            Ok(records) => records
                .into_iter()
                .map(|r| r.trim().trim_end_matches('.').to_lowercase())
                .filter(|r| !r.is_empty())
                .collect(),
            Err(e) => {
                tracing::debug!(host, %rdtype, error = %e, "DNS lookup failed");
                Vec::new()
            }
        };
        self.cache.insert(key, records.clone());
        records
    }

    pub async fn resolve_event(&self, event: &Event, whitelist: &ScopeList, blacklist: &ScopeList) -> DnsResolution {
        let mut out = DnsResolution::default();
        let Some(host) = event.host() else {
            return out;
        };
        if event.event_type() == EventType::IpRange {
            return out;
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            out.resolved_hosts.insert(ip.to_string());
            if event.event_type() == EventType::IpAddress {
                let ptrs = self.resolve(host, DnsRecordType::Ptr).await;
                if !ptrs.is_empty() {
                    out.tags.insert("ptr-record".into());
                }
                out.children.extend(ptrs.into_iter().map(|p| (p, DnsRecordType::Ptr)));
            }
        } else {
            let lookups = DnsRecordType::NAME_QUERIES
                .into_iter()
                .map(|rdtype| async move { (rdtype, self.resolve(host, rdtype).await) });
            for (rdtype, records) in futures::future::join_all(lookups).await {
                if records.is_empty() {
                    continue;
                }
                out.tags.insert(format!("{}-record", rdtype.as_str().to_lowercase()));
                if rdtype.is_address() {
                    out.resolved_hosts.extend(records.iter().cloned());
                }
                if event.event_type() == EventType::DnsName {
                    out.children.extend(records.into_iter().map(|r| (r, rdtype)));
                }
            }
            out.tags
                .insert(if out.resolved_hosts.is_empty() { "unresolved" } else { "resolved" }.into());
        }

        if out.resolved_hosts.iter().any(|h| is_private(h)) {
            out.tags.insert("private-ip".into());
        }
        out.whitelisted = out.resolved_hosts.iter().any(|h| whitelist.matches_host(h));
        out.blacklisted = out.resolved_hosts.iter().any(|h| blacklist.matches_host(h));
        out
    }
}

fn is_private(host: &str) -> bool {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::{EventModule, ModuleKind};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Static lookup table, counting queries.
    #[derive(Default)]
    pub(crate) struct StaticResolver {
        records: HashMap<(String, DnsRecordType), Vec<String>>,
        pub queries: Mutex<usize>,
    }

    impl StaticResolver {
        pub(crate) fn with(mut self, host: &str, rdtype: DnsRecordType, records: &[&str]) -> Self {
            self.records
                .insert((host.to_string(), rdtype), records.iter().map(|r| r.to_string()).collect());
            self
        }
    }

    #[async_trait]
    impl DnsResolver for StaticResolver {
        async fn resolve(&self, host: &str, rdtype: DnsRecordType) -> anyhow::Result<Vec<String>> {
            *self.queries.lock() += 1;
            Ok(self.records.get(&(host.to_string(), rdtype)).cloned().unwrap_or_default())
        }
    }

    fn event(value: &str, event_type: EventType) -> Event {
        Event::new(value, event_type, EventModule::new("test", ModuleKind::Scan), None).unwrap()
    }

    #[tokio::test]
    async fn name_resolution_yields_children_and_tags() {
        let resolver = StaticResolver::default()
            .with("example.com", DnsRecordType::A, &["93.184.216.34"])
            .with("example.com", DnsRecordType::Mx, &["mail.example.com."]);
        let helper = DnsHelper::new(Arc::new(resolver));
        let res = helper
            .resolve_event(&event("example.com", EventType::DnsName), &ScopeList::new(), &ScopeList::new())
            .await;

        assert!(res.tags.contains("a-record"));
        assert!(res.tags.contains("mx-record"));
        assert!(res.tags.contains("resolved"));
        assert!(res.resolved_hosts.contains("93.184.216.34"));
        assert!(res.children.contains(&("mail.example.com".to_string(), DnsRecordType::Mx)));
        assert!(!res.whitelisted && !res.blacklisted);
    }

    #[tokio::test]
    async fn verdicts_come_from_resolved_hosts() {
        let resolver = StaticResolver::default().with("evil.example.com", DnsRecordType::A, &["10.1.1.1"]);
        let helper = DnsHelper::new(Arc::new(resolver));
        let blacklist = ScopeList::from_entries(["10.0.0.0/8"]).unwrap();
        let res = helper
            .resolve_event(&event("evil.example.com", EventType::DnsName), &ScopeList::new(), &blacklist)
            .await;
        assert!(res.blacklisted);
        assert!(res.tags.contains("private-ip"));
    }

    #[tokio::test]
    async fn non_name_events_resolve_without_children() {
        let resolver = StaticResolver::default().with("api.example.com", DnsRecordType::A, &["1.1.1.1"]);
        let helper = DnsHelper::new(Arc::new(resolver));
        let res = helper
            .resolve_event(&event("https://api.example.com/v1", EventType::Url), &ScopeList::new(), &ScopeList::new())
            .await;
        assert!(res.children.is_empty());
        assert!(res.resolved_hosts.contains("1.1.1.1"));
    }

    #[tokio::test]
    async fn lookups_are_cached() {
        let resolver = Arc::new(StaticResolver::default().with("1.2.3.4", DnsRecordType::Ptr, &["host.example.net."]));
        let helper = DnsHelper::new(resolver.clone());
        let ip = event("1.2.3.4", EventType::IpAddress);
        let first = helper.resolve_event(&ip, &ScopeList::new(), &ScopeList::new()).await;
        let second = helper.resolve_event(&ip, &ScopeList::new(), &ScopeList::new()).await;
        assert_eq!(first, second);
        assert_eq!(first.children, vec![("host.example.net".to_string(), DnsRecordType::Ptr)]);
        assert_eq!(*resolver.queries.lock(), 1);
    }
}
