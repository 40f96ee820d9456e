use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;

use super::{DnsRecordType, DnsResolver};

/// `DnsResolver` backed by hickory's tokio resolver.
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl HickoryResolver {
    /// Use the nameservers from the system configuration.
    pub fn from_system_conf() -> anyhow::Result<Self> {
        Ok(Self {
            inner: TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }

    pub fn new() -> Self {
        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn record_type(rdtype: DnsRecordType) -> RecordType {
    match rdtype {
        DnsRecordType::A => RecordType::A,
        DnsRecordType::Aaaa => RecordType::AAAA,
        DnsRecordType::Cname => RecordType::CNAME,
        DnsRecordType::Mx => RecordType::MX,
        DnsRecordType::Ns => RecordType::NS,
        DnsRecordType::Ptr => RecordType::PTR,
    }
}

fn render(rdata: &RData) -> Option<String> {
    match rdata {
        RData::A(a) => Some(a.to_string()),
        RData::AAAA(a) => Some(a.to_string()),
        RData::CNAME(name) => Some(name.to_string()),
        RData::MX(mx) => Some(mx.exchange().to_string()),
        RData::NS(name) => Some(name.to_string()),
        RData::PTR(name) => Some(name.to_string()),
        _ => None,
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn resolve(&self, host: &str, rdtype: DnsRecordType) -> anyhow::Result<Vec<String>> {
        if rdtype == DnsRecordType::Ptr {
            let ip: IpAddr = host.parse()?;
            return match self.inner.reverse_lookup(ip).await {
                Ok(lookup) => Ok(lookup.iter().map(|ptr| ptr.to_string()).collect()),
                Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            };
        }

        let wanted = record_type(rdtype);
        match self.inner.lookup(host, wanted).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|r| r.record_type() == wanted)
                .filter_map(|r| r.data().and_then(render))
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
