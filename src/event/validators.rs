use std::net::IpAddr;

use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;

use super::EventType;
use crate::error::ScanError;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*\.)?([a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?\.)*[a-z0-9_]([a-z0-9_-]{0,61}[a-z0-9_])?$")
        .expect("hostname regex")
});

/// Normalized event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Validated {
    pub event_type: EventType,
    pub value: String,
    pub host: Option<String>,
}

pub(crate) fn validate(event_type: EventType, raw: &str) -> Result<Validated, ScanError> {
    let fail = |reason: &str| ScanError::validation(event_type, raw, reason);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(fail("empty value"));
    }

    match event_type {
        EventType::DnsName | EventType::IpAddress => {
            let (host_type, host) = normalize_host(trimmed).map_err(|r| fail(&r))?;
            if event_type == EventType::IpAddress && host_type != EventType::IpAddress {
                return Err(fail("not an IP address"));
            }
            Ok(Validated { event_type: host_type, value: host.clone(), host: Some(host) })
        }
        EventType::IpRange => {
            let net: IpNetwork = trimmed.parse().map_err(|_| fail("not a CIDR range"))?;
            let net = IpNetwork::new(net.network(), net.prefix()).map_err(|e| fail(&e.to_string()))?;
            let value = net.to_string();
            Ok(Validated { event_type, value: value.clone(), host: Some(value) })
        }
        EventType::OpenTcpPort => {
            let (host_part, port) = trimmed.rsplit_once(':').ok_or_else(|| fail("expected host:port"))?;
            let port: u16 = port.parse().map_err(|_| fail("invalid port"))?;
            if port == 0 {
                return Err(fail("port 0"));
            }
            let host_part = host_part.trim_start_matches('[').trim_end_matches(']');
            let (host_type, host) = normalize_host(host_part).map_err(|r| fail(&r))?;
            let value = match host.parse::<IpAddr>() {
                Ok(IpAddr::V6(_)) if host_type == EventType::IpAddress => format!("[{}]:{}", host, port),
                _ => format!("{}:{}", host, port),
            };
            Ok(Validated { event_type, value, host: Some(host) })
        }
        EventType::Url | EventType::UrlUnverified => {
            let url = url::Url::parse(trimmed).map_err(|e| fail(&e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(fail("unsupported scheme"));
            }
            let host_str = url.host_str().ok_or_else(|| fail("url has no host"))?;
            let host_str = host_str.trim_start_matches('[').trim_end_matches(']');
            let (_, host) = normalize_host(host_str).map_err(|r| fail(&r))?;
            Ok(Validated { event_type, value: url.to_string(), host: Some(host) })
        }
        EventType::EmailAddress => {
            let lower = trimmed.to_lowercase();
            let (local, domain) = lower.split_once('@').ok_or_else(|| fail("missing @"))?;
            if local.is_empty() {
                return Err(fail("empty local part"));
            }
            let (domain_type, domain) = normalize_host(domain).map_err(|r| fail(&r))?;
            if domain_type != EventType::DnsName {
                return Err(fail("domain is not a hostname"));
            }
            Ok(Validated { event_type, value: format!("{}@{}", local, domain), host: Some(domain) })
        }
        EventType::Finding | EventType::Scan => Ok(Validated {
            event_type,
            value: trimmed.to_string(),
            host: None,
        }),
    }
}

/// Normalize a bare host. IP literals come back as `IpAddress`, everything else
/// has to be a syntactically valid hostname.
pub(crate) fn normalize_host(raw: &str) -> Result<(EventType, String), String> {
    let host = raw.trim().trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return Err("empty host".into());
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok((EventType::IpAddress, ip.to_string()));
    }
    if host.len() > 253 || !HOSTNAME_RE.is_match(&host) {
        return Err("not a valid hostname".into());
    }
    Ok((EventType::DnsName, host))
}
