use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Scan,
    DnsName,
    IpAddress,
    IpRange,
    OpenTcpPort,
    Url,
    UrlUnverified,
    EmailAddress,
    Finding,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Scan,
        EventType::DnsName,
        EventType::IpAddress,
        EventType::IpRange,
        EventType::OpenTcpPort,
        EventType::Url,
        EventType::UrlUnverified,
        EventType::EmailAddress,
        EventType::Finding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Scan => "SCAN",
            EventType::DnsName => "DNS_NAME",
            EventType::IpAddress => "IP_ADDRESS",
            EventType::IpRange => "IP_RANGE",
            EventType::OpenTcpPort => "OPEN_TCP_PORT",
            EventType::Url => "URL",
            EventType::UrlUnverified => "URL_UNVERIFIED",
            EventType::EmailAddress => "EMAIL_ADDRESS",
            EventType::Finding => "FINDING",
        }
    }

    /// Types that already are a host, so no DNS_NAME is speculated from them.
    pub fn is_host_type(&self) -> bool {
        matches!(self, EventType::DnsName | EventType::IpAddress | EventType::IpRange)
    }

    /// Types whose resolution tags are copied onto the event itself.
    pub fn absorbs_dns_tags(&self) -> bool {
        matches!(self, EventType::DnsName | EventType::IpAddress)
    }

    /// Best guess at the type of a raw target string.
    pub fn detect(raw: &str) -> EventType {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        if raw.parse::<IpAddr>().is_ok() {
            EventType::IpAddress
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            EventType::Url
        } else if raw.contains('/') && raw.parse::<IpNetwork>().is_ok() {
            EventType::IpRange
        } else if raw.contains('@') {
            EventType::EmailAddress
        } else {
            EventType::DnsName
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == upper)
            .copied()
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_target_types() {
        assert_eq!(EventType::detect("example.com"), EventType::DnsName);
        assert_eq!(EventType::detect("1.2.3.4"), EventType::IpAddress);
        assert_eq!(EventType::detect("::1"), EventType::IpAddress);
        assert_eq!(EventType::detect("10.0.0.0/24"), EventType::IpRange);
        assert_eq!(EventType::detect("https://example.com/a/b"), EventType::Url);
        assert_eq!(EventType::detect("admin@example.com"), EventType::EmailAddress);
    }

    #[test]
    fn parses_names() {
        assert_eq!("dns_name".parse::<EventType>().unwrap(), EventType::DnsName);
        assert_eq!("OPEN_TCP_PORT".parse::<EventType>().unwrap(), EventType::OpenTcpPort);
        assert!("NOPE".parse::<EventType>().is_err());
    }

    #[test]
    fn serializes_screaming_snake() {
        assert_eq!(serde_json::to_string(&EventType::UrlUnverified).unwrap(), "\"URL_UNVERIFIED\"");
        assert_eq!(serde_json::to_string(&EventType::IpAddress).unwrap(), "\"IP_ADDRESS\"");
    }
}
