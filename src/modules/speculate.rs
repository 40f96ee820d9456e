use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::IpNetwork;

use crate::event::{Event, EventType};

use super::{EventHandler, ModuleContext, ModuleKind};

/// Derives cheap follow-up events without touching the network: addresses
/// inside small ranges, and the open port implied by a URL.
pub struct Speculate {
    /// Ranges with more addresses than this are not expanded.
    pub max_hosts: u32,
}

impl Default for Speculate {
    fn default() -> Self {
        Self { max_hosts: 256 }
    }
}

impl Speculate {
    fn range_addresses(&self, range: &str) -> Vec<String> {
        let Ok(net) = range.parse::<IpNetwork>() else {
            return Vec::new();
        };
        let host_bits = match net {
            IpNetwork::V4(n) => 32 - u32::from(n.prefix()),
            IpNetwork::V6(n) => 128 - u32::from(n.prefix()),
        };
        if host_bits >= 32 || (1u64 << host_bits) > u64::from(self.max_hosts) {
            tracing::debug!("Not expanding {}: more than {} addresses", range, self.max_hosts);
            return Vec::new();
        }
        net.iter().map(|ip| ip.to_string()).collect()
    }
}

/// `host:port` for a URL, using the scheme's default port when none is given.
pub fn url_open_port(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let host = match url.host()? {
        url::Host::Ipv6(v6) => format!("[{}]", v6),
        host => host.to_string(),
    };
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

#[async_trait]
impl EventHandler for Speculate {
    fn name(&self) -> &str {
        "speculate"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Internal
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::IpRange, EventType::Url, EventType::UrlUnverified]
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        match event.event_type() {
            EventType::IpRange => {
                for ip in self.range_addresses(event.value()) {
                    ctx.emit(&ip, EventType::IpAddress, &event).await?;
                }
            }
            EventType::Url | EventType::UrlUnverified => {
                if let Some(port) = url_open_port(event.value()) {
                    ctx.emit(&port, EventType::OpenTcpPort, &event).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
