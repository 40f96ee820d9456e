use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::event::{Event, EventType};
use crate::http_client::create_client;

use super::{EventHandler, ModuleContext};

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    common_name: Option<String>,
    name_value: Option<String>,
}

/// Subdomains from certificate transparency logs (crt.sh).
pub struct Crtsh {
    client: Client,
    base_url: String,
}

impl Crtsh {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client(30)?,
            base_url: "https://crt.sh".to_string(),
        })
    }

    async fn query(&self, domain: &str) -> anyhow::Result<BTreeSet<String>> {
        tracing::debug!("Querying crt.sh for domain: {}", domain);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", format!("%.{}", domain)), ("output", "json".to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("crt.sh returned status: {}", response.status());
        }
        let body = response.text().await?;
        parse_response(&body, domain)
    }
}

/// Names under `domain` found in a crt.sh JSON response. Wildcards are stripped.
fn parse_response(body: &str, domain: &str) -> anyhow::Result<BTreeSet<String>> {
    let entries: Vec<CrtShEntry> = serde_json::from_str(body)?;
    let suffix = format!(".{}", domain);
    let mut names = BTreeSet::new();
    for entry in entries {
        let values = entry.common_name.into_iter().chain(entry.name_value);
        for value in values {
            // name_value can hold several names, one per line
            for name in value.split('\n') {
                let name = name.trim().trim_start_matches("*.").to_lowercase();
                if name == domain || name.ends_with(&suffix) {
                    names.insert(name);
                }
            }
        }
    }
    Ok(names)
}

#[async_trait]
impl EventHandler for Crtsh {
    fn name(&self) -> &str {
        "crtsh"
    }

    fn watched_events(&self) -> &[EventType] {
        &[EventType::DnsName]
    }

    fn filter_event(&self, event: &Event) -> Result<(), String> {
        if event.scope_distance() != 0 {
            return Err("it is not in scope".into());
        }
        Ok(())
    }

    async fn handle_event(&self, ctx: &ModuleContext, event: Arc<Event>) -> anyhow::Result<()> {
        let domain = event.value();
        let names = self.query(domain).await?;
        tracing::info!("crt.sh found {} names for {}", names.len(), domain);
        for name in names.iter().filter(|n| n.as_str() != domain) {
            ctx.emit(name, EventType::DnsName, &event).await?;
        }
        Ok(())
    }
}
