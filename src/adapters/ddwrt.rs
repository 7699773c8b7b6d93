//! DD-WRT adapter.
//!
//! DD-WRT has no JSON API worth speaking of; both sources are scraped
//! from the router's status pages. The lease table is the naming
//! source, the wireless client table proves presence only.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::merge::SourceBatch;
use crate::models::DeviceRecord;
use crate::net::normalize_mac;

use super::{build_client, DeviceSource};

const DHCP_STATUS_PAGE: &str = "/Status_Lan.asp";
const WIRELESS_STATUS_PAGE: &str = "/Status_Wireless.asp";

fn lease_row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<tr[^>]*>.*?<td[^>]*>([^<]+)</td>.*?<td[^>]*>([0-9A-Fa-f:]+)</td>.*?<td[^>]*>(\d+\.\d+\.\d+\.\d+)</td>",
        )
        .expect("Invalid regex pattern")
    })
}

fn lease_js_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"var\s+lease\s*=\s*"([^"]+)""#).expect("Invalid regex pattern"))
}

fn wireless_mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<td[^>]*>([0-9A-Fa-f:]{17})</td>").expect("Invalid regex pattern")
    })
}

pub struct DdwrtAdapter {
    client: reqwest::Client,
    host: String,
    username: String,
    password: String,
}

impl DdwrtAdapter {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.verify_tls)?,
            host: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    async fn fetch_page(&self, endpoint: &str) -> Result<String> {
        let url = format!("{}{}", self.host, endpoint);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .with_context(|| format!("DD-WRT request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("DD-WRT request to {} returned {}", endpoint, status);
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read DD-WRT response from {}", endpoint))
    }

    async fn dhcp_leases(&self) -> Result<Vec<DeviceRecord>> {
        let page = self.fetch_page(DHCP_STATUS_PAGE).await?;
        Ok(parse_lease_page(&page))
    }

    async fn wireless_clients(&self) -> Result<Vec<DeviceRecord>> {
        let page = self.fetch_page(WIRELESS_STATUS_PAGE).await?;
        Ok(parse_wireless_page(&page))
    }
}

/// Leases from the LAN status page. The table layout is the primary
/// source; older builds expose the same data through a `var lease`
/// script variable instead.
fn parse_lease_page(page: &str) -> Vec<DeviceRecord> {
    let mut records = Vec::new();

    for capture in lease_row_regex().captures_iter(page) {
        let hostname = capture[1].trim();
        let mac = capture[2].trim();
        let ip = capture[3].trim();
        if mac.is_empty() || ip.is_empty() {
            continue;
        }
        let hostname = if hostname == "-" { "" } else { hostname };
        records.push(DeviceRecord::new(hostname, ip, mac, "Unknown"));
    }

    if records.is_empty() {
        for capture in lease_js_regex().captures_iter(page) {
            // hostname,MAC,IP,expires
            let parts: Vec<&str> = capture[1].split(',').collect();
            if parts.len() < 3 {
                continue;
            }
            let hostname = if parts[0] == "-" { "" } else { parts[0] };
            records.push(DeviceRecord::new(hostname, parts[2], parts[1], "Unknown"));
        }
    }

    records
}

/// Associated wireless MACs. Presence only, no IP or name.
fn parse_wireless_page(page: &str) -> Vec<DeviceRecord> {
    wireless_mac_regex()
        .captures_iter(page)
        .map(|capture| {
            let mac = normalize_mac(capture[1].trim());
            DeviceRecord::new(mac.clone(), "", &mac, "Unknown")
        })
        .collect()
}

impl DeviceSource for DdwrtAdapter {
    fn name(&self) -> &str {
        "ddwrt"
    }

    fn discover<'a>(&'a self) -> Pin<Box<dyn Future<Output = Vec<SourceBatch>> + Send + 'a>> {
        Box::pin(async move {
            let mut batches = Vec::new();

            match self.dhcp_leases().await {
                Ok(leases) => {
                    info!(count = leases.len(), "DD-WRT DHCP leases fetched");
                    batches.push(SourceBatch::leases(leases));
                }
                Err(e) => warn!(error = %e, "DD-WRT DHCP lease fetch failed"),
            }

            match self.wireless_clients().await {
                Ok(clients) => {
                    debug!(count = clients.len(), "DD-WRT wireless clients fetched");
                    batches.push(SourceBatch::liveness(clients));
                }
                Err(e) => warn!(error = %e, "DD-WRT wireless client fetch failed"),
            }

            batches
        })
    }
}
