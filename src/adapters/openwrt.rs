//! OpenWrt (LuCI) adapter.
//!
//! LuCI deployments differ in what the DHCP lease endpoint returns: a
//! JSON object with a `dhcp_leases` array, a bare JSON list with
//! varying field names, or the raw `/tmp/dhcp.leases` text. All three
//! shapes are tried in that order.

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::merge::SourceBatch;
use crate::models::DeviceRecord;
use crate::net::normalize_mac;

use super::{build_client, first_str, DeviceSource};

const DHCP_LEASES_ENDPOINT: &str = "/cgi-bin/luci/admin/status/dhcpleases";
const WIRELESS_ENDPOINT: &str = "/cgi-bin/luci/admin/status/wireless";

pub struct OpenwrtAdapter {
    client: reqwest::Client,
    host: String,
    username: String,
    password: String,
}

impl OpenwrtAdapter {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.verify_tls)?,
            host: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    async fn fetch(&self, endpoint: &str) -> Result<String> {
        let url = format!("{}{}", self.host, endpoint);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .with_context(|| format!("OpenWrt request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("OpenWrt request to {} returned {}", endpoint, status);
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read OpenWrt response from {}", endpoint))
    }

    async fn dhcp_leases(&self) -> Result<Vec<DeviceRecord>> {
        let body = self.fetch(DHCP_LEASES_ENDPOINT).await?;
        Ok(parse_lease_body(&body))
    }

    async fn wireless_clients(&self) -> Result<Vec<DeviceRecord>> {
        let body = self.fetch(WIRELESS_ENDPOINT).await?;
        let payload: Value =
            serde_json::from_str(&body).context("OpenWrt wireless response is not JSON")?;
        Ok(parse_assoclist(&payload))
    }
}

fn lease_from_entry(entry: &Value) -> Option<DeviceRecord> {
    let ip = first_str(entry, &["ipaddr", "ip"]);
    let mac = first_str(entry, &["macaddr", "mac"]);
    let hostname = first_str(entry, &["hostname", "name"]);
    if ip.is_empty() || mac.is_empty() {
        return None;
    }
    Some(DeviceRecord::new(hostname, ip, &mac, "Unknown"))
}

/// Leases from whatever shape the endpoint produced.
fn parse_lease_body(body: &str) -> Vec<DeviceRecord> {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        let entries = match payload.get("dhcp_leases").and_then(Value::as_array) {
            Some(entries) => Some(entries),
            None => payload.as_array(),
        };
        if let Some(entries) = entries {
            return entries.iter().filter_map(lease_from_entry).collect();
        }
    }

    // Raw leases file: "<expiry> <MAC> <IP> <hostname> <client-id>"
    body.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let hostname = if parts[3] == "*" { "" } else { parts[3] };
            Some(DeviceRecord::new(hostname, parts[2], parts[1], "Unknown"))
        })
        .collect()
}

/// Associated MACs from per-interface `assoclist` maps. Presence only.
fn parse_assoclist(payload: &Value) -> Vec<DeviceRecord> {
    let mut records = Vec::new();
    if let Some(interfaces) = payload.as_object() {
        for iface_data in interfaces.values() {
            if let Some(assoclist) = iface_data.get("assoclist").and_then(Value::as_object) {
                for mac in assoclist.keys() {
                    let mac = normalize_mac(mac);
                    records.push(DeviceRecord::new(mac.clone(), "", &mac, "Unknown"));
                }
            }
        }
    }
    records
}

impl DeviceSource for OpenwrtAdapter {
    fn name(&self) -> &str {
        "openwrt"
    }

    fn discover<'a>(&'a self) -> Pin<Box<dyn Future<Output = Vec<SourceBatch>> + Send + 'a>> {
        Box::pin(async move {
            let mut batches = Vec::new();

            match self.dhcp_leases().await {
                Ok(leases) => {
                    info!(count = leases.len(), "OpenWrt DHCP leases fetched");
                    batches.push(SourceBatch::leases(leases));
                }
                Err(e) => warn!(error = %e, "OpenWrt DHCP lease fetch failed"),
            }

            match self.wireless_clients().await {
                Ok(clients) => {
                    debug!(count = clients.len(), "OpenWrt wireless clients fetched");
                    batches.push(SourceBatch::liveness(clients));
                }
                Err(e) => warn!(error = %e, "OpenWrt wireless client fetch failed"),
            }

            batches
        })
    }
}
