//! FortiGate adapter.
//!
//! Talks to the FortiOS REST monitor API with a bearer token. DHCP
//! leases name devices; the firewall session table proves liveness for
//! both endpoints of each session. The merge engine's backfill pass
//! later recovers hostnames for session-only records from the leases.

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::merge::SourceBatch;
use crate::models::DeviceRecord;

use super::{build_client, first_str, DeviceSource};

const DHCP_ENDPOINT: &str = "/api/v2/monitor/system/dhcp/select";
const SESSION_ENDPOINT: &str =
    "/api/v2/monitor/firewall/session?vdom=root&ip_version=ipv4&summary=true";

pub struct FortigateAdapter {
    client: reqwest::Client,
    host: String,
    api_token: String,
}

impl FortigateAdapter {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.verify_tls)?,
            host: config.host.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    /// Fetch one monitor endpoint and unwrap the standard
    /// `{status: "success", results: [...]}` envelope.
    async fn fetch_results(&self, endpoint: &str) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.host, endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .with_context(|| format!("FortiGate request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("FortiGate request to {} returned {}", endpoint, status);
        }

        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("FortiGate response from {} is not JSON", endpoint))?;

        if payload.get("status").and_then(Value::as_str) != Some("success") {
            anyhow::bail!("FortiGate request to {} returned non-success status", endpoint);
        }

        Ok(payload
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn dhcp_leases(&self) -> Result<Vec<DeviceRecord>> {
        let results = self.fetch_results(DHCP_ENDPOINT).await?;
        Ok(results.iter().filter_map(lease_from_entry).collect())
    }

    async fn session_endpoints(&self) -> Result<Vec<DeviceRecord>> {
        let results = self.fetch_results(SESSION_ENDPOINT).await?;
        Ok(results.iter().flat_map(records_from_session).collect())
    }
}

fn lease_from_entry(entry: &Value) -> Option<DeviceRecord> {
    let ip = first_str(entry, &["ip", "ip-address"]);
    let mac = first_str(entry, &["mac", "mac-address"]);
    let hostname = first_str(entry, &["hostname", "host-name"]);
    if ip.is_empty() || mac.is_empty() {
        return None;
    }
    Some(DeviceRecord::new(hostname, ip, &mac, "Unknown"))
}

/// Both ends of a session count as live devices when they carry a MAC.
fn records_from_session(session: &Value) -> Vec<DeviceRecord> {
    let mut records = Vec::new();

    let src_ip = first_str(session, &["src", "srcaddr", "source"]);
    let src_mac = first_str(session, &["srcmac", "src_mac"]);
    if !src_ip.is_empty() && !src_mac.is_empty() {
        records.push(DeviceRecord::new("", src_ip, &src_mac, "Unknown"));
    }

    let dst_ip = first_str(session, &["dst", "dstaddr", "destination"]);
    let dst_mac = first_str(session, &["dstmac", "dst_mac"]);
    if !dst_ip.is_empty() && !dst_mac.is_empty() {
        records.push(DeviceRecord::new("", dst_ip, &dst_mac, "Unknown"));
    }

    records
}

impl DeviceSource for FortigateAdapter {
    fn name(&self) -> &str {
        "fortigate"
    }

    fn discover<'a>(&'a self) -> Pin<Box<dyn Future<Output = Vec<SourceBatch>> + Send + 'a>> {
        Box::pin(async move {
            let mut batches = Vec::new();

            match self.dhcp_leases().await {
                Ok(leases) => {
                    info!(count = leases.len(), "FortiGate DHCP leases fetched");
                    batches.push(SourceBatch::leases(leases));
                }
                Err(e) => warn!(error = %e, "FortiGate DHCP lease fetch failed"),
            }

            match self.session_endpoints().await {
                Ok(sessions) => {
                    debug!(count = sessions.len(), "FortiGate session endpoints fetched");
                    batches.push(SourceBatch::liveness(sessions));
                }
                Err(e) => warn!(error = %e, "FortiGate session fetch failed"),
            }

            batches
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_lease_field_synonyms() {
        let plain = json!({"ip": "192.168.1.10", "mac": "AA:BB:CC:DD:EE:01", "hostname": "laptop"});
        let dashed = json!({
            "ip-address": "192.168.1.11",
            "mac-address": "AA:BB:CC:DD:EE:02",
            "host-name": "printer"
        });

        let record = lease_from_entry(&plain).unwrap();
        assert_eq!(record.hostname, "laptop");
        assert_eq!(record.mac, "AABBCCDDEE01");

        let record = lease_from_entry(&dashed).unwrap();
        assert_eq!(record.hostname, "printer");
        assert_eq!(record.ip, "192.168.1.11");
    }

    #[test]
    fn test_lease_requires_ip_and_mac() {
        assert!(lease_from_entry(&json!({"ip": "192.168.1.10"})).is_none());
        assert!(lease_from_entry(&json!({"mac": "AA:BB:CC:DD:EE:01"})).is_none());
    }

    #[test]
    fn test_session_yields_both_endpoints() {
        let session = json!({
            "src": "192.168.1.20",
            "srcmac": "AA:BB:CC:DD:EE:03",
            "dst": "192.168.1.21",
            "dstmac": "AA:BB:CC:DD:EE:04"
        });

        let records = records_from_session(&session);
        assert_eq!(records.len(), 2);
        // Session records carry no name; hostname defaults to the IP,
        // which is what the merge backfill keys on.
        assert_eq!(records[0].hostname, "192.168.1.20");
        assert_eq!(records[0].mac, "AABBCCDDEE03");
        assert_eq!(records[1].hostname, "192.168.1.21");
    }

    #[test]
    fn test_session_without_macs_yields_nothing() {
        let session = json!({"src": "192.168.1.20", "dst": "8.8.8.8"});
        assert!(records_from_session(&session).is_empty());
    }
}
