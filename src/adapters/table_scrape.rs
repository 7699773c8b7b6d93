//! Heuristic HTML-table scraper for routers without a usable API.
//!
//! One adapter covers the generic case and two ISP router families;
//! the profiles differ only in which endpoints they probe and which
//! hostname placeholders they ignore. Endpoints are tried in order and
//! the first one that yields matches wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::merge::SourceBatch;
use crate::models::DeviceRecord;

use super::{build_client, DeviceSource};

/// Endpoint and placeholder profile for one router family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeProfile {
    Generic,
    Bezeq,
    Partner,
}

impl ScrapeProfile {
    fn label(&self) -> &'static str {
        match self {
            ScrapeProfile::Generic => "generic",
            ScrapeProfile::Bezeq => "bezeq",
            ScrapeProfile::Partner => "partner",
        }
    }

    /// Candidate DHCP status pages, most common first.
    fn lease_endpoints(&self) -> &'static [&'static str] {
        match self {
            ScrapeProfile::Generic => &[
                "/status.html",
                "/dhcp.html",
                "/dhcp_status.html",
                "/dhcp_clients.html",
                "/lan_dhcp.html",
                "/lan_dhcp_clients.html",
                "/status/dhcp.html",
                "/network/dhcp.html",
            ],
            ScrapeProfile::Bezeq => &[
                "/status.html",
                "/dhcp.html",
                "/dhcp_status.html",
                "/lan_dhcp.html",
                "/status/dhcp.html",
            ],
            ScrapeProfile::Partner => &[
                "/status.html",
                "/dhcp.html",
                "/dhcp_clients.html",
                "/lan_dhcp_clients.html",
                "/status/dhcp.html",
                "/network/dhcp.html",
            ],
        }
    }

    /// Candidate connected-device pages.
    fn device_endpoints(&self) -> &'static [&'static str] {
        match self {
            ScrapeProfile::Generic => &[
                "/status.html",
                "/devices.html",
                "/connected_devices.html",
                "/lan_status.html",
                "/lan_clients.html",
                "/network/clients.html",
            ],
            ScrapeProfile::Bezeq => &[
                "/status.html",
                "/devices.html",
                "/connected_devices.html",
                "/lan_status.html",
            ],
            ScrapeProfile::Partner => &[
                "/status.html",
                "/devices.html",
                "/connected_devices.html",
                "/lan_clients.html",
                "/network/clients.html",
            ],
        }
    }

    /// Hostname cell values that mean "no name".
    fn hostname_placeholders(&self) -> &'static [&'static str] {
        match self {
            ScrapeProfile::Bezeq => &["-", "", "N/A"],
            ScrapeProfile::Generic | ScrapeProfile::Partner => &["-", "", "N/A", "Unknown"],
        }
    }
}

fn lease_name_first_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<tr[^>]*>.*?<td[^>]*>([^<]*)</td>.*?<td[^>]*>([0-9A-Fa-f:]+)</td>.*?<td[^>]*>(\d+\.\d+\.\d+\.\d+)</td>",
        )
        .expect("Invalid regex pattern")
    })
}

fn lease_ip_first_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<tr[^>]*>.*?<td[^>]*>(\d+\.\d+\.\d+\.\d+)</td>.*?<td[^>]*>([0-9A-Fa-f:]+)</td>.*?<td[^>]*>([^<]*)</td>",
        )
        .expect("Invalid regex pattern")
    })
}

fn ip_then_mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+\.\d+\.\d+\.\d+)\D*?([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})")
            .expect("Invalid regex pattern")
    })
}

fn mac_then_ip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})\D*?(\d+\.\d+\.\d+\.\d+)")
            .expect("Invalid regex pattern")
    })
}

pub struct TableScrapeAdapter {
    client: reqwest::Client,
    host: String,
    username: String,
    password: String,
    profile: ScrapeProfile,
}

impl TableScrapeAdapter {
    pub fn new(config: &RouterConfig, profile: ScrapeProfile) -> Result<Self> {
        Ok(Self {
            client: build_client(config.verify_tls)?,
            host: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            profile,
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
            .with_context(|| format!("Router request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Router request to {} returned {}", endpoint, status);
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read router response from {}", endpoint))
    }

    /// Probe lease endpoints in order; first page with matches wins.
    async fn dhcp_leases(&self) -> Vec<DeviceRecord> {
        for endpoint in self.profile.lease_endpoints() {
            match self.fetch_page(endpoint).await {
                Ok(page) => {
                    let leases = parse_lease_tables(&page, self.profile);
                    if !leases.is_empty() {
                        debug!(endpoint, count = leases.len(), "Lease table matched");
                        return leases;
                    }
                }
                Err(e) => debug!(endpoint, error = %e, "Lease endpoint unavailable"),
            }
        }
        Vec::new()
    }

    async fn connected_devices(&self) -> Vec<DeviceRecord> {
        for endpoint in self.profile.device_endpoints() {
            match self.fetch_page(endpoint).await {
                Ok(page) => {
                    let devices = parse_device_pairs(&page);
                    if !devices.is_empty() {
                        debug!(endpoint, count = devices.len(), "Device list matched");
                        return devices;
                    }
                }
                Err(e) => debug!(endpoint, error = %e, "Device endpoint unavailable"),
            }
        }
        Vec::new()
    }
}

/// Lease rows in either (hostname, MAC, IP) or (IP, MAC, hostname)
/// cell order. The second pattern is only consulted when the first
/// finds nothing.
fn parse_lease_tables(page: &str, profile: ScrapeProfile) -> Vec<DeviceRecord> {
    let placeholders = profile.hostname_placeholders();
    let clean = |hostname: &str| {
        let hostname = hostname.trim();
        if placeholders.contains(&hostname) {
            ""
        } else {
            hostname
        }
        .to_string()
    };

    let mut records: Vec<DeviceRecord> = lease_name_first_regex()
        .captures_iter(page)
        .filter_map(|capture| {
            let mac = capture[2].trim().to_string();
            let ip = capture[3].trim().to_string();
            if mac.is_empty() || ip.is_empty() {
                return None;
            }
            Some(DeviceRecord::new(clean(&capture[1]), ip, &mac, "Unknown"))
        })
        .collect();

    if records.is_empty() {
        records = lease_ip_first_regex()
            .captures_iter(page)
            .filter_map(|capture| {
                let ip = capture[1].trim().to_string();
                let mac = capture[2].trim().to_string();
                if mac.is_empty() || ip.is_empty() {
                    return None;
                }
                Some(DeviceRecord::new(clean(&capture[3]), ip, &mac, "Unknown"))
            })
            .collect();
    }

    records
}

/// Bare `IP ... MAC` pairs (or the reverse) from a status page.
/// Liveness only; the merge backfill may name them later.
fn parse_device_pairs(page: &str) -> Vec<DeviceRecord> {
    let mut records: Vec<DeviceRecord> = ip_then_mac_regex()
        .captures_iter(page)
        .map(|capture| DeviceRecord::new("", capture[1].trim(), capture[2].trim(), "Unknown"))
        .collect();

    if records.is_empty() {
        records = mac_then_ip_regex()
            .captures_iter(page)
            .map(|capture| DeviceRecord::new("", capture[2].trim(), capture[1].trim(), "Unknown"))
            .collect();
    }

    records
}

impl DeviceSource for TableScrapeAdapter {
    fn name(&self) -> &str {
        self.profile.label()
    }

    fn discover<'a>(&'a self) -> Pin<Box<dyn Future<Output = Vec<SourceBatch>> + Send + 'a>> {
        Box::pin(async move {
            let leases = self.dhcp_leases().await;
            if leases.is_empty() {
                warn!(profile = self.profile.label(), "No DHCP leases scraped");
            } else {
                info!(
                    profile = self.profile.label(),
                    count = leases.len(),
                    "DHCP leases scraped"
                );
            }

            let devices = self.connected_devices().await;
            debug!(
                profile = self.profile.label(),
                count = devices.len(),
                "Connected devices scraped"
            );

            vec![SourceBatch::leases(leases), SourceBatch::liveness(devices)]
        })
    }
}
