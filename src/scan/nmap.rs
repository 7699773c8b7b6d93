//! nmap scan pipeline.
//!
//! Two phases share one pipeline: a ping sweep that discovers live
//! hosts, and a per-host service scan driven by the sweep's mac -> ip
//! map. Each nmap run writes `-oX` output into a scratch directory;
//! the file is parsed and removed, parse failures included.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::{DeviceRecord, PortRecord};
use crate::net::normalize_mac;

pub struct ScanPipeline {
    /// Interface to sweep from, nmap's `-e` argument.
    interface: String,
    /// CIDR target for the sweep.
    subnet: String,
    scratch: TempDir,
    /// mac -> ip map carried from the last sweep into the port scans.
    discovered: HashMap<String, String>,
}

impl ScanPipeline {
    pub fn new(interface: impl Into<String>, subnet: impl Into<String>) -> Result<Self> {
        let scratch = TempDir::new().context("Failed to create scan scratch directory")?;
        Ok(Self {
            interface: interface.into(),
            subnet: subnet.into(),
            scratch,
            discovered: HashMap::new(),
        })
    }

    /// mac -> ip map from the last sweep.
    pub fn discovered(&self) -> &HashMap<String, String> {
        &self.discovered
    }

    /// Ping-sweep the subnet. Refreshes the discovered map.
    pub async fn ping_sweep(&mut self) -> Result<Vec<DeviceRecord>> {
        info!(subnet = %self.subnet, "Beginning ping sweep");
        let result_file = self.scratch.path().join("ping_sweep.xml");
        let result_path = result_file.to_string_lossy().to_string();

        run_nmap(&[
            "-sn",
            &self.subnet,
            "-e",
            &self.interface,
            "-oX",
            &result_path,
        ])
        .await?;

        let xml = read_and_remove(&result_file)?;
        let records = parse_ping_sweep(&xml)?;

        self.discovered = records
            .iter()
            .map(|record| (record.mac.clone(), record.ip.clone()))
            .collect();
        info!(count = records.len(), "Ping sweep complete");
        Ok(records)
    }

    /// Service-scan every host from the last sweep. One batch per host
    /// that scanned cleanly; a host with no open ports still yields an
    /// empty batch. Per-host failures are logged and produce no batch,
    /// so one dead host cannot sink the run.
    pub async fn port_scan(&self) -> Result<Vec<Vec<PortRecord>>> {
        info!(hosts = self.discovered.len(), "Beginning port scan");
        let mut batches = Vec::new();

        for (mac, ip) in &self.discovered {
            debug!(ip = %ip, "Port scanning host");
            let result_file = self.scratch.path().join(format!("port_scan_{}.xml", ip));
            let result_path = result_file.to_string_lossy().to_string();

            if let Err(e) = run_nmap(&["-sV", "-oX", &result_path, ip]).await {
                warn!(ip = %ip, error = %e, "Port scan failed");
                continue;
            }

            match read_and_remove(&result_file) {
                Ok(xml) => match parse_port_scan(&xml, mac) {
                    Ok(found) => batches.push(found),
                    Err(e) => warn!(ip = %ip, error = %e, "Error parsing port scan output"),
                },
                Err(e) => warn!(ip = %ip, error = %e, "Error reading port scan output"),
            }
        }

        Ok(batches)
    }
}

async fn run_nmap(args: &[&str]) -> Result<()> {
    debug!(?args, "Running nmap");
    let output = Command::new("nmap")
        .args(args)
        .output()
        .await
        .context("Failed to launch nmap")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "nmap exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }
    Ok(())
}

/// Read a scan output file, removing it no matter how the read went.
fn read_and_remove(path: &Path) -> Result<String> {
    let xml = std::fs::read_to_string(path);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove scan output");
        }
    }
    xml.with_context(|| format!("Failed to read scan output {}", path.display()))
}

/// Parse `nmap -sn -oX` output into device records.
///
/// Hosts without a MAC element are the scanning machine itself and
/// are skipped. Hosts with no reported hostname get a synthesized
/// `"{ip} ({mac})"` one.
pub fn parse_ping_sweep(xml: &str) -> Result<Vec<DeviceRecord>> {
    let doc = roxmltree::Document::parse(xml).context("Invalid ping sweep XML")?;
    let mut records = Vec::new();

    for host in doc
        .root_element()
        .children()
        .filter(|node| node.has_tag_name("host"))
    {
        let mut ip = String::new();
        let mut mac = String::new();
        let mut vendor = String::new();
        let mut hostname = String::new();

        for address in host.children().filter(|node| node.has_tag_name("address")) {
            match address.attribute("addrtype") {
                Some("mac") => {
                    mac = address.attribute("addr").unwrap_or("").trim().to_string();
                    vendor = address
                        .attribute("vendor")
                        .unwrap_or("Unknown")
                        .trim()
                        .to_string();
                }
                Some("ipv4") => {
                    ip = address.attribute("addr").unwrap_or("").trim().to_string();
                }
                _ => {}
            }
        }

        if let Some(hostnames) = host
            .children()
            .find(|node| node.has_tag_name("hostnames"))
        {
            for entry in hostnames
                .children()
                .filter(|node| node.has_tag_name("hostname"))
            {
                if let Some(name) = entry.attribute("name") {
                    hostname = name.trim().to_string();
                }
            }
        }

        // Hosts with no MAC are the local interface.
        if mac.is_empty() {
            continue;
        }

        let mac = normalize_mac(&mac);
        if hostname.is_empty() {
            hostname = format!("{} ({})", ip, mac);
        }

        debug!(hostname = %hostname, ip = %ip, mac = %mac, vendor = %vendor, "Found device");
        records.push(DeviceRecord::new(hostname, ip, &mac, vendor));
    }

    Ok(records)
}

/// Parse `nmap -sV -oX` output into port records for one host. Only
/// open ports are kept.
pub fn parse_port_scan(xml: &str, mac: &str) -> Result<Vec<PortRecord>> {
    let doc = roxmltree::Document::parse(xml).context("Invalid port scan XML")?;
    let mut records = Vec::new();

    for host in doc
        .root_element()
        .children()
        .filter(|node| node.has_tag_name("host"))
    {
        for ports in host.children().filter(|node| node.has_tag_name("ports")) {
            for port in ports.children().filter(|node| node.has_tag_name("port")) {
                let state = port
                    .children()
                    .find(|node| node.has_tag_name("state"))
                    .and_then(|node| node.attribute("state"))
                    .unwrap_or("filtered");
                if state != "open" {
                    continue;
                }

                let port_num = port.attribute("portid").unwrap_or("").to_string();
                let protocol = port.attribute("protocol").unwrap_or("").to_string();

                let mut name = String::new();
                let mut product = String::new();
                let mut version = String::new();
                if let Some(service) = port.children().find(|node| node.has_tag_name("service")) {
                    name = service.attribute("name").unwrap_or("").to_string();
                    product = service.attribute("product").unwrap_or("").to_string();
                    version = service.attribute("version").unwrap_or("").to_string();
                }

                debug!(port = %port_num, protocol = %protocol, name = %name, "Found open port");
                records.push(PortRecord {
                    mac: mac.to_string(),
                    port: port_num,
                    protocol,
                    name,
                    product,
                    version,
                });
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PING_SWEEP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sn 192.168.1.0/24" version="7.94">
<host><status state="up" reason="localhost-response"/>
<address addr="192.168.1.7" addrtype="ipv4"/>
</host>
<host><status state="up" reason="arp-response"/>
<address addr="192.168.1.1" addrtype="ipv4"/>
<address addr="AA:BB:CC:DD:EE:01" addrtype="mac" vendor="Netgear"/>
<hostnames><hostname name="router.lan" type="PTR"/></hostnames>
</host>
<host><status state="up" reason="arp-response"/>
<address addr="192.168.1.23" addrtype="ipv4"/>
<address addr="AA:BB:CC:DD:EE:17" addrtype="mac"/>
<hostnames></hostnames>
</host>
</nmaprun>"#;

    const PORT_SCAN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sV 192.168.1.1" version="7.94">
<host><status state="up"/>
<ports>
<extraports state="closed" count="996"/>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/>
<service name="ssh" product="OpenSSH" version="8.9p1" method="probed" conf="10"/></port>
<port protocol="tcp" portid="80"><state state="open"/>
<service name="http" product="nginx"/></port>
<port protocol="tcp" portid="443"><state state="filtered"/></port>
<port protocol="tcp" portid="8080"><state state="closed"/>
<service name="http-proxy"/></port>
</ports>
</host>
</nmaprun>"#;

    #[test]
    fn test_parse_ping_sweep_skips_local_and_synthesizes_hostname() {
        let records = parse_ping_sweep(PING_SWEEP_XML).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].hostname, "router.lan");
        assert_eq!(records[0].ip, "192.168.1.1");
        assert_eq!(records[0].mac, "AABBCCDDEE01");
        assert_eq!(records[0].vendor, "Netgear");

        assert_eq!(records[1].hostname, "192.168.1.23 (AABBCCDDEE17)");
        assert_eq!(records[1].vendor, "Unknown");
    }

    #[test]
    fn test_parse_ping_sweep_rejects_invalid_xml() {
        assert!(parse_ping_sweep("<nmaprun><host>").is_err());
    }

    #[test]
    fn test_parse_port_scan_keeps_only_open_ports() {
        let records = parse_port_scan(PORT_SCAN_XML, "AABBCCDDEE01").unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].mac, "AABBCCDDEE01");
        assert_eq!(records[0].port, "22");
        assert_eq!(records[0].protocol, "tcp");
        assert_eq!(records[0].name, "ssh");
        assert_eq!(records[0].product, "OpenSSH");
        assert_eq!(records[0].version, "8.9p1");

        assert_eq!(records[1].port, "80");
        assert_eq!(records[1].product, "nginx");
        assert_eq!(records[1].version, "");
    }

    #[test]
    fn test_parse_port_scan_without_open_ports_yields_empty_batch() {
        let xml = r#"<nmaprun><host><ports>
<extraports state="closed" count="998"/>
<port protocol="tcp" portid="443"><state state="filtered"/></port>
<port protocol="tcp" portid="8080"><state state="closed"/>
<service name="http-proxy"/></port>
</ports></host></nmaprun>"#;
        let records = parse_port_scan(xml, "AABBCCDDEE01").unwrap();
        assert_eq!(records, Vec::new(), "a clean scan with nothing open still parses");
    }

    #[test]
    fn test_parse_port_scan_handles_missing_service_element() {
        let xml = r#"<nmaprun><host><ports>
<port protocol="udp" portid="53"><state state="open"/></port>
</ports></host></nmaprun>"#;
        let records = parse_port_scan(xml, "AABBCCDDEE01").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].port, "53");
        assert_eq!(records[0].protocol, "udp");
        assert_eq!(records[0].name, "");
    }

    #[test]
    fn test_read_and_remove_deletes_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep.xml");
        std::fs::write(&path, "<nmaprun/>").unwrap();

        let content = read_and_remove(&path).unwrap();
        assert_eq!(content, "<nmaprun/>");
        assert!(!path.exists());
    }

    #[test]
    fn test_pipeline_starts_with_empty_map() {
        let pipeline = ScanPipeline::new("eth0", "192.168.1.0/24").unwrap();
        assert!(pipeline.discovered().is_empty());
    }
}
