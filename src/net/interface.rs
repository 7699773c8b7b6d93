//! Network interface detection and selection

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use ipnetwork::Ipv4Network;
use pnet::datalink;
use pnet::util::MacAddr;

/// A usable IPv4 interface the sensor can sweep from.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub prefix_len: u8,
}

impl InterfaceInfo {
    /// CIDR of the attached network, e.g. "192.168.1.0/24".
    pub fn subnet_cidr(&self) -> Result<String> {
        let network = Ipv4Network::new(self.ip, self.prefix_len)
            .map_err(|e| anyhow!("Invalid prefix length {} on {}: {}", self.prefix_len, self.name, e))?;
        Ok(format!("{}/{}", network.network(), network.prefix()))
    }
}

fn is_virtual_adapter_name(name_lower: &str) -> bool {
    name_lower.contains("hyper-v")
        || name_lower.contains("vmware")
        || name_lower.contains("virtualbox")
        || name_lower.contains("docker")
        || name_lower.contains("vethernet")
        || name_lower.contains("wsl")
}

fn collect_candidate_interfaces(
    pnet_interfaces: &[datalink::NetworkInterface],
    verbose: bool,
) -> Vec<InterfaceInfo> {
    let mut candidates: Vec<InterfaceInfo> = Vec::new();

    for pnet_if in pnet_interfaces {
        if pnet_if.is_loopback() {
            continue;
        }

        // On Windows/Npcap, `is_up()` can be false even for usable adapters.
        // Keep strict behavior on other OSes, but allow Windows adapters that
        // clearly have a non-zero IPv4 assignment.
        let has_usable_ipv4 = pnet_if.ips.iter().any(|ip_network| match ip_network.ip() {
            IpAddr::V4(ipv4) => {
                !ipv4.is_unspecified()
                    && ip_network.prefix() > 0
                    && !(ipv4.octets()[0] == 169 && ipv4.octets()[1] == 254)
            }
            IpAddr::V6(_) => false,
        });
        if !pnet_if.is_up() && !(cfg!(target_os = "windows") && has_usable_ipv4) {
            if verbose {
                tracing::debug!("Skipping down adapter: {}", pnet_if.name);
            }
            continue;
        }

        // Skip interfaces without MAC
        let mac = match pnet_if.mac {
            Some(m) if m != MacAddr::zero() => m,
            _ => continue,
        };

        // Skip known virtual adapter patterns (Windows/macOS/Linux)
        let name_lower = pnet_if.name.to_lowercase();
        if is_virtual_adapter_name(&name_lower) {
            if verbose {
                tracing::debug!("Skipping virtual adapter: {}", pnet_if.name);
            }
            continue;
        }

        for ip_network in &pnet_if.ips {
            if let IpAddr::V4(ipv4) = ip_network.ip() {
                // Skip unassigned placeholder addresses.
                if ipv4.is_unspecified() || ip_network.prefix() == 0 {
                    continue;
                }

                // Skip link-local (169.254.x.x)
                if ipv4.octets()[0] == 169 && ipv4.octets()[1] == 254 {
                    continue;
                }

                let prefix_len = ip_network.prefix();

                if verbose {
                    tracing::debug!(
                        "Found candidate interface: {} (IP: {}/{}, MAC: {})",
                        pnet_if.name,
                        ipv4,
                        prefix_len,
                        mac
                    );
                }

                candidates.push(InterfaceInfo {
                    name: pnet_if.name.clone(),
                    ip: ipv4,
                    mac,
                    prefix_len,
                });
            }
        }
    }

    candidates
}

/// Finds the first valid IPv4 network interface with MAC address
/// Prefers physical adapters over virtual ones (Hyper-V, VMware, etc.)
pub fn find_valid_interface() -> Result<InterfaceInfo> {
    let pnet_interfaces = datalink::interfaces();

    tracing::debug!("Scanning {} network interfaces...", pnet_interfaces.len());

    let mut candidates = collect_candidate_interfaces(&pnet_interfaces, true);

    // Sort candidates: prefer 192.168.x.x, then 10.x.x.x, then others
    candidates.sort_by(|a, b| {
        let score_a = interface_score(&a.ip);
        let score_b = interface_score(&b.ip);
        score_b.cmp(&score_a)
    });

    if let Some(best) = candidates.into_iter().next() {
        tracing::debug!(
            "Selected interface: {} (IP: {}/{}, MAC: {})",
            best.name,
            best.ip,
            best.prefix_len,
            best.mac
        );
        return Ok(best);
    }

    tracing::warn!("No valid interface found. Available interfaces:");
    for pnet_if in &pnet_interfaces {
        tracing::warn!(
            "  - {} (loopback: {}, mac: {:?}, ips: {:?})",
            pnet_if.name,
            pnet_if.is_loopback(),
            pnet_if.mac,
            pnet_if.ips
        );
    }

    Err(anyhow!(
        "No valid IPv4 network interface found.\n\
         Ensure you have an active network connection."
    ))
}

/// Look up a specific interface by name among the usable candidates.
pub fn find_interface_by_name(name: &str) -> Result<InterfaceInfo> {
    let pnet_interfaces = datalink::interfaces();
    let candidates = collect_candidate_interfaces(&pnet_interfaces, false);

    candidates
        .into_iter()
        .find(|candidate| candidate.name == name)
        .ok_or_else(|| {
            anyhow!(
                "Interface '{}' not found or not usable. Valid interfaces: {}",
                name,
                list_valid_interfaces().join(", ")
            )
        })
}

/// List valid interface names in priority order.
pub fn list_valid_interfaces() -> Vec<String> {
    let pnet_interfaces = datalink::interfaces();
    let mut candidates = collect_candidate_interfaces(&pnet_interfaces, false);

    candidates.sort_by(|a, b| {
        let score_a = interface_score(&a.ip);
        let score_b = interface_score(&b.ip);
        score_b.cmp(&score_a)
    });

    let mut names = Vec::new();
    for candidate in candidates {
        if !names.iter().any(|n: &String| n == &candidate.name) {
            names.push(candidate.name);
        }
    }
    names
}

/// OS hostname for the sensor heartbeat, cached after the first read.
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    })
}

/// Scores an IP address for interface selection priority
pub fn interface_score(ip: &Ipv4Addr) -> u32 {
    let octets = ip.octets();
    match octets[0] {
        192 if octets[1] == 168 => 100, // 192.168.x.x - typical home/office LAN
        10 => 90,                       // 10.x.x.x - typical office LAN
        172 if octets[1] >= 16 && octets[1] <= 31 => 50, // 172.16-31.x.x - could be virtual
        _ => 70,                        // Other private IPs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_score_ordering() {
        let home = Ipv4Addr::new(192, 168, 1, 10);
        let office = Ipv4Addr::new(10, 0, 0, 5);
        let maybe_virtual = Ipv4Addr::new(172, 17, 0, 1);
        let other = Ipv4Addr::new(100, 64, 0, 1);

        assert!(interface_score(&home) > interface_score(&office));
        assert!(interface_score(&office) > interface_score(&other));
        assert!(interface_score(&other) > interface_score(&maybe_virtual));
    }

    #[test]
    fn test_virtual_adapter_names() {
        assert!(is_virtual_adapter_name("vethernet (wsl)"));
        assert!(is_virtual_adapter_name("vmware network adapter vmnet8"));
        assert!(is_virtual_adapter_name("docker0"));
        assert!(!is_virtual_adapter_name("eth0"));
        assert!(!is_virtual_adapter_name("wlan0"));
    }

    #[test]
    fn test_subnet_cidr_masks_host_bits() {
        let info = InterfaceInfo {
            name: "eth0".to_string(),
            ip: Ipv4Addr::new(192, 168, 1, 35),
            mac: MacAddr::new(0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF),
            prefix_len: 24,
        };
        assert_eq!(info.subnet_cidr().unwrap(), "192.168.1.0/24");
    }
}
