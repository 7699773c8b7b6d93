//! Strict field validation for ingested device records.
//!
//! Sensors normalize before sending, so the server rejects anything
//! that does not match these shapes instead of guessing.

use std::sync::OnceLock;

use regex::Regex;

fn mac_regexes() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("Invalid regex pattern"),
            Regex::new(r"^([0-9A-Fa-f]{2}-){5}[0-9A-Fa-f]{2}$").expect("Invalid regex pattern"),
            Regex::new(r"^[0-9A-Fa-f]{12}$").expect("Invalid regex pattern"),
        ]
    })
}

fn ipv4_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$",
        )
        .expect("Invalid regex pattern")
    })
}

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // DNS labels, with underscores tolerated since DHCP clients use them
    RE.get_or_init(|| {
        Regex::new(r"^(([A-Za-z0-9_]|[A-Za-z0-9_][A-Za-z0-9_\-]*[A-Za-z0-9_])\.)*([A-Za-z0-9_]|[A-Za-z0-9_][A-Za-z0-9_\-]*[A-Za-z0-9_])$")
            .expect("Invalid regex pattern")
    })
}

fn synthetic_hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Scanner fallback name, "ip (canonicalmac)"
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+\.\d+\s\(\w{12}\)$").expect("Invalid regex pattern")
    })
}

/// Accepts colon pairs, dash pairs or a bare twelve-digit hex run.
pub fn is_valid_mac(mac: &str) -> bool {
    mac_regexes().iter().any(|re| re.is_match(mac))
}

/// Dotted-quad IPv4 with per-octet range checks.
pub fn is_valid_ip(ip: &str) -> bool {
    ipv4_regex().is_match(ip)
}

/// DNS-style hostname, or the scanner's "ip (mac)" fallback form.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 255 {
        return false;
    }
    hostname_regex().is_match(hostname) || synthetic_hostname_regex().is_match(hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mac_forms() {
        assert!(is_valid_mac("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("AA-BB-CC-DD-EE-FF"));
        assert!(is_valid_mac("AABBCCDDEEFF"));
        assert!(is_valid_mac("aabbccddeeff"));
    }

    #[test]
    fn test_invalid_mac_forms() {
        assert!(!is_valid_mac(""));
        assert!(!is_valid_mac("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac("AA:BB:CC:DD:EE:FF:00"));
        assert!(!is_valid_mac("GG:BB:CC:DD:EE:FF"));
        assert!(!is_valid_mac("AABBCCDDEEF"));
        assert!(!is_valid_mac("AABBCCDDEEFF0"));
        assert!(!is_valid_mac("AA:BB-CC:DD-EE:FF"));
    }

    #[test]
    fn test_valid_ip() {
        assert!(is_valid_ip("192.168.1.1"));
        assert!(is_valid_ip("0.0.0.0"));
        assert!(is_valid_ip("255.255.255.255"));
        assert!(is_valid_ip("10.0.0.254"));
    }

    #[test]
    fn test_invalid_ip() {
        assert!(!is_valid_ip(""));
        assert!(!is_valid_ip("256.1.1.1"));
        assert!(!is_valid_ip("192.168.1"));
        assert!(!is_valid_ip("192.168.1.1.1"));
        assert!(!is_valid_ip("192.168.1.a"));
        assert!(!is_valid_ip("999.999.999.999"));
    }

    #[test]
    fn test_valid_hostname() {
        assert!(is_valid_hostname("router"));
        assert!(is_valid_hostname("my-laptop"));
        assert!(is_valid_hostname("host_name"));
        assert!(is_valid_hostname("a.b.c.example.com"));
        assert!(is_valid_hostname("x"));
    }

    #[test]
    fn test_synthetic_hostname() {
        assert!(is_valid_hostname("192.168.1.50 (AABBCCDDEEFF)"));
        assert!(!is_valid_hostname("192.168.1.50 (AABBCC)"));
    }

    #[test]
    fn test_invalid_hostname() {
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-leading-dash"));
        assert!(!is_valid_hostname("trailing-dash-"));
        assert!(!is_valid_hostname("has space"));
        assert!(!is_valid_hostname(&"a".repeat(256)));
    }
}
