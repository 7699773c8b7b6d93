//! MAC address canonicalization.
//!
//! Routers report MACs in several shapes: colon pairs, dash pairs or a
//! bare hex run. Storage and lookups use one canonical form, twelve
//! uppercase hex digits with no separators.

use std::sync::OnceLock;

use regex::Regex;

fn dashed_mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9A-Fa-f]{2}-){5}[0-9A-Fa-f]{2}$").expect("Invalid regex pattern")
    })
}

fn colon_mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("Invalid regex pattern")
    })
}

/// Canonicalize a MAC address to twelve uppercase hex digits.
///
/// Dash-separated and colon-separated pair forms lose their separators.
/// Anything else passes through unchanged apart from uppercasing, so
/// validation still rejects malformed input downstream.
pub fn normalize_mac(mac: &str) -> String {
    let stripped = if dashed_mac_regex().is_match(mac) {
        mac.replace('-', "")
    } else if colon_mac_regex().is_match(mac) {
        mac.replace(':', "")
    } else {
        mac.to_string()
    };
    stripped.to_uppercase()
}
