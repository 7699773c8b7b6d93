//! Device merge engine.
//!
//! Adapters produce one batch per source (DHCP leases, wireless
//! associations, session tables). Batches are combined in priority
//! order: the first source that reports a MAC owns its record. A
//! second pass backfills hostnames for records that only carry an IP,
//! using the lease batches as the naming authority.

use std::collections::HashMap;

use crate::models::DeviceRecord;

/// Records from one discovery source, in the adapter's priority order.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    /// Lease batches carry `(ip, mac, hostname)` triples and may name
    /// other records; liveness batches only prove presence.
    pub lease_like: bool,
    pub records: Vec<DeviceRecord>,
}

impl SourceBatch {
    pub fn leases(records: Vec<DeviceRecord>) -> Self {
        Self {
            lease_like: true,
            records,
        }
    }

    pub fn liveness(records: Vec<DeviceRecord>) -> Self {
        Self {
            lease_like: false,
            records,
        }
    }
}

/// Merge source batches into one device list.
///
/// First source presence wins per MAC. Records without a MAC are
/// dropped, as are lease records without an IP; liveness records may
/// carry an empty IP. Output preserves insertion order.
pub fn merge_sources(batches: Vec<SourceBatch>) -> Vec<DeviceRecord> {
    let mut merged: Vec<DeviceRecord> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut leases: Vec<DeviceRecord> = Vec::new();

    for batch in batches {
        for record in batch.records {
            if record.mac.is_empty() {
                continue;
            }
            if batch.lease_like && record.ip.is_empty() {
                continue;
            }
            if batch.lease_like {
                leases.push(record.clone());
            }
            if seen.contains_key(&record.mac) {
                continue;
            }
            seen.insert(record.mac.clone(), merged.len());
            merged.push(record);
        }
    }

    // Session and connected-device sources only know IPs; recover the
    // hostname from the first lease for the same MAC. The search stops
    // at that lease whether or not it carried a usable name.
    for record in &mut merged {
        if record.hostname != record.ip {
            continue;
        }
        if let Some(lease) = leases.iter().find(|lease| lease.mac == record.mac) {
            if lease.hostname != lease.ip {
                record.hostname = lease.hostname.clone();
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(hostname: &str, ip: &str, mac: &str) -> DeviceRecord {
        DeviceRecord::new(hostname, ip, mac, "Unknown")
    }

    #[test]
    fn test_first_source_wins() {
        let dhcp = SourceBatch::leases(vec![record("laptop", "192.168.1.10", "AABBCCDDEE01")]);
        let sessions = SourceBatch::liveness(vec![
            record("", "192.168.1.10", "AABBCCDDEE01"),
            record("", "192.168.1.20", "AABBCCDDEE02"),
        ]);

        let merged = merge_sources(vec![dhcp, sessions]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].hostname, "laptop");
        assert_eq!(merged[1].mac, "AABBCCDDEE02");
    }

    #[test]
    fn test_backfill_names_ip_only_records() {
        // Session records come first in priority, so they own the MAC,
        // but the lease still supplies the name.
        let sessions = SourceBatch::liveness(vec![record("", "192.168.1.30", "AABBCCDDEE03")]);
        let dhcp = SourceBatch::leases(vec![record("nas", "192.168.1.30", "AABBCCDDEE03")]);

        let merged = merge_sources(vec![sessions, dhcp]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hostname, "nas");
        assert_eq!(merged[0].ip, "192.168.1.30");
    }

    #[test]
    fn test_backfill_stops_at_first_matching_lease() {
        let sessions = SourceBatch::liveness(vec![record("", "192.168.1.40", "AABBCCDDEE04")]);
        // First lease for the MAC has no real name; the later one is
        // never consulted.
        let unnamed = SourceBatch::leases(vec![record("", "192.168.1.40", "AABBCCDDEE04")]);
        let named = SourceBatch::leases(vec![record("camera", "192.168.1.40", "AABBCCDDEE04")]);

        let merged = merge_sources(vec![sessions, unnamed, named]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hostname, "192.168.1.40");
    }

    #[test]
    fn test_liveness_records_may_lack_ip() {
        let wireless =
            SourceBatch::liveness(vec![record("AABBCCDDEE05", "", "AA:BB:CC:DD:EE:05")]);

        let merged = merge_sources(vec![wireless]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip, "");
        assert_eq!(merged[0].hostname, "AABBCCDDEE05");
    }

    #[test]
    fn test_invalid_records_dropped() {
        let dhcp = SourceBatch::leases(vec![
            record("no-ip", "", "AABBCCDDEE06"),
            record("ok", "192.168.1.50", "AABBCCDDEE07"),
        ]);
        let sessions = SourceBatch::liveness(vec![record("no-mac", "192.168.1.60", "")]);

        let merged = merge_sources(vec![dhcp, sessions]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hostname, "ok");
    }

    #[test]
    fn test_output_order_is_insertion_order() {
        let dhcp = SourceBatch::leases(vec![
            record("b", "192.168.1.2", "AABBCCDDEE12"),
            record("a", "192.168.1.1", "AABBCCDDEE11"),
        ]);
        let wireless = SourceBatch::liveness(vec![record("", "192.168.1.3", "AABBCCDDEE13")]);

        let merged = merge_sources(vec![dhcp, wireless]);

        let macs: Vec<&str> = merged.iter().map(|r| r.mac.as_str()).collect();
        assert_eq!(macs, vec!["AABBCCDDEE12", "AABBCCDDEE11", "AABBCCDDEE13"]);
    }
}
