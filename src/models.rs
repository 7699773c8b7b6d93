//! Wire-level record types shared by sensors and the ingest server.

use serde::{Deserialize, Deserializer, Serialize};

use crate::net::normalize_mac;

/// A discovered host, as reported by adapters and the scan pipeline.
///
/// Transient: the server reconciles these into persisted device rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default, deserialize_with = "de_null_string")]
    pub hostname: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub ip: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub mac: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub vendor: String,
}

impl DeviceRecord {
    /// Build a record with the MAC canonicalized and the hostname
    /// falling back to the IP when the source had none.
    pub fn new(
        hostname: impl Into<String>,
        ip: impl Into<String>,
        mac: &str,
        vendor: impl Into<String>,
    ) -> Self {
        let ip = ip.into();
        let mut hostname = hostname.into();
        if hostname.is_empty() {
            hostname = ip.clone();
        }
        Self {
            hostname,
            ip,
            mac: normalize_mac(mac),
            vendor: vendor.into(),
        }
    }
}

/// One open service port on a device, keyed by the device MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    #[serde(default, deserialize_with = "de_null_string")]
    pub mac: String,

    /// Port number; tolerated as JSON string or number on the wire.
    #[serde(default, deserialize_with = "de_port_number")]
    pub port: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub protocol: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub name: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub product: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub version: String,
}

/// Sensor heartbeat payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorHealthReport {
    #[serde(default, deserialize_with = "de_null_string")]
    pub mac: String,

    #[serde(default, deserialize_with = "de_null_string")]
    pub hostname: String,
}

/// JSON null and absent both mean "empty string" for wire fields, so a
/// scanner sending `"version": null` fails per-item validation instead
/// of breaking the whole batch decode.
fn de_null_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_port_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => s,
        Some(Raw::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_mac_and_defaults_hostname() {
        let record = DeviceRecord::new("", "192.168.1.10", "aa:bb:cc:dd:ee:ff", "Unknown");
        assert_eq!(record.hostname, "192.168.1.10");
        assert_eq!(record.mac, "AABBCCDDEEFF");
        assert_eq!(record.vendor, "Unknown");

        let named = DeviceRecord::new("printer", "192.168.1.11", "AA-BB-CC-DD-EE-01", "Unknown");
        assert_eq!(named.hostname, "printer");
        assert_eq!(named.mac, "AABBCCDDEE01");
    }

    #[test]
    fn test_device_record_tolerates_nulls() {
        let record: DeviceRecord =
            serde_json::from_str(r#"{"hostname":null,"ip":"10.0.0.1","mac":"AABBCCDDEEFF"}"#)
                .expect("record with nulls should parse");
        assert_eq!(record.hostname, "");
        assert_eq!(record.ip, "10.0.0.1");
        assert_eq!(record.vendor, "");
    }

    #[test]
    fn test_port_number_as_string_or_number() {
        let from_number: PortRecord = serde_json::from_str(
            r#"{"mac":"AABBCCDDEEFF","port":80,"protocol":"tcp","name":"http"}"#,
        )
        .expect("numeric port should parse");
        assert_eq!(from_number.port, "80");

        let from_string: PortRecord = serde_json::from_str(
            r#"{"mac":"AABBCCDDEEFF","port":"443","protocol":"tcp","name":"https"}"#,
        )
        .expect("string port should parse");
        assert_eq!(from_string.port, "443");

        let from_null: PortRecord = serde_json::from_str(
            r#"{"mac":"AABBCCDDEEFF","port":null,"protocol":"tcp","name":"x"}"#,
        )
        .expect("null port should parse");
        assert_eq!(from_null.port, "");
    }

    #[test]
    fn test_port_defaults_for_missing_fields() {
        let record: PortRecord = serde_json::from_str(r#"{"mac":"AABBCCDDEEFF"}"#)
            .expect("sparse port record should parse");
        assert_eq!(record.port, "");
        assert_eq!(record.protocol, "");
        assert_eq!(record.product, "");
    }
}
