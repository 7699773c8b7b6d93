//! Database models
//!
//! Structs for database records with serialization support

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEVICE_OFFLINE_HOURS, SENSOR_ONLINE_WINDOW_MINUTES};

/// Device record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRow {
    pub id: i64,
    pub hostname: String,
    pub nickname: Option<String>,
    pub ip: String,
    pub mac: String,
    pub vendor: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_notified_offline: Option<DateTime<Utc>>,
}

impl DeviceRow {
    /// Display name: user nickname when assigned, discovered hostname
    /// otherwise.
    pub fn name(&self) -> &str {
        match &self.nickname {
            Some(nickname) if !nickname.is_empty() => nickname,
            _ => &self.hostname,
        }
    }

    /// Seen within the offline window.
    pub fn online(&self) -> bool {
        self.last_seen >= Utc::now() - Duration::hours(DEVICE_OFFLINE_HOURS)
    }

    /// First discovered within the last day.
    pub fn first_seen_today(&self) -> bool {
        self.first_seen >= Utc::now() - Duration::hours(24)
    }
}

/// Port record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRow {
    pub id: i64,
    pub device_id: i64,
    pub port_num: i64,
    pub protocol: String,
    pub name: String,
    pub product: String,
    pub version: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Sensor record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorRow {
    pub id: i64,
    pub mac: String,
    pub hostname: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_notified_timeout: Option<DateTime<Utc>>,
}

impl SensorRow {
    /// Heartbeat received recently enough to count as online.
    pub fn online(&self) -> bool {
        self.last_seen >= Utc::now() - Duration::minutes(SENSOR_ONLINE_WINDOW_MINUTES)
    }

    /// Whole minutes since the last heartbeat.
    pub fn time_since_last_seen(&self) -> i64 {
        (Utc::now() - self.last_seen).num_minutes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(nickname: Option<&str>, last_seen: DateTime<Utc>) -> DeviceRow {
        DeviceRow {
            id: 1,
            hostname: "printer".to_string(),
            nickname: nickname.map(String::from),
            ip: "192.168.1.20".to_string(),
            mac: "AABBCCDDEEFF".to_string(),
            vendor: "Unknown".to_string(),
            first_seen: last_seen,
            last_seen,
            last_notified_offline: None,
        }
    }

    #[test]
    fn test_name_prefers_nickname() {
        let now = Utc::now();
        assert_eq!(device(None, now).name(), "printer");
        assert_eq!(device(Some(""), now).name(), "printer");
        assert_eq!(device(Some("Office Printer"), now).name(), "Office Printer");
    }

    #[test]
    fn test_device_online_window() {
        let now = Utc::now();
        assert!(device(None, now).online());
        assert!(device(None, now - Duration::hours(5)).online());
        assert!(!device(None, now - Duration::hours(7)).online());
    }

    #[test]
    fn test_first_seen_today() {
        let now = Utc::now();
        assert!(device(None, now - Duration::hours(2)).first_seen_today());
        let mut old = device(None, now);
        old.first_seen = now - Duration::hours(30);
        assert!(!old.first_seen_today());
    }

    #[test]
    fn test_sensor_online_and_minutes() {
        let sensor = SensorRow {
            id: 1,
            mac: "AABBCCDDEEFF".to_string(),
            hostname: "sensor-1".to_string(),
            first_seen: Utc::now() - Duration::minutes(90),
            last_seen: Utc::now() - Duration::minutes(3),
            last_notified_timeout: None,
        };
        assert!(sensor.online());
        assert_eq!(sensor.time_since_last_seen(), 3);

        let silent = SensorRow {
            last_seen: Utc::now() - Duration::minutes(12),
            ..sensor
        };
        assert!(!silent.online());
        assert_eq!(silent.time_since_last_seen(), 12);
    }
}
