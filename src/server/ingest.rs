//! Device, port and sensor ingest with idempotent reconciliation.
//!
//! Sensors push what they saw; the server decides row by row whether
//! that means insert, update or nothing. Validation failures are
//! per-item and never abort a batch.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::database::{queries, Database, DeviceRow};
use crate::models::{DeviceRecord, PortRecord, SensorHealthReport};
use crate::net::{is_valid_hostname, is_valid_ip, is_valid_mac, normalize_mac};

/// Per-item rejection reasons. Display strings are part of the wire
/// contract consumed by existing sensors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Must Supply MAC Address")]
    MissingDeviceMac,

    #[error("Invalid MAC Address")]
    InvalidMac,

    #[error("Invalid IP Address")]
    InvalidIp,

    #[error("Invalid Hostname")]
    InvalidHostname,

    #[error("Invalid device record")]
    InvalidDeviceRecord,

    #[error("missing mac address")]
    MissingPortMac,

    #[error("missing port number")]
    MissingPortNumber,

    #[error("invalid port number")]
    InvalidPortNumber,

    #[error("missing protocol")]
    MissingProtocol,

    #[error("missing port name")]
    MissingPortName,

    #[error("invalid port record")]
    InvalidPortRecord,

    #[error("device not found")]
    DeviceNotFound,

    #[error("Unknown Sensor MAC")]
    UnknownSensorMac,

    #[error("unknown sensor Hostname")]
    UnknownSensorHostname,

    #[error("{0}")]
    Database(String),
}

/// Result of ingesting one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub message: &'static str,
    /// True when a new device row was created (drives the new-device
    /// notification).
    pub created: bool,
}

/// One failed item in a batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchError {
    pub index: usize,
    pub error: String,
}

/// Aggregate result of a batch ingest.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub errors: Vec<BatchError>,
    /// Devices created by this batch; not part of the wire response.
    #[serde(skip)]
    pub created_devices: Vec<DeviceRecord>,
}

/// Reconciliation service over the shared device store.
#[derive(Clone)]
pub struct IngestService {
    db: Database,
    staleness_threshold_minutes: i64,
}

impl IngestService {
    pub fn new(db: Database, staleness_threshold_minutes: i64) -> Self {
        Self {
            db,
            staleness_threshold_minutes,
        }
    }

    /// Ingest one device record.
    pub fn process_device(&self, entry: &Value) -> Result<IngestOutcome, IngestError> {
        let conn_arc = self.db.connection();
        let conn = conn_arc
            .lock()
            .map_err(|_| IngestError::Database("database lock poisoned".to_string()))?;

        let mut known = self
            .prefetch_devices(&conn, std::slice::from_ref(entry))
            .map_err(|e| IngestError::Database(e.to_string()))?;

        self.apply_device(&conn, &mut known, entry).map(|(outcome, _)| outcome)
    }

    /// Ingest a batch of device records, one pre-fetch for the whole
    /// batch. Item failures are collected, not propagated.
    pub fn process_devices(&self, entries: &[Value]) -> Result<BatchOutcome> {
        let conn_arc = self.db.connection();
        let conn = conn_arc
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))?;

        let mut known = self
            .prefetch_devices(&conn, entries)
            .context("Failed to prefetch devices for batch")?;

        let mut outcome = BatchOutcome {
            success_count: 0,
            errors: Vec::new(),
            created_devices: Vec::new(),
        };

        for (index, entry) in entries.iter().enumerate() {
            match self.apply_device(&conn, &mut known, entry) {
                Ok((item, record)) => {
                    outcome.success_count += 1;
                    if item.created {
                        outcome.created_devices.push(record);
                    }
                }
                Err(e) => outcome.errors.push(BatchError {
                    index,
                    error: e.to_string(),
                }),
            }
        }

        Ok(outcome)
    }

    /// Ingest one port record.
    pub fn process_port(&self, entry: &Value) -> Result<IngestOutcome, IngestError> {
        let conn_arc = self.db.connection();
        let conn = conn_arc
            .lock()
            .map_err(|_| IngestError::Database("database lock poisoned".to_string()))?;

        let known = self
            .prefetch_devices(&conn, std::slice::from_ref(entry))
            .map_err(|e| IngestError::Database(e.to_string()))?;

        self.apply_port(&conn, &known, entry)
    }

    /// Ingest a batch of port records.
    pub fn process_ports(&self, entries: &[Value]) -> Result<BatchOutcome> {
        let conn_arc = self.db.connection();
        let conn = conn_arc
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))?;

        let known = self
            .prefetch_devices(&conn, entries)
            .context("Failed to prefetch devices for batch")?;

        let mut outcome = BatchOutcome {
            success_count: 0,
            errors: Vec::new(),
            created_devices: Vec::new(),
        };

        for (index, entry) in entries.iter().enumerate() {
            match self.apply_port(&conn, &known, entry) {
                Ok(_) => outcome.success_count += 1,
                Err(e) => outcome.errors.push(BatchError {
                    index,
                    error: e.to_string(),
                }),
            }
        }

        Ok(outcome)
    }

    /// Record a sensor heartbeat. Sensor MACs are stored as reported.
    pub fn process_sensor_health(
        &self,
        report: &SensorHealthReport,
    ) -> Result<IngestOutcome, IngestError> {
        if report.mac.is_empty() {
            return Err(IngestError::UnknownSensorMac);
        }
        if report.hostname.is_empty() {
            return Err(IngestError::UnknownSensorHostname);
        }

        let conn_arc = self.db.connection();
        let conn = conn_arc
            .lock()
            .map_err(|_| IngestError::Database("database lock poisoned".to_string()))?;

        queries::upsert_sensor(&conn, &report.mac, &report.hostname)
            .map_err(|e| IngestError::Database(format!("Error :{}", e)))?;

        Ok(IngestOutcome {
            message: "sensor information updated",
            created: false,
        })
    }

    /// One query for every MAC a batch mentions.
    fn prefetch_devices(
        &self,
        conn: &Connection,
        entries: &[Value],
    ) -> Result<HashMap<String, DeviceRow>> {
        let mut macs: Vec<String> = Vec::new();
        for entry in entries {
            if let Some(mac) = entry.get("mac").and_then(Value::as_str) {
                let normalized = normalize_mac(mac);
                if !normalized.is_empty() && !macs.contains(&normalized) {
                    macs.push(normalized);
                }
            }
        }

        let rows = queries::get_devices_by_macs(conn, &macs)?;
        Ok(rows.into_iter().map(|row| (row.mac.clone(), row)).collect())
    }

    fn apply_device(
        &self,
        conn: &Connection,
        known: &mut HashMap<String, DeviceRow>,
        entry: &Value,
    ) -> Result<(IngestOutcome, DeviceRecord), IngestError> {
        let mut record: DeviceRecord = serde_json::from_value(entry.clone())
            .map_err(|_| IngestError::InvalidDeviceRecord)?;
        record.mac = normalize_mac(&record.mac);

        if record.mac.is_empty() {
            return Err(IngestError::MissingDeviceMac);
        }
        if !is_valid_mac(&record.mac) {
            return Err(IngestError::InvalidMac);
        }
        if !record.ip.is_empty() && !is_valid_ip(&record.ip) {
            return Err(IngestError::InvalidIp);
        }
        if !record.hostname.is_empty() && !is_valid_hostname(&record.hostname) {
            return Err(IngestError::InvalidHostname);
        }

        let now = Utc::now();

        let existing = known.get(&record.mac).map(|row| {
            let unchanged = row.hostname == record.hostname && row.ip == record.ip;
            let fresh =
                row.last_seen > now - Duration::minutes(self.staleness_threshold_minutes);
            (row.id, unchanged && fresh)
        });

        match existing {
            None => {
                let id = queries::insert_device(conn, &record)
                    .map_err(|e| IngestError::Database(format!("Error adding device:{}", e)))?;
                known.insert(
                    record.mac.clone(),
                    DeviceRow {
                        id,
                        hostname: record.hostname.clone(),
                        nickname: None,
                        ip: record.ip.clone(),
                        mac: record.mac.clone(),
                        vendor: record.vendor.clone(),
                        first_seen: now,
                        last_seen: now,
                        last_notified_offline: None,
                    },
                );
                Ok((
                    IngestOutcome {
                        message: "Device added",
                        created: true,
                    },
                    record,
                ))
            }
            Some((_, true)) => Ok((
                IngestOutcome {
                    message: "No update needed",
                    created: false,
                },
                record,
            )),
            Some((device_id, false)) => {
                let vendor = if record.vendor.is_empty() {
                    None
                } else {
                    Some(record.vendor.as_str())
                };
                queries::update_device_sighting(conn, device_id, &record.hostname, &record.ip, vendor)
                    .map_err(|e| IngestError::Database(format!("Error updating device:{}", e)))?;

                if let Some(row) = known.get_mut(&record.mac) {
                    row.hostname = record.hostname.clone();
                    row.ip = record.ip.clone();
                    row.last_seen = now;
                    if !record.vendor.is_empty() {
                        row.vendor = record.vendor.clone();
                    }
                }

                Ok((
                    IngestOutcome {
                        message: "Device updated",
                        created: false,
                    },
                    record,
                ))
            }
        }
    }

    fn apply_port(
        &self,
        conn: &Connection,
        known: &HashMap<String, DeviceRow>,
        entry: &Value,
    ) -> Result<IngestOutcome, IngestError> {
        let mut record: PortRecord =
            serde_json::from_value(entry.clone()).map_err(|_| IngestError::InvalidPortRecord)?;
        record.mac = normalize_mac(&record.mac);

        if record.mac.is_empty() {
            return Err(IngestError::MissingPortMac);
        }
        if record.port.is_empty() {
            return Err(IngestError::MissingPortNumber);
        }
        if record.protocol.is_empty() {
            return Err(IngestError::MissingProtocol);
        }
        if record.name.is_empty() {
            return Err(IngestError::MissingPortName);
        }

        let port_num: u16 = record
            .port
            .parse()
            .map_err(|_| IngestError::InvalidPortNumber)?;

        let product = if record.product.is_empty() {
            "Unknown"
        } else {
            record.product.as_str()
        };
        let version = if record.version.is_empty() {
            "Unknown"
        } else {
            record.version.as_str()
        };

        let device = known
            .get(&record.mac)
            .ok_or(IngestError::DeviceNotFound)?;

        let existing = queries::get_port(conn, device.id, i64::from(port_num))
            .map_err(|e| IngestError::Database(format!("Error :{}", e)))?;

        match existing {
            None => {
                queries::insert_port(
                    conn,
                    &queries::PortInsert {
                        device_id: device.id,
                        port_num: i64::from(port_num),
                        protocol: &record.protocol,
                        name: &record.name,
                        product,
                        version,
                    },
                )
                .map_err(|e| IngestError::Database(format!("Error :{}", e)))?;
                Ok(IngestOutcome {
                    message: "port added",
                    created: false,
                })
            }
            Some(port) => {
                let fresh = port.last_seen
                    > Utc::now() - Duration::minutes(self.staleness_threshold_minutes);
                if fresh {
                    return Ok(IngestOutcome {
                        message: "no update needed",
                        created: false,
                    });
                }

                queries::update_port_sighting(
                    conn,
                    port.id,
                    &record.protocol,
                    &record.name,
                    product,
                    version,
                )
                .map_err(|e| IngestError::Database(format!("Error :{}", e)))?;
                Ok(IngestOutcome {
                    message: "port information updated",
                    created: false,
                })
            }
        }
    }
}
