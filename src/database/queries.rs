//! Database query functions
//!
//! CRUD operations for devices, ports, and sensors

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::*;
use crate::models::DeviceRecord;

/// Parameters used to insert a port record.
pub struct PortInsert<'a> {
    pub device_id: i64,
    pub port_num: i64,
    pub protocol: &'a str,
    pub name: &'a str,
    pub product: &'a str,
    pub version: &'a str,
}

/// Insert a new device from a discovery record
pub fn insert_device(conn: &Connection, record: &DeviceRecord) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO devices (hostname, ip, mac, vendor)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![record.hostname, record.ip, record.mac, record.vendor],
    )
    .context("Failed to insert device")?;

    Ok(conn.last_insert_rowid())
}

/// Refresh a known device from a new sighting
///
/// Hostname and ip are taken as reported; vendor only overwrites when
/// the sighting actually carried one.
pub fn update_device_sighting(
    conn: &Connection,
    device_id: i64,
    hostname: &str,
    ip: &str,
    vendor: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE devices SET
            hostname = ?2,
            ip = ?3,
            vendor = COALESCE(?4, vendor),
            last_seen = datetime('now')
        WHERE id = ?1
        "#,
        params![device_id, hostname, ip, vendor],
    )
    .context("Failed to update device")?;
    Ok(())
}

/// Get device by MAC address
pub fn get_device_by_mac(conn: &Connection, mac: &str) -> Result<Option<DeviceRow>> {
    let result = conn.query_row(
        r#"
        SELECT id, hostname, nickname, ip, mac, vendor,
               first_seen, last_seen, last_notified_offline
        FROM devices WHERE mac = ?1
        "#,
        params![mac],
        |row| {
            Ok(DeviceRow {
                id: row.get(0)?,
                hostname: row.get(1)?,
                nickname: row.get(2)?,
                ip: row.get(3)?,
                mac: row.get(4)?,
                vendor: row.get(5)?,
                first_seen: parse_datetime_column(row.get::<_, String>(6)?, 6)?,
                last_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
                last_notified_offline: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(8)?,
                    8,
                )?,
            })
        },
    );

    match result {
        Ok(device) => Ok(Some(device)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Get all devices whose MAC is in the given set (batch prefetch)
pub fn get_devices_by_macs(conn: &Connection, macs: &[String]) -> Result<Vec<DeviceRow>> {
    if macs.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = macs.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let query = format!(
        r#"
        SELECT id, hostname, nickname, ip, mac, vendor,
               first_seen, last_seen, last_notified_offline
        FROM devices WHERE mac IN ({})
        "#,
        placeholders
    );

    let mut stmt = conn.prepare(&query)?;
    let query_params: Vec<&dyn rusqlite::ToSql> =
        macs.iter().map(|m| m as &dyn rusqlite::ToSql).collect();

    let devices = stmt
        .query_map(query_params.as_slice(), |row| {
            Ok(DeviceRow {
                id: row.get(0)?,
                hostname: row.get(1)?,
                nickname: row.get(2)?,
                ip: row.get(3)?,
                mac: row.get(4)?,
                vendor: row.get(5)?,
                first_seen: parse_datetime_column(row.get::<_, String>(6)?, 6)?,
                last_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
                last_notified_offline: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(8)?,
                    8,
                )?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(devices)
}

/// Get all devices ordered by IP
pub fn get_all_devices(conn: &Connection) -> Result<Vec<DeviceRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, hostname, nickname, ip, mac, vendor,
               first_seen, last_seen, last_notified_offline
        FROM devices
        ORDER BY ip
        "#,
    )?;

    let devices = stmt
        .query_map([], |row| {
            Ok(DeviceRow {
                id: row.get(0)?,
                hostname: row.get(1)?,
                nickname: row.get(2)?,
                ip: row.get(3)?,
                mac: row.get(4)?,
                vendor: row.get(5)?,
                first_seen: parse_datetime_column(row.get::<_, String>(6)?, 6)?,
                last_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
                last_notified_offline: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(8)?,
                    8,
                )?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(devices)
}

/// Assign a user nickname; returns false when the device is unknown
pub fn rename_device(conn: &Connection, device_id: i64, nickname: &str) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE devices SET nickname = ?2 WHERE id = ?1",
            params![device_id, nickname],
        )
        .context("Failed to rename device")?;
    Ok(updated > 0)
}

/// Delete a device; its ports cascade
pub fn delete_device(conn: &Connection, device_id: i64) -> Result<bool> {
    let deleted = conn
        .execute("DELETE FROM devices WHERE id = ?1", params![device_id])
        .context("Failed to delete device")?;
    Ok(deleted > 0)
}

/// Devices silent past the cutoff that carry a nickname
///
/// Only nicknamed devices alert; transient guests come and go.
pub fn get_offline_notifiable_devices(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<DeviceRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, hostname, nickname, ip, mac, vendor,
               first_seen, last_seen, last_notified_offline
        FROM devices
        WHERE last_seen < ?1 AND nickname IS NOT NULL AND nickname != ''
        ORDER BY last_seen
        "#,
    )?;

    let devices = stmt
        .query_map(params![format_datetime(&cutoff)], |row| {
            Ok(DeviceRow {
                id: row.get(0)?,
                hostname: row.get(1)?,
                nickname: row.get(2)?,
                ip: row.get(3)?,
                mac: row.get(4)?,
                vendor: row.get(5)?,
                first_seen: parse_datetime_column(row.get::<_, String>(6)?, 6)?,
                last_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
                last_notified_offline: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(8)?,
                    8,
                )?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(devices)
}

/// Stamp a device's offline notification, conditional on the previous
/// stamp still matching. Returns false when another pass won the race.
pub fn mark_device_notified_offline(
    conn: &Connection,
    device_id: i64,
    stamp: DateTime<Utc>,
    expected_previous: Option<DateTime<Utc>>,
) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE devices SET last_notified_offline = ?2 \
             WHERE id = ?1 AND last_notified_offline IS ?3",
            params![
                device_id,
                format_datetime(&stamp),
                expected_previous.map(|dt| format_datetime(&dt))
            ],
        )
        .context("Failed to stamp device offline notification")?;
    Ok(updated == 1)
}

/// Clear offline stamps for devices seen again since the cutoff
pub fn clear_recovered_device_notifications(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        "UPDATE devices SET last_notified_offline = NULL \
         WHERE last_seen >= ?1 AND last_notified_offline IS NOT NULL",
        params![format_datetime(&cutoff)],
    )
    .context("Failed to clear recovered device notifications")
}

/// Get one port by its natural key
pub fn get_port(conn: &Connection, device_id: i64, port_num: i64) -> Result<Option<PortRow>> {
    let result = conn.query_row(
        r#"
        SELECT id, device_id, port_num, protocol, name, product, version,
               first_seen, last_seen
        FROM ports WHERE device_id = ?1 AND port_num = ?2
        "#,
        params![device_id, port_num],
        |row| {
            Ok(PortRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                port_num: row.get(2)?,
                protocol: row.get(3)?,
                name: row.get(4)?,
                product: row.get(5)?,
                version: row.get(6)?,
                first_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
                last_seen: parse_datetime_column(row.get::<_, String>(8)?, 8)?,
            })
        },
    );

    match result {
        Ok(port) => Ok(Some(port)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert a new port row
pub fn insert_port(conn: &Connection, insert: &PortInsert<'_>) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO ports (device_id, port_num, protocol, name, product, version)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            insert.device_id,
            insert.port_num,
            insert.protocol,
            insert.name,
            insert.product,
            insert.version,
        ],
    )
    .context("Failed to insert port")?;

    Ok(conn.last_insert_rowid())
}

/// Refresh a known port from a new scan
///
/// Unlike device vendor, scan-reported service details always
/// overwrite: the newest nmap run knows best.
pub fn update_port_sighting(
    conn: &Connection,
    port_id: i64,
    protocol: &str,
    name: &str,
    product: &str,
    version: &str,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE ports SET
            protocol = ?2,
            name = ?3,
            product = ?4,
            version = ?5,
            last_seen = datetime('now')
        WHERE id = ?1
        "#,
        params![port_id, protocol, name, product, version],
    )
    .context("Failed to update port")?;
    Ok(())
}

/// All ports for one device, ordered by port number
pub fn get_ports_for_device(conn: &Connection, device_id: i64) -> Result<Vec<PortRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, device_id, port_num, protocol, name, product, version,
               first_seen, last_seen
        FROM ports WHERE device_id = ?1
        ORDER BY port_num
        "#,
    )?;

    let ports = stmt
        .query_map(params![device_id], |row| {
            Ok(PortRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                port_num: row.get(2)?,
                protocol: row.get(3)?,
                name: row.get(4)?,
                product: row.get(5)?,
                version: row.get(6)?,
                first_seen: parse_datetime_column(row.get::<_, String>(7)?, 7)?,
                last_seen: parse_datetime_column(row.get::<_, String>(8)?, 8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ports)
}

/// Get sensor by MAC address
pub fn get_sensor_by_mac(conn: &Connection, mac: &str) -> Result<Option<SensorRow>> {
    let result = conn.query_row(
        r#"
        SELECT id, mac, hostname, first_seen, last_seen, last_notified_timeout
        FROM sensors WHERE mac = ?1
        "#,
        params![mac],
        |row| {
            Ok(SensorRow {
                id: row.get(0)?,
                mac: row.get(1)?,
                hostname: row.get(2)?,
                first_seen: parse_datetime_column(row.get::<_, String>(3)?, 3)?,
                last_seen: parse_datetime_column(row.get::<_, String>(4)?, 4)?,
                last_notified_timeout: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(5)?,
                    5,
                )?,
            })
        },
    );

    match result {
        Ok(sensor) => Ok(Some(sensor)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert a sensor or refresh its hostname and last_seen
pub fn upsert_sensor(conn: &Connection, mac: &str, hostname: &str) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE sensors SET hostname = ?2, last_seen = datetime('now') WHERE mac = ?1",
            params![mac, hostname],
        )
        .context("Failed to update sensor")?;

    if updated == 0 {
        conn.execute(
            "INSERT INTO sensors (mac, hostname) VALUES (?1, ?2)",
            params![mac, hostname],
        )
        .context("Failed to insert sensor")?;
    }

    Ok(())
}

/// All sensors, oldest first
pub fn get_all_sensors(conn: &Connection) -> Result<Vec<SensorRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, mac, hostname, first_seen, last_seen, last_notified_timeout
        FROM sensors
        ORDER BY first_seen
        "#,
    )?;

    let sensors = stmt
        .query_map([], |row| {
            Ok(SensorRow {
                id: row.get(0)?,
                mac: row.get(1)?,
                hostname: row.get(2)?,
                first_seen: parse_datetime_column(row.get::<_, String>(3)?, 3)?,
                last_seen: parse_datetime_column(row.get::<_, String>(4)?, 4)?,
                last_notified_timeout: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(5)?,
                    5,
                )?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(sensors)
}

/// Sensors silent past the cutoff
pub fn get_timed_out_sensors(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<SensorRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, mac, hostname, first_seen, last_seen, last_notified_timeout
        FROM sensors
        WHERE last_seen < ?1
        ORDER BY last_seen
        "#,
    )?;

    let sensors = stmt
        .query_map(params![format_datetime(&cutoff)], |row| {
            Ok(SensorRow {
                id: row.get(0)?,
                mac: row.get(1)?,
                hostname: row.get(2)?,
                first_seen: parse_datetime_column(row.get::<_, String>(3)?, 3)?,
                last_seen: parse_datetime_column(row.get::<_, String>(4)?, 4)?,
                last_notified_timeout: parse_optional_datetime_column(
                    row.get::<_, Option<String>>(5)?,
                    5,
                )?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(sensors)
}

/// Stamp a sensor's timeout notification, conditional on the previous
/// stamp still matching. Returns false when another pass won the race.
pub fn mark_sensor_notified_timeout(
    conn: &Connection,
    sensor_id: i64,
    stamp: DateTime<Utc>,
    expected_previous: Option<DateTime<Utc>>,
) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE sensors SET last_notified_timeout = ?2 \
             WHERE id = ?1 AND last_notified_timeout IS ?3",
            params![
                sensor_id,
                format_datetime(&stamp),
                expected_previous.map(|dt| format_datetime(&dt))
            ],
        )
        .context("Failed to stamp sensor timeout notification")?;
    Ok(updated == 1)
}

/// Clear timeout stamps for sensors heard from since the cutoff
pub fn clear_recovered_sensor_notifications(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        "UPDATE sensors SET last_notified_timeout = NULL \
         WHERE last_seen >= ?1 AND last_notified_timeout IS NOT NULL",
        params![format_datetime(&cutoff)],
    )
    .context("Failed to clear recovered sensor notifications")
}

/// Delete a sensor row
pub fn delete_sensor(conn: &Connection, sensor_id: i64) -> Result<bool> {
    let deleted = conn
        .execute("DELETE FROM sensors WHERE id = ?1", params![sensor_id])
        .context("Failed to delete sensor")?;
    Ok(deleted > 0)
}

/// Helper: format a chrono DateTime the way SQLite's datetime('now') does
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_datetime_column(s: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_str(&format!("{} +0000", s), "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_optional_datetime_column(
    s: Option<String>,
    column: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match s {
        Some(raw) => Ok(Some(parse_datetime_column(raw, column)?)),
        None => Ok(None),
    }
}
