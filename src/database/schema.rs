//! Database schema definitions
//!
//! Creates and manages the SQLite tables

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all database tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Devices table: unique devices by MAC address
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hostname TEXT NOT NULL DEFAULT '',
            nickname TEXT,
            ip TEXT NOT NULL DEFAULT '',
            mac TEXT UNIQUE NOT NULL,
            vendor TEXT NOT NULL DEFAULT '',
            first_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_notified_offline TEXT
        );

        -- Ports table: open service ports, one row per device and port number
        CREATE TABLE IF NOT EXISTS ports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            port_num INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            product TEXT NOT NULL DEFAULT '',
            version TEXT NOT NULL DEFAULT '',
            first_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_seen TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(device_id, port_num),
            FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
        );

        -- Sensors table: reporting sensors by MAC address
        CREATE TABLE IF NOT EXISTS sensors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mac TEXT UNIQUE NOT NULL,
            hostname TEXT NOT NULL DEFAULT '',
            first_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_notified_timeout TEXT
        );

        -- Indexes for performance
        CREATE INDEX IF NOT EXISTS idx_devices_mac ON devices(mac);
        CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen);
        CREATE INDEX IF NOT EXISTS idx_ports_device ON ports(device_id);
        CREATE INDEX IF NOT EXISTS idx_sensors_mac ON sensors(mac);
        CREATE INDEX IF NOT EXISTS idx_sensors_last_seen ON sensors(last_seen);
        "#,
    )
    .context("Failed to create database tables")?;

    Ok(())
}
