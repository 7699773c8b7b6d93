//! LanSight — Home Network Visibility
//!
//! This crate provides the sensor and server halves of a small
//! network-visibility system:
//! - nmap-driven ping sweep and service/version port scanning
//! - Router/firewall polling (DD-WRT, OpenWrt, FortiGate, table scraping)
//! - Multi-source device merge with hostname backfill
//! - Central ingest server with SQLite storage
//! - Gateway-timeout and device-offline alerting with Pushover delivery

pub mod adapters;
pub mod app;
pub mod cli;
pub mod command_handlers;
pub mod config;
pub mod database;
pub mod logging;
pub mod merge;
pub mod models;
pub mod monitor;
pub mod net;
pub mod notify;
pub mod scan;
pub mod sensor;
pub mod server;

pub use config::Config;
pub use database::{Database, DeviceRow, PortRow, SensorRow};
pub use merge::{merge_sources, SourceBatch};
pub use models::{DeviceRecord, PortRecord, SensorHealthReport};
pub use monitor::MonitoringService;
pub use net::{
    find_interface_by_name, find_valid_interface, is_valid_hostname, is_valid_ip, is_valid_mac,
    list_valid_interfaces, normalize_mac, InterfaceInfo,
};
pub use notify::{LogNotifier, Notifier, PushoverNotifier};
pub use scan::ScanPipeline;
pub use server::{BatchOutcome, IngestError, IngestService};
