//! Configuration constants and the on-disk configuration file.
//!
//! Defaults live here as named constants; the TOML file under the
//! platform config directory overrides them per deployment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// HTTP timeout for router adapters and the sensor's server API client
pub const ADAPTER_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ====== Sensor Scheduler Intervals ======

/// Pause between ping sweeps (seconds)
pub const PING_SWEEP_INTERVAL_SECS: u64 = 20;

/// Delay before the first port scan, letting the first sweep land
pub const PORT_SCAN_INITIAL_DELAY_SECS: u64 = 60;

/// Pause between port scan rounds (seconds)
pub const PORT_SCAN_INTERVAL_SECS: u64 = 3540;

/// Pause between sensor health reports (seconds)
pub const HEALTH_REPORT_INTERVAL_SECS: u64 = 300;

/// Pause between router adapter polls (seconds)
pub const DEFAULT_ROUTER_POLL_INTERVAL_SECS: u64 = 300;

// ====== Monitoring Configuration ======

/// Default monitoring loop interval in seconds
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 300;

/// Minutes a sensor may be silent before it counts as timed out
pub const DEFAULT_GATEWAY_TIMEOUT_MINUTES: i64 = 10;

/// Lower clamp for the gateway timeout setting
pub const MIN_GATEWAY_TIMEOUT_MINUTES: i64 = 1;

/// Upper clamp for the gateway timeout setting (one day)
pub const MAX_GATEWAY_TIMEOUT_MINUTES: i64 = 1440;

/// Hours a device may be silent before it counts as offline
pub const DEVICE_OFFLINE_HOURS: i64 = 6;

/// Minutes a sensor may be silent before its status shows offline
pub const SENSOR_ONLINE_WINDOW_MINUTES: i64 = 5;

/// Re-notification cooldown for both alert kinds
pub const NOTIFICATION_COOLDOWN_HOURS: i64 = 24;

/// Bound on waiting for the monitoring loop to finish its in-flight check
pub const MONITOR_STOP_TIMEOUT_SECS: u64 = 10;

// ====== Server Ingest Configuration ======

/// Minutes within which an unchanged device record is "already fresh".
/// Zero means every sighting refreshes `last_seen`.
pub const DEFAULT_STALENESS_THRESHOLD_MINUTES: i64 = 0;

/// Default ingest bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Application directory name under the platform config/data dirs
pub const APP_DIR_NAME: &str = "lansight";

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub pushover: PushoverConfig,
}

/// Ingest server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the ingest API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite database location; platform data dir when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Whether the csrf endpoint hands out real tokens
    #[serde(default)]
    pub csrf_protection: bool,

    /// Freshness window for unchanged device records (minutes)
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_minutes: i64,
}

/// Sensor-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Base URL of the ingest server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Basic-auth username for the server, empty to skip auth
    #[serde(default)]
    pub server_username: String,

    /// Basic-auth password for the server
    #[serde(default)]
    pub server_password: String,

    /// Verify the server's TLS certificate
    #[serde(default = "default_true")]
    pub validate_server_identity: bool,

    /// Interface to scan from; auto-detected when empty
    #[serde(default)]
    pub interface: String,

    /// CIDR to sweep; derived from the interface when empty
    #[serde(default)]
    pub subnet: String,

    /// Seconds between router adapter polls
    #[serde(default = "default_router_poll_interval")]
    pub router_poll_interval_secs: u64,

    /// Routers/firewalls to poll for device listings
    #[serde(default)]
    pub routers: Vec<RouterConfig>,
}

/// One polled router/firewall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub kind: RouterKind,

    /// Base URL including scheme, e.g. "https://192.168.1.1"
    pub host: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Bearer token for API-key authenticated firewalls
    #[serde(default)]
    pub api_token: String,

    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

/// Supported router adapter families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    Ddwrt,
    Openwrt,
    Fortigate,
    Generic,
    Bezeq,
    Partner,
}

/// Monitoring loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between check passes
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Minutes before a silent sensor raises a gateway alert
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_minutes: i64,
}

/// Pushover notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushoverConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_token: String,

    #[serde(default)]
    pub user_key: String,

    /// Also alert when a never-before-seen device is ingested
    #[serde(default = "default_true")]
    pub notify_new_devices: bool,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_staleness_threshold() -> i64 {
    DEFAULT_STALENESS_THRESHOLD_MINUTES
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_router_poll_interval() -> u64 {
    DEFAULT_ROUTER_POLL_INTERVAL_SECS
}

fn default_monitor_interval() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

fn default_gateway_timeout() -> i64 {
    DEFAULT_GATEWAY_TIMEOUT_MINUTES
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: None,
            csrf_protection: false,
            staleness_threshold_minutes: default_staleness_threshold(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            server_username: String::new(),
            server_password: String::new(),
            validate_server_identity: true,
            interface: String::new(),
            subnet: String::new(),
            router_poll_interval_secs: default_router_poll_interval(),
            routers: Vec::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            gateway_timeout_minutes: default_gateway_timeout(),
        }
    }
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_token: String::new(),
            user_key: String::new(),
            notify_new_devices: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist. A present-but-unreadable file is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        }
    }

    /// Load from an explicit path or the platform default location.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_or_default(path),
            None => Self::load_or_default(Self::default_path()?),
        }
    }

    /// Platform default config file location.
    pub fn default_path() -> Result<PathBuf> {
        let base_dir = dirs::config_dir().context("Could not find config directory")?;
        Ok(base_dir.join(APP_DIR_NAME).join("config.toml"))
    }
}

impl MonitorConfig {
    /// Gateway timeout with out-of-range values pulled back to the default.
    pub fn effective_gateway_timeout(&self) -> i64 {
        let minutes = self.gateway_timeout_minutes;
        if !(MIN_GATEWAY_TIMEOUT_MINUTES..=MAX_GATEWAY_TIMEOUT_MINUTES).contains(&minutes) {
            tracing::warn!(
                "gateway_timeout_minutes {} outside [{}, {}], using default {}",
                minutes,
                MIN_GATEWAY_TIMEOUT_MINUTES,
                MAX_GATEWAY_TIMEOUT_MINUTES,
                DEFAULT_GATEWAY_TIMEOUT_MINUTES
            );
            return DEFAULT_GATEWAY_TIMEOUT_MINUTES;
        }
        minutes
    }
}
