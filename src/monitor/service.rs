//! Background monitoring loop.
//!
//! Periodically checks the store for sensors that stopped reporting
//! and nicknamed devices that dropped off the network. Every alert is
//! debounced with a 24h cooldown stamped on the row; the stamp write
//! is conditional on the previous value, so two concurrent passes
//! cannot double-send for the same row.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{
    MonitorConfig, DEVICE_OFFLINE_HOURS, MONITOR_STOP_TIMEOUT_SECS, NOTIFICATION_COOLDOWN_HOURS,
};
use crate::database::{queries, Database};
use crate::notify::{notify_device_offline, notify_gateway_timeout, Notifier};

/// Owns the check loop. Dropping the service leaves a running loop
/// behind; call [`MonitoringService::stop`] first.
pub struct MonitoringService {
    db: Database,
    config: MonitorConfig,
    notifier: Arc<dyn Notifier>,
    is_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MonitoringService {
    pub fn new(db: Database, config: MonitorConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            config,
            notifier,
            is_running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Start the check loop. Idempotent.
    pub fn start(&mut self) {
        if self.is_running.load(Ordering::SeqCst) {
            warn!("Monitoring loop already running");
            return;
        }
        self.is_running.store(true, Ordering::SeqCst);

        let db = self.db.clone();
        let config = self.config.clone();
        let notifier = Arc::clone(&self.notifier);
        let is_running = Arc::clone(&self.is_running);
        let interval = config.interval_secs;

        self.handle = Some(tokio::spawn(async move {
            info!(interval_secs = interval, "Monitoring loop started");

            while is_running.load(Ordering::SeqCst) {
                run_checks(&db, &config, notifier.as_ref()).await;

                // Sleep in 1s grains so stop() stays responsive.
                for _ in 0..interval {
                    if !is_running.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            info!("Monitoring loop stopped");
        }));
    }

    /// Stop the loop, waiting out an in-flight pass.
    pub async fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let limit = Duration::from_secs(MONITOR_STOP_TIMEOUT_SECS);
            if tokio::time::timeout(limit, handle).await.is_err() {
                warn!("Monitoring loop did not stop within {:?}", limit);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// One full pass. Safe to re-run; every alert is cooldown-gated.
    pub async fn run_once(&self) {
        run_checks(&self.db, &self.config, self.notifier.as_ref()).await;
    }
}

/// One monitoring pass. The two checks are isolated from each other;
/// a failing sensor check never blocks the device check.
async fn run_checks(db: &Database, config: &MonitorConfig, notifier: &dyn Notifier) {
    check_sensor_timeouts(db, config, notifier).await;
    check_offline_devices(db, notifier).await;
}

/// Alert on sensors that have been silent past the gateway timeout.
async fn check_sensor_timeouts(db: &Database, config: &MonitorConfig, notifier: &dyn Notifier) {
    let now = Utc::now();
    let cutoff = now - ChronoDuration::minutes(config.effective_gateway_timeout());
    let cooldown = now - ChronoDuration::hours(NOTIFICATION_COOLDOWN_HOURS);

    // Claim rows while holding the lock; send after releasing it.
    let mut pending: Vec<(String, i64)> = Vec::new();
    {
        let conn_arc = db.connection();
        let conn = match conn_arc.lock() {
            Ok(conn) => conn,
            Err(_) => {
                error!("Gateway timeout check skipped: database lock poisoned");
                return;
            }
        };

        let timed_out = match queries::get_timed_out_sensors(&conn, cutoff) {
            Ok(sensors) => sensors,
            Err(e) => {
                error!(error = %e, "Gateway timeout check failed");
                return;
            }
        };

        for sensor in timed_out {
            let due = match sensor.last_notified_timeout {
                None => true,
                Some(previous) => previous < cooldown,
            };
            if !due {
                continue;
            }

            match queries::mark_sensor_notified_timeout(
                &conn,
                sensor.id,
                now,
                sensor.last_notified_timeout,
            ) {
                Ok(true) => {
                    let name = if sensor.hostname.is_empty() {
                        sensor.mac.clone()
                    } else {
                        sensor.hostname.clone()
                    };
                    pending.push((name, sensor.time_since_last_seen()));
                }
                Ok(false) => {
                    debug!(sensor_id = sensor.id, "Timeout stamp claimed elsewhere, skipping")
                }
                Err(e) => {
                    error!(error = %e, sensor_id = sensor.id, "Failed to stamp sensor timeout")
                }
            }
        }

        match queries::clear_recovered_sensor_notifications(&conn, cutoff) {
            Ok(cleared) if cleared > 0 => {
                debug!(cleared, "Cleared timeout stamps for recovered sensors")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to clear recovered sensor stamps"),
        }
    }

    for (name, minutes) in pending {
        notify_gateway_timeout(notifier, &name, minutes).await;
    }
}

/// Alert on nicknamed devices that have not been seen for the offline
/// window. Devices without a nickname never alert.
async fn check_offline_devices(db: &Database, notifier: &dyn Notifier) {
    let now = Utc::now();
    let cutoff = now - ChronoDuration::hours(DEVICE_OFFLINE_HOURS);
    let cooldown = now - ChronoDuration::hours(NOTIFICATION_COOLDOWN_HOURS);

    let mut pending: Vec<(String, String, String)> = Vec::new();
    {
        let conn_arc = db.connection();
        let conn = match conn_arc.lock() {
            Ok(conn) => conn,
            Err(_) => {
                error!("Device offline check skipped: database lock poisoned");
                return;
            }
        };

        let offline = match queries::get_offline_notifiable_devices(&conn, cutoff) {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "Device offline check failed");
                return;
            }
        };

        for device in offline {
            let due = match device.last_notified_offline {
                None => true,
                Some(previous) => previous < cooldown,
            };
            if !due {
                continue;
            }

            match queries::mark_device_notified_offline(
                &conn,
                device.id,
                now,
                device.last_notified_offline,
            ) {
                Ok(true) => pending.push((
                    device.name().to_string(),
                    device.ip.clone(),
                    device.mac.clone(),
                )),
                Ok(false) => {
                    debug!(device_id = device.id, "Offline stamp claimed elsewhere, skipping")
                }
                Err(e) => {
                    error!(error = %e, device_id = device.id, "Failed to stamp device offline")
                }
            }
        }

        match queries::clear_recovered_device_notifications(&conn, cutoff) {
            Ok(cleared) if cleared > 0 => {
                debug!(cleared, "Cleared offline stamps for recovered devices")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to clear recovered device stamps"),
        }
    }

    for (name, ip, mac) in pending {
        notify_device_offline(notifier, &name, &ip, &mac).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceRecord;
    use rusqlite::params;
    use std::sync::Mutex;

    struct CaptureNotifier {
        sent: Arc<Mutex<Vec<(String, String, i8)>>>,
    }

    impl CaptureNotifier {
        fn new() -> (Self, Arc<Mutex<Vec<(String, String, i8)>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    impl Notifier for CaptureNotifier {
        fn send<'a>(
            &'a self,
            message: &'a str,
            title: &'a str,
            priority: i8,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.sent
                    .lock()
                    .unwrap()
                    .push((message.to_string(), title.to_string(), priority));
            })
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            interval_secs: 1,
            gateway_timeout_minutes: 10,
        }
    }

    fn seed_sensor(db: &Database, mac: &str, hostname: &str, minutes_ago: i64) {
        let conn_arc = db.connection();
        let conn = conn_arc.lock().unwrap();
        queries::upsert_sensor(&conn, mac, hostname).unwrap();
        conn.execute(
            "UPDATE sensors SET last_seen = datetime('now', ?1) WHERE mac = ?2",
            params![format!("-{} minutes", minutes_ago), mac],
        )
        .unwrap();
    }

    fn seed_device(db: &Database, mac: &str, nickname: Option<&str>, hours_ago: i64) {
        let conn_arc = db.connection();
        let conn = conn_arc.lock().unwrap();
        let record = DeviceRecord::new("host", "192.168.1.50", mac, "");
        let id = queries::insert_device(&conn, &record).unwrap();
        if let Some(nickname) = nickname {
            queries::rename_device(&conn, id, nickname).unwrap();
        }
        conn.execute(
            "UPDATE devices SET last_seen = datetime('now', ?1) WHERE id = ?2",
            params![format!("-{} hours", hours_ago), id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_gateway_timeout_fires_once_within_cooldown() {
        let db = Database::in_memory().unwrap();
        seed_sensor(&db, "001122334455", "attic", 30);

        let (notifier, sent) = CaptureNotifier::new();
        let service = MonitoringService::new(db, test_config(), Arc::new(notifier));

        service.run_once().await;
        service.run_once().await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Gateway Timeout Alert");
        assert_eq!(sent[0].2, 1);
        assert!(sent[0].0.contains("'attic'"));
    }

    #[tokio::test]
    async fn test_gateway_alert_rearms_after_recovery() {
        let db = Database::in_memory().unwrap();
        seed_sensor(&db, "001122334455", "attic", 30);

        let (notifier, sent) = CaptureNotifier::new();
        let service = MonitoringService::new(db.clone(), test_config(), Arc::new(notifier));

        service.run_once().await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        // Heartbeat arrives: the stamp clears on the next pass.
        {
            let conn_arc = db.connection();
            let conn = conn_arc.lock().unwrap();
            conn.execute(
                "UPDATE sensors SET last_seen = datetime('now') WHERE mac = '001122334455'",
                [],
            )
            .unwrap();
        }
        service.run_once().await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        // Silent again: a fresh alert goes out despite the old stamp
        // being inside the 24h window, because recovery cleared it.
        seed_sensor(&db, "001122334455", "attic", 30);
        service.run_once().await;
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_sensor_does_not_alert() {
        let db = Database::in_memory().unwrap();
        seed_sensor(&db, "001122334455", "attic", 2);

        let (notifier, sent) = CaptureNotifier::new();
        let service = MonitoringService::new(db, test_config(), Arc::new(notifier));
        service.run_once().await;

        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sensor_alert_falls_back_to_mac_name() {
        let db = Database::in_memory().unwrap();
        seed_sensor(&db, "001122334455", "", 30);

        let (notifier, sent) = CaptureNotifier::new();
        let service = MonitoringService::new(db, test_config(), Arc::new(notifier));
        service.run_once().await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("'001122334455'"));
    }

    #[tokio::test]
    async fn test_device_offline_requires_nickname() {
        let db = Database::in_memory().unwrap();
        seed_device(&db, "AABBCCDDEE01", None, 7);
        seed_device(&db, "AABBCCDDEE02", Some("Thermostat"), 7);

        let (notifier, sent) = CaptureNotifier::new();
        let service = MonitoringService::new(db, test_config(), Arc::new(notifier));
        service.run_once().await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Device Offline Alert");
        assert_eq!(sent[0].2, 0);
        assert!(sent[0].0.contains("Thermostat"));
        assert!(sent[0].0.contains("AABBCCDDEE02"));
    }

    #[tokio::test]
    async fn test_recent_device_does_not_alert() {
        let db = Database::in_memory().unwrap();
        seed_device(&db, "AABBCCDDEE02", Some("Thermostat"), 2);

        let (notifier, sent) = CaptureNotifier::new();
        let service = MonitoringService::new(db, test_config(), Arc::new(notifier));
        service.run_once().await;

        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let db = Database::in_memory().unwrap();
        let (notifier, _sent) = CaptureNotifier::new();
        let mut service = MonitoringService::new(db, test_config(), Arc::new(notifier));

        assert!(!service.is_running());
        service.start();
        assert!(service.is_running());

        // Second start is a no-op.
        service.start();
        assert!(service.is_running());

        service.stop().await;
        assert!(!service.is_running());
    }
}
