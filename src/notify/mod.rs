//! Alert delivery.
//!
//! The monitor and the ingest path talk to a [`Notifier`]; delivery
//! failures are logged, never propagated, so a broken Pushover setup
//! cannot stall a check pass.

pub mod pushover;

use std::future::Future;
use std::pin::Pin;

pub use pushover::PushoverNotifier;

/// Sends one alert message. Implementations absorb their own errors.
pub trait Notifier: Send + Sync {
    fn send<'a>(
        &'a self,
        message: &'a str,
        title: &'a str,
        priority: i8,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Alert for a newly detected device.
pub async fn notify_new_device(notifier: &dyn Notifier, device_name: &str, ip: &str, mac: &str) {
    let message = format!(
        "New device detected:\nName: {}\nIP: {}\nMAC: {}",
        device_name, ip, mac
    );
    notifier.send(&message, "New Device Detected", 0).await;
}

/// Alert for a sensor that stopped reporting.
pub async fn notify_gateway_timeout(notifier: &dyn Notifier, sensor_name: &str, minutes_offline: i64) {
    let message = format!(
        "Gateway '{}' has not been detected for {} minutes",
        sensor_name, minutes_offline
    );
    notifier.send(&message, "Gateway Timeout Alert", 1).await;
}

/// Alert for a nicknamed device that went offline.
pub async fn notify_device_offline(notifier: &dyn Notifier, device_name: &str, ip: &str, mac: &str) {
    let message = format!(
        "Device went offline:\nName: {}\nIP: {}\nMAC: {}",
        device_name, ip, mac
    );
    notifier.send(&message, "Device Offline Alert", 0).await;
}

/// Fallback notifier that writes alerts to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send<'a>(
        &'a self,
        message: &'a str,
        title: &'a str,
        priority: i8,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!("Notification ({}, priority {}): {}", title, priority, message);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct CaptureNotifier {
        sent: Arc<Mutex<Vec<(String, String, i8)>>>,
    }

    impl Notifier for CaptureNotifier {
        fn send<'a>(
            &'a self,
            message: &'a str,
            title: &'a str,
            priority: i8,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            let sent = Arc::clone(&self.sent);
            let message = message.to_string();
            let title = title.to_string();
            Box::pin(async move {
                sent.lock().unwrap().push((message, title, priority));
            })
        }
    }

    #[tokio::test]
    async fn test_message_formats() {
        let notifier = CaptureNotifier::default();

        notify_gateway_timeout(&notifier, "attic-sensor", 42).await;
        notify_device_offline(&notifier, "Home NAS", "192.168.1.20", "AABBCCDDEE05").await;
        notify_new_device(&notifier, "printer", "192.168.1.30", "AABBCCDDEE06").await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(
            sent[0],
            (
                "Gateway 'attic-sensor' has not been detected for 42 minutes".to_string(),
                "Gateway Timeout Alert".to_string(),
                1
            )
        );
        assert_eq!(
            sent[1],
            (
                "Device went offline:\nName: Home NAS\nIP: 192.168.1.20\nMAC: AABBCCDDEE05"
                    .to_string(),
                "Device Offline Alert".to_string(),
                0
            )
        );
        assert_eq!(
            sent[2],
            (
                "New device detected:\nName: printer\nIP: 192.168.1.30\nMAC: AABBCCDDEE06"
                    .to_string(),
                "New Device Detected".to_string(),
                0
            )
        );
    }
}
