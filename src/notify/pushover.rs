//! Pushover delivery backend.

use std::future::Future;
use std::pin::Pin;

use crate::config::{PushoverConfig, ADAPTER_HTTP_TIMEOUT};

use super::Notifier;

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Notifier backed by the Pushover message API.
pub struct PushoverNotifier {
    client: reqwest::Client,
    api_token: String,
    user_key: String,
}

impl PushoverNotifier {
    /// Build from config. Returns `None` when notifications are
    /// disabled or credentials are missing, so the caller can fall
    /// back to log-only delivery.
    pub fn from_config(config: &PushoverConfig) -> Option<Self> {
        if !config.enabled {
            tracing::debug!("Pushover notifications are disabled");
            return None;
        }
        if config.api_token.is_empty() || config.user_key.is_empty() {
            tracing::error!("Pushover user_key or api_token not configured");
            return None;
        }

        let client = reqwest::Client::builder()
            .timeout(ADAPTER_HTTP_TIMEOUT)
            .build()
            .ok()?;

        Some(Self {
            client,
            api_token: config.api_token.clone(),
            user_key: config.user_key.clone(),
        })
    }
}

impl Notifier for PushoverNotifier {
    fn send<'a>(
        &'a self,
        message: &'a str,
        title: &'a str,
        priority: i8,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let priority_value = priority.to_string();
            let form = [
                ("token", self.api_token.as_str()),
                ("user", self.user_key.as_str()),
                ("message", message),
                ("title", title),
                ("priority", priority_value.as_str()),
            ];

            match self.client.post(PUSHOVER_API_URL).form(&form).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("Pushover notification sent: {} - {}", title, message);
                }
                Ok(response) => {
                    tracing::error!(
                        "Pushover API rejected notification '{}': {}",
                        title,
                        response.status()
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to send Pushover notification '{}': {}", title, e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_credentials() {
        let disabled = PushoverConfig::default();
        assert!(PushoverNotifier::from_config(&disabled).is_none());

        let no_creds = PushoverConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(PushoverNotifier::from_config(&no_creds).is_none());

        let configured = PushoverConfig {
            enabled: true,
            api_token: "token".to_string(),
            user_key: "user".to_string(),
            notify_new_devices: true,
        };
        assert!(PushoverNotifier::from_config(&configured).is_some());
    }
}
