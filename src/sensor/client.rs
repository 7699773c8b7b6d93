//! HTTP client for the ingest server.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{SensorConfig, ADAPTER_HTTP_TIMEOUT};
use crate::models::{DeviceRecord, PortRecord, SensorHealthReport};

const CSRF_HEADER: &str = "X-CSRF-Token";

/// Pushes discovery batches and heartbeats to the central server.
pub struct ServerClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl ServerClient {
    pub fn new(config: &SensorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ADAPTER_HTTP_TIMEOUT)
            .danger_accept_invalid_certs(!config.validate_server_identity)
            .build()
            .context("Failed to build server API client")?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            username: config.server_username.clone(),
            password: config.server_password.clone(),
        })
    }

    /// Prime a CSRF token before a state-changing request. A server
    /// without CSRF protection answers `NOT_REQUIRED`.
    async fn csrf_token(&self) -> Result<String> {
        let url = format!("{}/api/csrf", self.base_url);
        let mut request = self.client.get(&url);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await.context("CSRF token request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("CSRF token request returned {}", status);
        }
        response.text().await.context("Failed to read CSRF token")
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let token = self.csrf_token().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Posting to server");

        let mut request = self.client.post(&url).header(CSRF_HEADER, token).json(body);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("POST {} returned a non-JSON body", path))?;

        if !status.is_success() {
            anyhow::bail!("POST {} returned {}: {}", path, status, payload);
        }
        Ok(payload)
    }

    fn log_batch_outcome(&self, what: &str, payload: &Value) {
        let success = payload
            .get("success_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        info!(success, "{} batch accepted", what);

        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            for error in errors {
                warn!(item = %error, "{} batch item rejected", what);
            }
        }
    }

    /// Push a merged device batch to `/api/addDevices`.
    pub async fn push_devices(&self, records: &[DeviceRecord]) -> Result<()> {
        if records.is_empty() {
            debug!("No devices to push");
            return Ok(());
        }
        let payload = self
            .post("/api/addDevices", &json!({ "devices": records }))
            .await?;
        self.log_batch_outcome("Device", &payload);
        Ok(())
    }

    /// Push a port-scan batch to `/api/addPorts`.
    pub async fn push_ports(&self, records: &[PortRecord]) -> Result<()> {
        if records.is_empty() {
            debug!("No ports to push");
            return Ok(());
        }
        let payload = self
            .post("/api/addPorts", &json!({ "ports": records }))
            .await?;
        self.log_batch_outcome("Port", &payload);
        Ok(())
    }

    /// Report this sensor's heartbeat to `/api/sensorHealth`.
    pub async fn push_health(&self, report: &SensorHealthReport) -> Result<()> {
        let payload = self
            .post("/api/sensorHealth", &serde_json::to_value(report)?)
            .await?;
        debug!(response = %payload, "Health report accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let config = SensorConfig {
            server_url: "http://server.lan:8080/".to_string(),
            ..Default::default()
        };
        let client = ServerClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://server.lan:8080");
    }
}
