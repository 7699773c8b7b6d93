//! HTTP surface of the ingest server.
//!
//! Batch routes are the primary sensor interface; the single-record
//! routes keep the wire contract of older sensor builds. The whole
//! table is mounted both bare and under `/api` because deployed
//! sensors post to the prefixed paths.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::Config;
use crate::database::{queries, Database};
use crate::models::{DeviceRecord, SensorHealthReport};
use crate::monitor::MonitoringService;
use crate::notify::{notify_new_device, LogNotifier, Notifier, PushoverNotifier};
use crate::server::ingest::{IngestError, IngestService};

const CSRF_TOKEN_LENGTH: usize = 32;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub db: Database,
    pub notifier: Arc<dyn Notifier>,
    pub csrf_protection: bool,
    pub notify_new_devices: bool,
}

/// Build the full route table, mounted bare and under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/addDevices", post(add_devices))
        .route("/addPorts", post(add_ports))
        .route("/addDevice", post(add_device))
        .route("/addPort", post(add_port))
        .route("/sensorHealth", post(sensor_health))
        .route("/csrf", get(csrf_token))
        .route("/devices", get(list_devices))
        .route("/sensors", get(list_sensors))
        .route("/renameDevice", post(rename_device))
        .route("/deleteDevice", post(delete_device))
        .route("/deleteSensor", post(delete_sensor));

    Router::new()
        .nest("/api", api.clone())
        .merge(api)
        .with_state(state)
}

/// Bind the listener, start the monitoring loop and serve until the
/// process is torn down.
pub async fn run_server(config: &Config, db: Database) -> anyhow::Result<()> {
    let notifier: Arc<dyn Notifier> = match PushoverNotifier::from_config(&config.pushover) {
        Some(pushover) => Arc::new(pushover),
        None => Arc::new(LogNotifier),
    };

    let mut monitor =
        MonitoringService::new(db.clone(), config.monitor.clone(), Arc::clone(&notifier));
    monitor.start();

    let state = AppState {
        ingest: IngestService::new(db.clone(), config.server.staleness_threshold_minutes),
        db,
        notifier,
        csrf_protection: config.server.csrf_protection,
        notify_new_devices: config.pushover.notify_new_devices,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Ingest server listening");

    let result = axum::serve(listener, app)
        .await
        .context("Ingest server failed");

    monitor.stop().await;
    result
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn ingest_error_response(err: IngestError) -> Response {
    let status = match err {
        IngestError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err.to_string())
}

fn is_json_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

/// Decode a single-record JSON body.
fn decode_json(headers: &HeaderMap, body: &Bytes) -> Result<Value, Response> {
    if !is_json_request(headers) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Only JSON format supported",
        ));
    }
    serde_json::from_slice(body).map_err(|_| {
        error_response(StatusCode::BAD_REQUEST, "Only JSON format supported")
    })
}

/// Decode a batch body: a JSON object whose `key` field holds a list.
fn decode_batch(headers: &HeaderMap, body: &Bytes, key: &str) -> Result<Vec<Value>, Response> {
    let payload = decode_json(headers, body)?;
    let items = match payload.get(key) {
        Some(items) => items,
        None => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Missing '{}' field", key),
            ))
        }
    };
    match items.as_array() {
        Some(items) => Ok(items.clone()),
        None => Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("'{}' must be a list", key),
        )),
    }
}

/// Fire new-device notices without holding up the response.
fn spawn_new_device_notices(state: &AppState, created: Vec<DeviceRecord>) {
    if !state.notify_new_devices || created.is_empty() {
        return;
    }
    let notifier = Arc::clone(&state.notifier);
    tokio::spawn(async move {
        for device in created {
            let name = if device.hostname.is_empty() {
                device.mac.as_str()
            } else {
                device.hostname.as_str()
            };
            notify_new_device(notifier.as_ref(), name, &device.ip, &device.mac).await;
        }
    });
}

/// `POST /addDevices` with `{"devices": [...]}`.
async fn add_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let entries = match decode_batch(&headers, &body, "devices") {
        Ok(entries) => entries,
        Err(response) => return response,
    };

    match state.ingest.process_devices(&entries) {
        Ok(outcome) => {
            spawn_new_device_notices(&state, outcome.created_devices.clone());
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Device batch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `POST /addPorts` with `{"ports": [...]}`.
async fn add_ports(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let entries = match decode_batch(&headers, &body, "ports") {
        Ok(entries) => entries,
        Err(response) => return response,
    };

    match state.ingest.process_ports(&entries) {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            error!(error = %e, "Port batch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `POST /addDevice`, the single-record form.
async fn add_device(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let entry = match decode_json(&headers, &body) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match state.ingest.process_device(&entry) {
        Ok(outcome) => {
            if outcome.created {
                if let Ok(record) = serde_json::from_value::<DeviceRecord>(entry) {
                    let mac = record.mac.clone();
                    let record =
                        DeviceRecord::new(record.hostname, record.ip, &mac, record.vendor);
                    spawn_new_device_notices(&state, vec![record]);
                }
            }
            (StatusCode::OK, Json(json!({ "message": outcome.message }))).into_response()
        }
        Err(err) => ingest_error_response(err),
    }
}

/// `POST /addPort`, the single-record form.
async fn add_port(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let entry = match decode_json(&headers, &body) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match state.ingest.process_port(&entry) {
        Ok(outcome) => {
            (StatusCode::OK, Json(json!({ "message": outcome.message }))).into_response()
        }
        Err(err) => ingest_error_response(err),
    }
}

/// `POST /sensorHealth` heartbeat.
async fn sensor_health(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let entry = match decode_json(&headers, &body) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    let report: SensorHealthReport = match serde_json::from_value(entry) {
        Ok(report) => report,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                IngestError::UnknownSensorMac.to_string(),
            )
        }
    };

    match state.ingest.process_sensor_health(&report) {
        Ok(outcome) => {
            (StatusCode::OK, Json(json!({ "message": outcome.message }))).into_response()
        }
        Err(err) => ingest_error_response(err),
    }
}

/// `GET /csrf`. Sensors prime this before their first POST.
async fn csrf_token(State(state): State<AppState>) -> Response {
    if !state.csrf_protection {
        return (StatusCode::OK, "NOT_REQUIRED").into_response();
    }
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_TOKEN_LENGTH)
        .map(char::from)
        .collect();
    (StatusCode::OK, token).into_response()
}

/// `GET /devices`: every device ordered by IP with its ports nested.
async fn list_devices(State(state): State<AppState>) -> Response {
    let conn_arc = state.db.connection();
    let conn = match conn_arc.lock() {
        Ok(conn) => conn,
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned")
        }
    };

    let devices = match queries::get_all_devices(&conn) {
        Ok(devices) => devices,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut payload = Vec::with_capacity(devices.len());
    for device in devices {
        let ports = match queries::get_ports_for_device(&conn, device.id) {
            Ok(ports) => ports,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        let ports: Vec<Value> = ports
            .iter()
            .map(|port| {
                json!({
                    "id": port.id,
                    "port_num": port.port_num,
                    "protocol": port.protocol,
                    "name": port.name,
                    "product": port.product,
                    "version": port.version,
                    "first_seen": queries::format_datetime(&port.first_seen),
                    "last_seen": queries::format_datetime(&port.last_seen),
                })
            })
            .collect();

        payload.push(json!({
            "id": device.id,
            "name": device.name(),
            "hostname": device.hostname,
            "nickname": device.nickname,
            "ip": device.ip,
            "mac": device.mac,
            "vendor": device.vendor,
            "online": device.online(),
            "first_seen_today": device.first_seen_today(),
            "first_seen": queries::format_datetime(&device.first_seen),
            "last_seen": queries::format_datetime(&device.last_seen),
            "ports": ports,
        }));
    }

    (StatusCode::OK, Json(Value::Array(payload))).into_response()
}

/// `GET /sensors`: every sensor ordered by first sighting.
async fn list_sensors(State(state): State<AppState>) -> Response {
    let conn_arc = state.db.connection();
    let conn = match conn_arc.lock() {
        Ok(conn) => conn,
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned")
        }
    };

    let sensors = match queries::get_all_sensors(&conn) {
        Ok(sensors) => sensors,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let payload: Vec<Value> = sensors
        .iter()
        .map(|sensor| {
            json!({
                "id": sensor.id,
                "mac": sensor.mac,
                "hostname": sensor.hostname,
                "online": sensor.online(),
                "minutes_since_last_seen": sensor.time_since_last_seen(),
                "first_seen": queries::format_datetime(&sensor.first_seen),
                "last_seen": queries::format_datetime(&sensor.last_seen),
            })
        })
        .collect();

    (StatusCode::OK, Json(Value::Array(payload))).into_response()
}

#[derive(Deserialize)]
struct RenameRequest {
    device_id: i64,
    nickname: String,
}

/// `POST /renameDevice`: set the user-facing nickname.
async fn rename_device(
    State(state): State<AppState>,
    Json(request): Json<RenameRequest>,
) -> Response {
    let nickname = request.nickname.trim();
    if nickname.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Nickname cannot be empty");
    }

    let conn_arc = state.db.connection();
    let conn = match conn_arc.lock() {
        Ok(conn) => conn,
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned")
        }
    };

    match queries::rename_device(&conn, request.device_id, nickname) {
        Ok(true) => (StatusCode::OK, Json(json!({ "message": "Device renamed" }))).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Device not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
struct DeleteDeviceRequest {
    device_id: i64,
}

/// `POST /deleteDevice`: remove a device and its ports.
async fn delete_device(
    State(state): State<AppState>,
    Json(request): Json<DeleteDeviceRequest>,
) -> Response {
    let conn_arc = state.db.connection();
    let conn = match conn_arc.lock() {
        Ok(conn) => conn,
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned")
        }
    };

    match queries::delete_device(&conn, request.device_id) {
        Ok(true) => (StatusCode::OK, Json(json!({ "message": "Device deleted" }))).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Device not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
struct DeleteSensorRequest {
    sensor_id: i64,
}

/// `POST /deleteSensor`.
async fn delete_sensor(
    State(state): State<AppState>,
    Json(request): Json<DeleteSensorRequest>,
) -> Response {
    let conn_arc = state.db.connection();
    let conn = match conn_arc.lock() {
        Ok(conn) => conn,
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned")
        }
    };

    match queries::delete_sensor(&conn, request.sensor_id) {
        Ok(true) => (StatusCode::OK, Json(json!({ "message": "Sensor deleted" }))).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Sensor not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
