//! Sensor scheduler.
//!
//! Every discovery source runs on its own periodic loop; a tick that
//! fails logs and waits for the next one, so a dead router or an
//! unreachable server never stalls the other sources. The two scan
//! phases share one pipeline and therefore one loop: the port scan
//! only runs between sweeps, never concurrently with one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::adapters::{source_for, DeviceSource};
use crate::config::{
    Config, HEALTH_REPORT_INTERVAL_SECS, PING_SWEEP_INTERVAL_SECS, PORT_SCAN_INITIAL_DELAY_SECS,
    PORT_SCAN_INTERVAL_SECS,
};
use crate::merge::merge_sources;
use crate::models::SensorHealthReport;
use crate::net::{find_interface_by_name, find_valid_interface, local_hostname, InterfaceInfo};
use crate::scan::ScanPipeline;
use crate::sensor::ServerClient;

/// Run the sensor until the process is torn down.
pub async fn run_sensor(config: &Config) -> Result<()> {
    info!("Starting up sensor");

    let interface = resolve_interface(&config.sensor.interface)?;
    let subnet = if config.sensor.subnet.is_empty() {
        interface.subnet_cidr()?
    } else {
        config.sensor.subnet.clone()
    };
    info!(
        interface = %interface.name,
        subnet = %subnet,
        "Sensor scanning configuration resolved"
    );

    let client = Arc::new(ServerClient::new(&config.sensor)?);

    let mut tasks = Vec::new();

    let pipeline = ScanPipeline::new(interface.name.clone(), subnet)?;
    tasks.push(tokio::spawn(scan_loop(pipeline, Arc::clone(&client))));

    for router in &config.sensor.routers {
        match source_for(router) {
            Ok(source) => {
                tasks.push(tokio::spawn(router_poll_loop(
                    source,
                    Arc::clone(&client),
                    config.sensor.router_poll_interval_secs,
                )));
            }
            Err(e) => warn!(host = %router.host, error = %e, "Skipping unusable router config"),
        }
    }

    let report = SensorHealthReport {
        mac: interface.mac.to_string(),
        hostname: local_hostname().to_string(),
    };
    tasks.push(tokio::spawn(health_loop(report, Arc::clone(&client))));

    // The loops never finish; a join here means a task panicked.
    for task in tasks {
        task.await.context("Sensor loop terminated unexpectedly")?;
    }
    Ok(())
}

fn resolve_interface(name: &str) -> Result<InterfaceInfo> {
    if name.is_empty() {
        find_valid_interface()
    } else {
        find_interface_by_name(name)
    }
}

/// Ping sweep on a short cadence; port scan folded into the same loop
/// so the two phases stay serialized over the shared mac -> ip cache.
async fn scan_loop(mut pipeline: ScanPipeline, client: Arc<ServerClient>) {
    let started = Instant::now();
    let mut last_port_scan: Option<Instant> = None;

    loop {
        match pipeline.ping_sweep().await {
            Ok(records) => {
                if let Err(e) = client.push_devices(&records).await {
                    error!(error = %e, "Failed to push ping sweep results");
                }
            }
            Err(e) => error!(error = %e, "Ping sweep failed"),
        }

        let port_scan_due = match last_port_scan {
            None => started.elapsed() >= Duration::from_secs(PORT_SCAN_INITIAL_DELAY_SECS),
            Some(last) => last.elapsed() >= Duration::from_secs(PORT_SCAN_INTERVAL_SECS),
        };
        if port_scan_due {
            last_port_scan = Some(Instant::now());
            match pipeline.port_scan().await {
                Ok(batches) => {
                    // The wire batch is flat; the per-host grouping only
                    // matters to callers that track which hosts scanned.
                    if let Err(e) = client.push_ports(&batches.concat()).await {
                        error!(error = %e, "Failed to push port scan results");
                    }
                }
                Err(e) => error!(error = %e, "Port scan failed"),
            }
        }

        sleep(Duration::from_secs(PING_SWEEP_INTERVAL_SECS)).await;
    }
}

/// Poll one router adapter and push the merged view.
async fn router_poll_loop(
    source: Box<dyn DeviceSource>,
    client: Arc<ServerClient>,
    interval_secs: u64,
) {
    loop {
        let batches = source.discover().await;
        let devices = merge_sources(batches);
        info!(
            source = source.name(),
            count = devices.len(),
            "Router poll complete"
        );

        if let Err(e) = client.push_devices(&devices).await {
            error!(source = source.name(), error = %e, "Failed to push router devices");
        }

        sleep(Duration::from_secs(interval_secs)).await;
    }
}

/// Report this sensor's own heartbeat.
async fn health_loop(report: SensorHealthReport, client: Arc<ServerClient>) {
    loop {
        info!("Reporting sensor health");
        if let Err(e) = client.push_health(&report).await {
            error!(error = %e, "Failed to report sensor health");
        }
        sleep(Duration::from_secs(HEALTH_REPORT_INTERVAL_SECS)).await;
    }
}
