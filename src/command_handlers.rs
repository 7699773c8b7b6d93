use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::net::{find_interface_by_name, find_valid_interface, list_valid_interfaces};
use crate::scan::ScanPipeline;
use crate::sensor::run_sensor;
use crate::server::run_server;

pub(crate) async fn handle_interfaces() -> Result<()> {
    let interfaces = list_valid_interfaces();
    if interfaces.is_empty() {
        println!("No valid IPv4 network interfaces found.");
    } else {
        for interface in interfaces {
            println!("{}", interface);
        }
    }
    Ok(())
}

/// One-shot diagnostic sweep, results printed instead of pushed.
pub(crate) async fn handle_scan(interface: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config)?;

    let interface = match interface {
        Some(name) => find_interface_by_name(&name)?,
        None if !config.sensor.interface.is_empty() => {
            find_interface_by_name(&config.sensor.interface)?
        }
        None => find_valid_interface()?,
    };
    let subnet = if config.sensor.subnet.is_empty() {
        interface.subnet_cidr()?
    } else {
        config.sensor.subnet.clone()
    };

    info!(interface = %interface.name, subnet = %subnet, "Running one-shot scan");
    let mut pipeline = ScanPipeline::new(interface.name.clone(), subnet)?;
    let records = pipeline.ping_sweep().await.context("Ping sweep failed")?;

    if records.is_empty() {
        println!("No devices discovered.");
        return Ok(());
    }
    println!("{:<32} {:<16} {:<13} VENDOR", "HOSTNAME", "IP", "MAC");
    for record in records {
        println!(
            "{:<32} {:<16} {:<13} {}",
            record.hostname, record.ip, record.mac, record.vendor
        );
    }
    Ok(())
}

pub(crate) async fn handle_sensor(config: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config)?;
    run_sensor(&config).await
}

pub(crate) async fn handle_server(config: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config)?;

    let db_path = config
        .server
        .database_path
        .clone()
        .unwrap_or_else(Database::default_path);
    let db = Database::new(db_path).context("Failed to open device database")?;

    run_server(&config, db).await
}
