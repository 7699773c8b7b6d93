//! LanSight — Home Network Visibility
//!
//! One binary, three roles:
//! - `scan`: one-shot diagnostic ping sweep
//! - `sensor`: periodic scans, router polls and heartbeats pushed to
//!   the central server
//! - `server`: JSON ingest API, SQLite store and the monitoring loop

#[tokio::main]
async fn main() {
    if let Err(e) = lansight::logging::init_logging() {
        eprintln!("[WARN] Failed to initialize structured logging: {}", e);
    }

    match lansight::app::run(std::env::args().skip(1)).await {
        Ok(()) => {}
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
