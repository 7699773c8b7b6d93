//! Active scanning via nmap.

pub mod nmap;

pub use nmap::{parse_ping_sweep, parse_port_scan, ScanPipeline};
