//! Staleness monitoring over the device store.

pub mod service;

pub use service::MonitoringService;
