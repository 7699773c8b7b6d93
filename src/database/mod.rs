//! SQLite persistence layer for devices, ports and sensors.

pub mod connection;
pub mod models;
pub mod queries;
pub mod schema;

pub use connection::Database;
pub use models::{DeviceRow, PortRow, SensorRow};
