//! Sensor side: the server API client and the periodic loops that
//! feed it.

pub mod client;
pub mod scheduler;

pub use client::ServerClient;
pub use scheduler::run_sensor;
