pub mod config;
pub mod error;
pub mod permit;
pub mod telemetry;
