//! Curbwatch: parking detection and restriction alerting for street-parked
//! vehicles.
//!
//! The monitor actor fuses two debounced signal pipelines (peripheral
//! connectivity and the device motion classifier) into one parking state
//! machine. A confirmed park acquires a location fix, evaluates the four
//! restriction rules concurrently, notifies when the verdict is actionable,
//! and records the session to SQLite. See [`detection::ParkingMonitor`] for
//! the entry point.

pub mod config;
pub mod db;
pub mod detection;
pub mod geo;
pub mod models;
pub mod notify;
pub mod rules;
pub mod signal;
pub mod store;

pub use config::MonitorConfig;
pub use detection::{MonitorDeps, MonitorHandle, ParkingMonitor, ParkingState};

/// Initialize logging (reads RUST_LOG env var). Call once from the host
/// binary before starting the monitor.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
