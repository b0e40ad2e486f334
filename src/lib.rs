//! Bluetooth LE heart rate acquisition.
//!
//! [`HeartRateMonitor`] discovers a heart rate strap, resolves its GATT
//! profile and streams decoded samples to a callback. A simulated device can
//! stand in for real hardware.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{ConnectionMode, HeartRateSample, MonitoringState};
pub use infrastructure::bluetooth::error::HeartRateError;
pub use infrastructure::bluetooth::HeartRateMonitor;
