//! Bluetooth Module
//!
//! Heart rate acquisition over BLE GATT.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    HeartRateMonitor                      │
//! │   (connection manager - public API for the application)  │
//! └──────┬──────────────┬───────────────┬──────────────┬────┘
//!        │              │               │              │
//!        ▼              ▼               ▼              ▼
//! ┌────────────┐ ┌─────────────┐ ┌────────────┐ ┌───────────┐
//! │  Resolver  │ │ Control pt  │ │  Delivery  │ │  Scanner  │
//! │            │ │             │ │            │ │           │
//! │ - discover │ │ - enable    │ │ - notify   │ │ - listing │
//! │ - service  │ │   streaming │ │ - poll     │ │           │
//! │ - measure  │ │             │ │ - mock     │ │           │
//! └─────┬──────┘ └──────┬──────┘ └─────┬──────┘ └─────┬─────┘
//!       └───────────────┴──────┬───────┴──────────────┘
//!                              ▼
//!                 ┌─────────────────────────┐
//!                 │  BleBackend / BleDevice │
//!                 │  (btleplug platform)    │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Heart rate profile UUIDs and control point commands
//! - [`backend`] - Platform seam traits and GATT value types
//! - [`platform`] - btleplug implementation of the seam
//! - [`scanner`] - Device listing
//! - [`resolver`] - Device, service and characteristic resolution
//! - [`control_point`] - Best-effort streaming enable
//! - [`delivery`] - Notification, polling and simulated sample paths
//! - [`service`] - Connection manager
//! - [`error`] - Error taxonomy

pub mod backend;
pub mod control_point;
pub mod delivery;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod resolver;
pub mod scanner;
pub mod service;

#[cfg(test)]
pub(crate) mod fake;

// Re-export main service for convenience
pub use service::{DeviceHandle, HeartRateMonitor, MonitorConfig};
