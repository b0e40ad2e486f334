//! Platform Bluetooth abstraction
//!
//! The resolver, negotiator and delivery channel only talk to these traits,
//! which keeps them independent of the OS Bluetooth stack and lets tests
//! drive them with a scripted device.

use crate::infrastructure::bluetooth::error::BackendError;
use crate::infrastructure::bluetooth::protocol::AttributeId;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Characteristic value-change events
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// What a device must look like to be picked during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    NamePrefix(String),
    Services(Vec<Uuid>),
    AcceptAll,
}

impl DeviceFilter {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        match self {
            Self::NamePrefix(prefix) => advertisement
                .name
                .as_deref()
                .is_some_and(|name| name.starts_with(prefix.as_str())),
            Self::Services(services) => services
                .iter()
                .any(|uuid| advertisement.services.contains(uuid)),
            Self::AcceptAll => true,
        }
    }
}

/// A device pick request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub filter: DeviceFilter,
    /// Services that must stay reachable after pairing
    pub optional_services: Vec<Uuid>,
    /// How long to look before reporting `NotFound`
    pub timeout: Duration,
}

/// Advertising data seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GattService {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
}

/// Entry point into the host Bluetooth stack
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Whether the host exposes a usable BLE adapter. No side effects.
    fn is_supported(&self) -> bool;

    /// Scan for `duration` and report everything seen
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, BackendError>;

    /// Find the first device satisfying the request
    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> Result<Arc<dyn BleDevice>, BackendError>;
}

/// A single peripheral and its GATT server
#[async_trait]
pub trait BleDevice: Send + Sync {
    fn id(&self) -> String;

    fn name(&self) -> Option<String>;

    /// Connect the GATT server
    async fn connect(&self) -> Result<(), BackendError>;

    async fn disconnect(&self) -> Result<(), BackendError>;

    /// Transport's live connection flag
    fn is_connected(&self) -> bool;

    /// Flips to `false` when the device goes away (power-off, out of range)
    fn connection_watch(&self) -> watch::Receiver<bool>;

    async fn primary_service(&self, id: AttributeId) -> Result<GattService, BackendError>;

    async fn primary_services(&self) -> Result<Vec<GattService>, BackendError>;

    async fn characteristic(
        &self,
        service: &GattService,
        id: AttributeId,
    ) -> Result<GattCharacteristic, BackendError>;

    async fn characteristics(
        &self,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>, BackendError>;

    async fn read(&self, characteristic: &GattCharacteristic) -> Result<Vec<u8>, BackendError>;

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        value: &[u8],
    ) -> Result<(), BackendError>;

    /// Start notifications and return the value-change stream
    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream, BackendError>;

    async fn unsubscribe(&self, characteristic: &GattCharacteristic) -> Result<(), BackendError>;
}
