//! btleplug platform backend
//!
//! Implements [`BleBackend`] / [`BleDevice`] on top of the host Bluetooth
//! stack (BlueZ, CoreBluetooth or WinRT, whichever btleplug selects).

use crate::infrastructure::bluetooth::backend::{
    Advertisement, BleBackend, BleDevice, DeviceRequest, GattCharacteristic, GattService,
    NotificationStream,
};
use crate::infrastructure::bluetooth::error::BackendError;
use crate::infrastructure::bluetooth::protocol::AttributeId;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often the peripheral list is re-checked while a discovery scan runs
const DISCOVERY_POLL: Duration = Duration::from_millis(250);

/// Host Bluetooth adapter, if one exists
pub struct BtleplugBackend {
    adapter: Option<Adapter>,
}

impl BtleplugBackend {
    /// Probe the host for a Bluetooth adapter.
    ///
    /// A host without one still yields a backend; it just reports itself
    /// unsupported.
    pub async fn new() -> Self {
        let adapter = match Self::first_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("Bluetooth manager unavailable: {}", e);
                None
            }
        };
        if adapter.is_none() {
            warn!("No Bluetooth adapter found");
        }
        Self { adapter }
    }

    async fn first_adapter() -> Result<Option<Adapter>, BackendError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        Ok(adapters.into_iter().next())
    }

    fn adapter(&self) -> Result<&Adapter, BackendError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| BackendError::Unsupported("no Bluetooth adapter".into()))
    }

    async fn advertisement(peripheral: &Peripheral) -> Result<Option<Advertisement>, BackendError> {
        let Some(props) = peripheral.properties().await? else {
            return Ok(None);
        };
        Ok(Some(Advertisement {
            id: peripheral.id().to_string(),
            name: props.local_name,
            rssi: props.rssi,
            services: props.services,
        }))
    }

    /// Peripherals seen so far that have readable advertisement data
    async fn visible(adapter: &Adapter) -> Result<Vec<(Peripheral, Advertisement)>, BackendError> {
        let mut entries = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let advertisement = Self::advertisement(&peripheral).await;
            entries.push((peripheral, advertisement));
        }
        Ok(readable(entries))
    }

    async fn first_match(
        adapter: &Adapter,
        request: &DeviceRequest,
    ) -> Result<Option<(Peripheral, Advertisement)>, BackendError> {
        let deadline = Instant::now() + request.timeout;
        loop {
            let matched = Self::visible(adapter)
                .await?
                .into_iter()
                .find(|(_, advertisement)| request.filter.matches(advertisement));
            if matched.is_some() || Instant::now() >= deadline {
                return Ok(matched);
            }
            tokio::time::sleep(DISCOVERY_POLL).await;
        }
    }

    async fn stop_scan(adapter: &Adapter) {
        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }
}

/// Drop peripherals whose properties could not be read or are not known yet
fn readable<P>(
    entries: Vec<(P, Result<Option<Advertisement>, BackendError>)>,
) -> Vec<(P, Advertisement)> {
    entries
        .into_iter()
        .filter_map(|(peripheral, advertisement)| match advertisement {
            Ok(Some(advertisement)) => Some((peripheral, advertisement)),
            Ok(None) => None,
            Err(e) => {
                debug!("Skipping peripheral with unreadable properties: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, BackendError> {
        let adapter = self.adapter()?;

        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;

        let found = Self::visible(adapter).await;
        Self::stop_scan(adapter).await;

        Ok(found?
            .into_iter()
            .map(|(_, advertisement)| advertisement)
            .collect())
    }

    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> Result<Arc<dyn BleDevice>, BackendError> {
        let adapter = self.adapter()?;
        debug!("Scanning for device: {:?}", request.filter);

        // btleplug exposes every discovered service once connected, so the
        // optional service allowlist needs no platform counterpart here.
        adapter.start_scan(ScanFilter::default()).await?;

        let found = Self::first_match(adapter, request).await;
        Self::stop_scan(adapter).await;

        let (peripheral, advertisement) = found?.ok_or(BackendError::NotFound)?;
        info!(
            "Found device {} ({:?})",
            advertisement.id, advertisement.name
        );

        Ok(Arc::new(BtleplugDevice::new(
            adapter.clone(),
            peripheral,
            advertisement.name,
        )))
    }
}

/// A btleplug peripheral with a connection flag kept current from adapter events
pub struct BtleplugDevice {
    adapter: Adapter,
    peripheral: Peripheral,
    name: Option<String>,
    connected: Arc<watch::Sender<bool>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugDevice {
    fn new(adapter: Adapter, peripheral: Peripheral, name: Option<String>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            adapter,
            peripheral,
            name,
            connected: Arc::new(connected),
            event_task: Mutex::new(None),
        }
    }

    /// Follow adapter events and clear the connection flag on disconnect
    async fn watch_disconnects(&self) -> Result<(), BackendError> {
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let connected = self.connected.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        info!("Device {} disconnected", id);
                        connected.send_replace(false);
                        break;
                    }
                }
            }
        });

        if let Ok(mut slot) = self.event_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
        Ok(())
    }

    fn stop_watching(&self) {
        if let Ok(mut slot) = self.event_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    fn platform_characteristic(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<Characteristic, BackendError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
            .ok_or(BackendError::NotFound)
    }
}

#[async_trait]
impl BleDevice for BtleplugDevice {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;
        self.watch_disconnects().await?;
        self.connected.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.stop_watching();
        let result = self.peripheral.disconnect().await;
        self.connected.send_replace(false);
        result.map_err(BackendError::from)
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    async fn primary_service(&self, id: AttributeId) -> Result<GattService, BackendError> {
        let uuid = id.uuid();
        self.peripheral
            .services()
            .into_iter()
            .find(|s| s.primary && s.uuid == uuid)
            .map(|s| GattService { uuid: s.uuid })
            .ok_or(BackendError::NotFound)
    }

    async fn primary_services(&self) -> Result<Vec<GattService>, BackendError> {
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .filter(|s| s.primary)
            .map(|s| GattService { uuid: s.uuid })
            .collect())
    }

    async fn characteristic(
        &self,
        service: &GattService,
        id: AttributeId,
    ) -> Result<GattCharacteristic, BackendError> {
        let uuid = id.uuid();
        self.characteristics(service)
            .await?
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(BackendError::NotFound)
    }

    async fn characteristics(
        &self,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>, BackendError> {
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service.uuid)
            .ok_or(BackendError::NotFound)?;

        Ok(service
            .characteristics
            .into_iter()
            .map(|c| GattCharacteristic {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
            })
            .collect())
    }

    async fn read(&self, characteristic: &GattCharacteristic) -> Result<Vec<u8>, BackendError> {
        let platform = self.platform_characteristic(characteristic)?;
        Ok(self.peripheral.read(&platform).await?)
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        value: &[u8],
    ) -> Result<(), BackendError> {
        let platform = self.platform_characteristic(characteristic)?;
        self.peripheral
            .write(&platform, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream, BackendError> {
        let platform = self.platform_characteristic(characteristic)?;
        self.peripheral.subscribe(&platform).await?;

        let uuid = platform.uuid;
        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.filter_map(move |n| {
            futures::future::ready((n.uuid == uuid).then_some(n.value))
        })))
    }

    async fn unsubscribe(&self, characteristic: &GattCharacteristic) -> Result<(), BackendError> {
        let platform = self.platform_characteristic(characteristic)?;
        self.peripheral.unsubscribe(&platform).await?;
        Ok(())
    }
}

impl Drop for BtleplugDevice {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(id: &str) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: Some(format!("WHOOP {}", id)),
            rssi: Some(-60),
            services: Vec::new(),
        }
    }

    #[test]
    fn test_unreadable_peripherals_are_skipped() {
        let entries = vec![
            (1, Err(BackendError::Operation("properties unavailable".into()))),
            (2, Ok(None)),
            (3, Ok(Some(advertisement("3")))),
            (4, Err(BackendError::NotConnected)),
            (5, Ok(Some(advertisement("5")))),
        ];

        let kept: Vec<_> = readable(entries).into_iter().map(|(p, a)| (p, a.id)).collect();
        assert_eq!(kept, vec![(3, "3".to_string()), (5, "5".to_string())]);
    }
}
