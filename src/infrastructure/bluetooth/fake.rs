//! Scripted in-memory Bluetooth platform for tests

use crate::infrastructure::bluetooth::backend::{
    Advertisement, BleBackend, BleDevice, DeviceRequest, GattCharacteristic, GattService,
    NotificationStream,
};
use crate::infrastructure::bluetooth::error::BackendError;
use crate::infrastructure::bluetooth::protocol::{
    expand_uuid, AttributeId, HEART_RATE_CONTROL_POINT, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};
use async_trait::async_trait;
use futures::channel::mpsc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub struct FakeBackend {
    supported: bool,
    deny_permission: AtomicBool,
    devices: Vec<(Advertisement, Arc<FakeDevice>)>,
    requests: Mutex<Vec<DeviceRequest>>,
}

impl FakeBackend {
    pub fn new(devices: Vec<(Advertisement, Arc<FakeDevice>)>) -> Self {
        Self {
            supported: true,
            deny_permission: AtomicBool::new(false),
            devices,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One advertising heart rate strap
    pub fn with_device(device: Arc<FakeDevice>) -> Self {
        let advertisement = Advertisement {
            id: device.id(),
            name: device.name(),
            rssi: Some(-60),
            services: vec![expand_uuid(HEART_RATE_SERVICE)],
        };
        Self::new(vec![(advertisement, device)])
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<DeviceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BleBackend for FakeBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement>, BackendError> {
        if !self.supported {
            return Err(BackendError::Unsupported("fake".into()));
        }
        Ok(self.devices.iter().map(|(a, _)| a.clone()).collect())
    }

    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> Result<Arc<dyn BleDevice>, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(BackendError::PermissionDenied);
        }
        self.devices
            .iter()
            .find(|(advertisement, _)| request.filter.matches(advertisement))
            .map(|(_, device)| device.clone() as Arc<dyn BleDevice>)
            .ok_or(BackendError::NotFound)
    }
}

/// A device whose GATT table and failure modes are set by the test
pub struct FakeDevice {
    id: String,
    name: Option<String>,
    services: Vec<(Uuid, Vec<Uuid>)>,
    pub fail_short_service_lookup: AtomicBool,
    pub fail_full_service_lookup: AtomicBool,
    pub fail_short_characteristic_lookup: AtomicBool,
    pub fail_full_characteristic_lookup: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_subscribe: AtomicBool,
    read_value: Mutex<Vec<u8>>,
    /// Scripted outcomes for successive writes; `true` fails that write
    write_failures: Mutex<VecDeque<bool>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    notifier: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connected: watch::Sender<bool>,
    pub reads: AtomicUsize,
    pub subscribes: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeDevice {
    pub fn new(name: &str, services: Vec<(Uuid, Vec<Uuid>)>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            id: format!("fake-{}", name.to_lowercase().replace(' ', "-")),
            name: Some(name.to_string()),
            services,
            fail_short_service_lookup: AtomicBool::new(false),
            fail_full_service_lookup: AtomicBool::new(false),
            fail_short_characteristic_lookup: AtomicBool::new(false),
            fail_full_characteristic_lookup: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            read_value: Mutex::new(vec![0x00, 72]),
            write_failures: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            notifier: Mutex::new(None),
            connected,
            reads: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Standard layout: battery service first, then heart rate with a control point
    pub fn heart_rate_strap(name: &str) -> Self {
        Self::new(
            name,
            vec![
                (expand_uuid(0x180F), vec![expand_uuid(0x2A19)]),
                (
                    expand_uuid(HEART_RATE_SERVICE),
                    vec![
                        expand_uuid(HEART_RATE_MEASUREMENT),
                        expand_uuid(HEART_RATE_CONTROL_POINT),
                    ],
                ),
            ],
        )
    }

    pub fn set_read_value(&self, value: Vec<u8>) {
        *self.read_value.lock().unwrap() = value;
    }

    pub fn script_write_failures(&self, outcomes: &[bool]) {
        self.write_failures.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// Push a notification as the firmware would; false if nobody listens
    pub fn notify(&self, value: Vec<u8>) -> bool {
        match self.notifier.lock().unwrap().as_ref() {
            Some(sender) => sender.unbounded_send(value).is_ok(),
            None => false,
        }
    }

    /// Device-initiated disconnect (power-off, out of range)
    pub fn power_off(&self) {
        self.connected.send_replace(false);
    }

    fn lookup_fails(&self, id: AttributeId, short: &AtomicBool, full: &AtomicBool) -> bool {
        match id {
            AttributeId::Short(_) => short.load(Ordering::SeqCst),
            AttributeId::Full(_) => full.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl BleDevice for FakeDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.connected.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.send_replace(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    async fn primary_service(&self, id: AttributeId) -> Result<GattService, BackendError> {
        if self.lookup_fails(
            id,
            &self.fail_short_service_lookup,
            &self.fail_full_service_lookup,
        ) {
            return Err(BackendError::NotFound);
        }
        self.services
            .iter()
            .find(|(uuid, _)| *uuid == id.uuid())
            .map(|(uuid, _)| GattService { uuid: *uuid })
            .ok_or(BackendError::NotFound)
    }

    async fn primary_services(&self) -> Result<Vec<GattService>, BackendError> {
        Ok(self
            .services
            .iter()
            .map(|(uuid, _)| GattService { uuid: *uuid })
            .collect())
    }

    async fn characteristic(
        &self,
        service: &GattService,
        id: AttributeId,
    ) -> Result<GattCharacteristic, BackendError> {
        if self.lookup_fails(
            id,
            &self.fail_short_characteristic_lookup,
            &self.fail_full_characteristic_lookup,
        ) {
            return Err(BackendError::NotFound);
        }
        self.characteristics(service)
            .await?
            .into_iter()
            .find(|c| c.uuid == id.uuid())
            .ok_or(BackendError::NotFound)
    }

    async fn characteristics(
        &self,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>, BackendError> {
        let (service_uuid, characteristics) = self
            .services
            .iter()
            .find(|(uuid, _)| *uuid == service.uuid)
            .ok_or(BackendError::NotFound)?;
        Ok(characteristics
            .iter()
            .map(|uuid| GattCharacteristic {
                uuid: *uuid,
                service_uuid: *service_uuid,
            })
            .collect())
    }

    async fn read(&self, _characteristic: &GattCharacteristic) -> Result<Vec<u8>, BackendError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::Operation("read not permitted".into()));
        }
        Ok(self.read_value.lock().unwrap().clone())
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        value: &[u8],
    ) -> Result<(), BackendError> {
        let fail = self.write_failures.lock().unwrap().pop_front().unwrap_or(false);
        if fail {
            return Err(BackendError::Operation("write rejected".into()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((characteristic.uuid, value.to_vec()));
        Ok(())
    }

    async fn subscribe(
        &self,
        _characteristic: &GattCharacteristic,
    ) -> Result<NotificationStream, BackendError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Unsupported("notifications".into()));
        }
        let (sender, receiver) = mpsc::unbounded();
        *self.notifier.lock().unwrap() = Some(sender);
        Ok(Box::pin(receiver))
    }

    async fn unsubscribe(&self, _characteristic: &GattCharacteristic) -> Result<(), BackendError> {
        // The sender is kept so tests can model firmware that keeps emitting
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
