//! Heart Rate Monitor Service
//!
//! Single entry point for heart rate acquisition. Owns at most one
//! connection (real or mock) and composes the resolver, the control point
//! negotiator and the delivery channel behind it.

use crate::domain::models::{
    ConnectionMode, ConnectionStatus, HeartRateSample, LastReading, MessageSeverity,
    MonitorEvent, MonitoringState, ScannedDevice, StatusMessage,
};
use crate::domain::settings::BleSettings;
use crate::domain::simulator::MockSimulator;
use crate::infrastructure::bluetooth::backend::{
    BleBackend, BleDevice, GattCharacteristic, GattService,
};
use crate::infrastructure::bluetooth::control_point::ControlPointNegotiator;
use crate::infrastructure::bluetooth::delivery::{
    ActiveDelivery, DeliveryChannel, SampleCallback, SampleSink, MIN_TICK_INTERVAL,
};
use crate::infrastructure::bluetooth::error::HeartRateError;
use crate::infrastructure::bluetooth::resolver::DeviceResolver;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const MOCK_DEVICE_ID: &str = "mock-heart-rate-device";
const MOCK_DEVICE_NAME: &str = "Mock Heart Rate Monitor";

/// Runtime configuration, derived from [`BleSettings`]
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub device_name_prefix: String,
    pub scan_timeout: Duration,
    pub scan_duration: Duration,
    pub poll_interval: Duration,
    pub mock_tick_interval: Duration,
    pub control_point_delay: Duration,
    pub start_in_mock_mode: bool,
    pub raw_data_logging: bool,
}

impl From<&BleSettings> for MonitorConfig {
    fn from(settings: &BleSettings) -> Self {
        Self {
            device_name_prefix: settings.device_name_prefix.clone(),
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
            scan_duration: Duration::from_millis(settings.scan_duration_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms).max(MIN_TICK_INTERVAL),
            mock_tick_interval: Duration::from_millis(settings.mock_tick_interval_ms)
                .max(MIN_TICK_INTERVAL),
            control_point_delay: Duration::from_millis(settings.control_point_delay_ms),
            start_in_mock_mode: settings.start_in_mock_mode,
            raw_data_logging: settings.debug_raw_data_logging,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&BleSettings::default())
    }
}

/// Resolved GATT attributes of a real connection
#[derive(Clone)]
pub struct GattSession {
    device: Arc<dyn BleDevice>,
    service: GattService,
    measurement: GattCharacteristic,
    control_point: Option<GattCharacteristic>,
    /// Set once a read fails; polling stays off for this connection
    polling_disabled: Arc<AtomicBool>,
}

impl GattSession {
    pub fn device(&self) -> &Arc<dyn BleDevice> {
        &self.device
    }

    pub fn service(&self) -> &GattService {
        &self.service
    }

    pub fn measurement(&self) -> &GattCharacteristic {
        &self.measurement
    }

    pub fn control_point(&self) -> Option<&GattCharacteristic> {
        self.control_point.as_ref()
    }

    pub fn is_polling_disabled(&self) -> bool {
        self.polling_disabled.load(Ordering::SeqCst)
    }
}

struct HandleInner {
    id: String,
    name: Option<String>,
    mode: ConnectionMode,
    session: Option<GattSession>,
}

/// The live connection. Clones refer to the same connection; a handle from
/// a torn-down connection never compares equal to a later one.
#[derive(Clone)]
pub struct DeviceHandle(Arc<HandleInner>);

impl DeviceHandle {
    fn mock() -> Self {
        Self(Arc::new(HandleInner {
            id: MOCK_DEVICE_ID.to_string(),
            name: Some(MOCK_DEVICE_NAME.to_string()),
            mode: ConnectionMode::Mock,
            session: None,
        }))
    }

    fn real(session: GattSession) -> Self {
        Self(Arc::new(HandleInner {
            id: session.device.id(),
            name: session.device.name(),
            mode: ConnectionMode::Real,
            session: Some(session),
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.0.mode
    }

    /// `None` for a mock connection
    pub fn session(&self) -> Option<&GattSession> {
        self.0.session.as_ref()
    }

    /// Whether both handles refer to the same connection
    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn is_connected(&self) -> bool {
        match &self.0.session {
            Some(session) => session.device.is_connected(),
            None => self.0.mode == ConnectionMode::Mock,
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("mode", &self.0.mode)
            .finish()
    }
}

#[derive(Default)]
struct MonitorState {
    mock_mode: bool,
    status: ConnectionStatus,
    connection: Option<DeviceHandle>,
    delivery: ActiveDelivery,
    disconnect_watch: Option<JoinHandle<()>>,
}

/// State shared with the disconnect watcher
struct Shared {
    state: Mutex<MonitorState>,
    /// Serializes connect, monitoring changes, disconnect and the
    /// external-disconnect reset
    lifecycle: tokio::sync::Mutex<()>,
    sink: SampleSink,
    simulator: Arc<Mutex<MockSimulator>>,
    event_sender: mpsc::UnboundedSender<MonitorEvent>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state().status = status;
        let _ = self.event_sender.send(MonitorEvent::ConnectionStatus(status));
    }

    fn log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.event_sender.send(MonitorEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    /// Clear the callback and cancel every delivery path
    async fn stop_delivery(&self) {
        self.sink.clear_callback();
        let mut delivery = std::mem::take(&mut self.state().delivery);
        delivery.shutdown().await;
    }

    /// Drop all local state after the device went away on its own
    async fn reset_after_external_disconnect(&self, handle: &DeviceHandle) {
        let _lifecycle = self.lifecycle.lock().await;

        let delivery = {
            let mut state = self.state();
            let current = state
                .connection
                .as_ref()
                .is_some_and(|connection| connection.same_device(handle));
            if !current {
                return;
            }
            state.connection = None;
            // This is the watcher's own handle; dropping it detaches.
            state.disconnect_watch = None;
            std::mem::take(&mut state.delivery)
        };

        self.sink.clear_callback();
        // The device is gone, so there is nothing to unsubscribe from.
        drop(delivery);

        warn!("Device {} disconnected unexpectedly", handle.id());
        self.set_status(ConnectionStatus::Disconnected);
        self.log(
            format!("{} disconnected", handle.name().unwrap_or(handle.id())),
            MessageSeverity::Warning,
        );
    }
}

/// Connects to one heart rate device and streams its samples to a callback
pub struct HeartRateMonitor {
    backend: Arc<dyn BleBackend>,
    config: MonitorConfig,
    resolver: DeviceResolver,
    negotiator: ControlPointNegotiator,
    channel: DeliveryChannel,
    scanner: BleScanner,
    shared: Arc<Shared>,
}

impl HeartRateMonitor {
    pub fn new(
        backend: Arc<dyn BleBackend>,
        config: MonitorConfig,
        event_sender: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(MonitorState {
                mock_mode: config.start_in_mock_mode,
                ..MonitorState::default()
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            sink: SampleSink::new(config.raw_data_logging),
            simulator: Arc::new(Mutex::new(MockSimulator::new())),
            event_sender,
        });

        Self {
            backend,
            resolver: DeviceResolver::new(config.device_name_prefix.clone(), config.scan_timeout),
            negotiator: ControlPointNegotiator::new(config.control_point_delay),
            channel: DeliveryChannel::new(config.poll_interval, config.mock_tick_interval),
            scanner: BleScanner::new(config.device_name_prefix.clone()),
            config,
            shared,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Whether the host has a usable Bluetooth adapter
    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    /// Use the simulator on the next `connect()`
    pub fn enable_mock_mode(&self) {
        self.shared.state().mock_mode = true;
        info!("Mock mode enabled");
    }

    /// Use real hardware on the next `connect()` and stop any simulated tick
    pub fn disable_mock_mode(&self) {
        let mut state = self.shared.state();
        state.mock_mode = false;
        state.delivery.cancel_mock();
        info!("Mock mode disabled");
    }

    pub fn is_mock_mode(&self) -> bool {
        self.shared.state().mock_mode
    }

    /// Connect to a heart rate device, or return the existing connection.
    ///
    /// Fails without leaving any partial state behind.
    pub async fn connect(&self) -> Result<DeviceHandle, HeartRateError> {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let mock_mode = {
            let state = self.shared.state();
            if let Some(existing) = &state.connection {
                info!("Already connected to {}", existing.id());
                return Ok(existing.clone());
            }
            state.mock_mode
        };

        if mock_mode {
            return Ok(self.connect_mock());
        }

        if !self.backend.is_supported() {
            self.fail(&HeartRateError::Unsupported);
            return Err(HeartRateError::Unsupported);
        }

        self.shared.set_status(ConnectionStatus::Connecting);
        self.shared
            .log("Looking for heart rate device...", MessageSeverity::Info);

        match self.connect_real().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn connect_mock(&self) -> DeviceHandle {
        self.shared
            .simulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reseed();

        let handle = DeviceHandle::mock();
        self.shared.state().connection = Some(handle.clone());
        self.shared.set_status(ConnectionStatus::Connected);
        self.shared
            .log("Connected to mock heart rate device", MessageSeverity::Success);
        info!("Mock connection established");
        handle
    }

    async fn connect_real(&self) -> Result<DeviceHandle, HeartRateError> {
        let resolved = self.resolver.resolve(self.backend.as_ref()).await?;
        let control_point = self
            .negotiator
            .negotiate(resolved.device.as_ref(), &resolved.service)
            .await;

        let connection_watch = resolved.device.connection_watch();
        let handle = DeviceHandle::real(GattSession {
            device: resolved.device,
            service: resolved.service,
            measurement: resolved.measurement,
            control_point,
            polling_disabled: Arc::new(AtomicBool::new(false)),
        });

        let watcher = tokio::spawn(watch_for_disconnect(
            Arc::downgrade(&self.shared),
            handle.clone(),
            connection_watch,
        ));
        {
            let mut state = self.shared.state();
            state.connection = Some(handle.clone());
            state.disconnect_watch = Some(watcher);
        }

        info!("Connected to {} ({:?})", handle.id(), handle.name());
        self.shared.set_status(ConnectionStatus::Connected);
        self.shared.log(
            format!("Connected to {}", handle.name().unwrap_or(handle.id())),
            MessageSeverity::Success,
        );
        Ok(handle)
    }

    fn fail(&self, e: &HeartRateError) {
        error!("Connection failed: {}", e);
        self.shared.set_status(ConnectionStatus::Error);
        self.shared.log(e.to_string(), MessageSeverity::Error);
    }

    /// Start delivering samples to `callback`.
    ///
    /// A second call only swaps the callback; the running delivery paths are
    /// kept. Samples may arrive more than once (notification and poll).
    pub async fn start_monitoring<F>(&self, callback: F) -> Result<(), HeartRateError>
    where
        F: Fn(HeartRateSample) + Send + Sync + 'static,
    {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let (handle, running) = {
            let state = self.shared.state();
            let handle = state
                .connection
                .clone()
                .ok_or(HeartRateError::NotConnected)?;
            (handle, state.delivery.state().is_active())
        };

        let callback: SampleCallback = Arc::new(callback);
        self.shared.sink.set_callback(callback);
        if running {
            info!("Monitoring callback replaced");
            return Ok(());
        }

        // Paths that died on their own are cleared before restarting
        let mut stale = std::mem::take(&mut self.shared.state().delivery);
        stale.shutdown().await;

        let delivery = match handle.session() {
            None => self
                .channel
                .start_simulated(self.shared.simulator.clone(), &self.shared.sink),
            Some(session) => {
                match self
                    .channel
                    .start(
                        session.device.clone(),
                        &session.measurement,
                        &self.shared.sink,
                        &session.polling_disabled,
                    )
                    .await
                {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        self.shared.sink.clear_callback();
                        self.shared.log(e.to_string(), MessageSeverity::Error);
                        return Err(e);
                    }
                }
            }
        };

        let state = delivery.state();
        self.shared.state().delivery = delivery;
        info!("Monitoring started: {:?}", state);
        self.shared
            .log("Heart rate monitoring started", MessageSeverity::Info);
        Ok(())
    }

    /// Stop every delivery path and forget the callback. No-op when idle.
    pub async fn stop_monitoring(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.shared.stop_delivery().await;
        info!("Monitoring stopped");
    }

    /// Tear down monitoring and the connection. No-op when not connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.shared.stop_delivery().await;

        let (connection, watcher) = {
            let mut state = self.shared.state();
            (state.connection.take(), state.disconnect_watch.take())
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let Some(handle) = connection else {
            return;
        };

        if let Some(session) = handle.session() {
            if session.device.is_connected() {
                if let Err(e) = session.device.disconnect().await {
                    warn!("Failed to release {}: {}", handle.id(), e);
                }
            }
        }

        info!("Disconnected from {}", handle.id());
        self.shared.set_status(ConnectionStatus::Disconnected);
        self.shared.log("Disconnected", MessageSeverity::Info);
    }

    /// Mock: whether a mock connection exists. Real: the transport's live flag.
    pub fn is_connected(&self) -> bool {
        self.shared
            .state()
            .connection
            .as_ref()
            .is_some_and(DeviceHandle::is_connected)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.state().status
    }

    pub fn monitoring_state(&self) -> MonitoringState {
        self.shared.state().delivery.state()
    }

    pub fn is_monitoring_active(&self) -> bool {
        self.monitoring_state().is_active()
    }

    pub fn connected_device_id(&self) -> Option<String> {
        self.shared
            .state()
            .connection
            .as_ref()
            .map(|handle| handle.id().to_string())
    }

    pub fn last_reading(&self) -> Option<LastReading> {
        self.shared.sink.last_reading()
    }

    /// List nearby heart rate devices without connecting
    pub async fn scan_for_devices(
        &self,
        duration: Duration,
    ) -> Result<Vec<ScannedDevice>, HeartRateError> {
        self.scanner.scan(self.backend.as_ref(), duration).await
    }
}

impl Drop for HeartRateMonitor {
    fn drop(&mut self) {
        if let Some(watcher) = self.shared.state().disconnect_watch.take() {
            watcher.abort();
        }
    }
}

/// Wait for the transport to report the device gone, then reset the monitor
async fn watch_for_disconnect(
    shared: Weak<Shared>,
    handle: DeviceHandle,
    mut connection: watch::Receiver<bool>,
) {
    // A closed channel means the device itself is gone
    let _ = connection.wait_for(|connected| !*connected).await;

    if let Some(shared) = shared.upgrade() {
        shared.reset_after_external_disconnect(&handle).await;
    }
}
