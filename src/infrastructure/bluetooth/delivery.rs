//! Sample delivery
//!
//! A connected device delivers samples over two independent paths:
//! characteristic notifications and a periodic read. Both feed the same
//! [`SampleSink`], so a sample can arrive twice; delivery is at-least-once.
//! In mock mode a simulated tick replaces both.
//!
//! Every running path is owned by an [`ActiveDelivery`]. Dropping it, or
//! calling [`ActiveDelivery::shutdown`], cancels all of them.

use crate::domain::heart_rate::decode_measurement;
use crate::domain::models::{ConnectionMode, HeartRateSample, LastReading, MonitoringState};
use crate::domain::simulator::MockSimulator;
use crate::infrastructure::bluetooth::backend::{BleDevice, GattCharacteristic};
use crate::infrastructure::bluetooth::error::{BackendError, HeartRateError};
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Shortest poll or mock tick period; `tokio::time::interval` rejects zero
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

pub type SampleCallback = Arc<dyn Fn(HeartRateSample) + Send + Sync>;

/// Where every delivery path hands its samples.
///
/// The callback runs while the slot lock is held, so once
/// [`SampleSink::clear_callback`] returns no further sample reaches the old
/// callback. A callback must therefore not call back into the sink.
#[derive(Clone, Default)]
pub struct SampleSink {
    callback: Arc<Mutex<Option<SampleCallback>>>,
    last_reading: Arc<Mutex<Option<LastReading>>>,
    raw_logging: bool,
}

impl SampleSink {
    pub fn new(raw_logging: bool) -> Self {
        Self {
            raw_logging,
            ..Self::default()
        }
    }

    pub fn set_callback(&self, callback: SampleCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn clear_callback(&self) {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn last_reading(&self) -> Option<LastReading> {
        *self.last_reading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a sample to the callback. Returns false when nobody listens.
    pub fn deliver(&self, sample: HeartRateSample) -> bool {
        let slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(callback) = slot.as_ref() else {
            return false;
        };

        *self.last_reading.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastReading {
            sample,
            received_at: SystemTime::now(),
        });
        callback(sample);
        true
    }

    /// Decode a raw measurement payload and deliver it if valid
    pub fn deliver_payload(&self, payload: &[u8], source: ConnectionMode) -> bool {
        if self.raw_logging {
            trace!("Raw measurement payload: {:02x?}", payload);
        }

        match decode_measurement(payload) {
            Ok(value) => self.deliver(HeartRateSample { value, source }),
            Err(rejection) => {
                debug!("Dropping measurement {:02x?}: {}", payload, rejection);
                false
            }
        }
    }
}

/// A live notification subscription. Closing it unsubscribes on the device.
pub struct NotificationSubscription {
    device: Arc<dyn BleDevice>,
    characteristic: GattCharacteristic,
    task: JoinHandle<()>,
}

impl NotificationSubscription {
    pub async fn open(
        device: Arc<dyn BleDevice>,
        characteristic: GattCharacteristic,
        sink: SampleSink,
    ) -> Result<Self, BackendError> {
        let mut stream = device.subscribe(&characteristic).await?;

        let task = tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                sink.deliver_payload(&payload, ConnectionMode::Real);
            }
            debug!("Notification stream ended");
        });

        Ok(Self {
            device,
            characteristic,
            task,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop consuming and unsubscribe
    pub async fn close(self) -> Result<(), BackendError> {
        self.task.abort();
        self.device.unsubscribe(&self.characteristic).await
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A periodic task, cancelled when the handle is dropped
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: tokio::spawn(future),
        }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything currently producing samples for one connection
#[derive(Default)]
pub struct ActiveDelivery {
    notifications: Option<NotificationSubscription>,
    polling: Option<TimerHandle>,
    mock: Option<TimerHandle>,
}

impl ActiveDelivery {
    /// Derived from which paths are still running
    pub fn state(&self) -> MonitoringState {
        if self.mock.as_ref().is_some_and(TimerHandle::is_active) {
            return MonitoringState::Simulated;
        }

        let notifying = self
            .notifications
            .as_ref()
            .is_some_and(NotificationSubscription::is_active);
        let polling = self.polling.as_ref().is_some_and(TimerHandle::is_active);

        match (notifying, polling) {
            (true, true) => MonitoringState::Both,
            (true, false) => MonitoringState::NotificationsActive,
            (false, true) => MonitoringState::PollingActive,
            (false, false) => MonitoringState::Idle,
        }
    }

    pub fn cancel_mock(&mut self) {
        if let Some(mock) = self.mock.take() {
            mock.cancel();
        }
    }

    /// Cancel every path. Each is torn down independently; a failing
    /// unsubscribe is logged and does not stop the rest.
    pub async fn shutdown(&mut self) {
        self.cancel_mock();

        if let Some(polling) = self.polling.take() {
            polling.cancel();
        }

        if let Some(notifications) = self.notifications.take() {
            if let Err(e) = notifications.close().await {
                warn!("Failed to stop notifications: {}", e);
            }
        }
    }
}

/// Starts delivery paths with the configured cadence
pub struct DeliveryChannel {
    poll_interval: Duration,
    mock_tick_interval: Duration,
}

impl DeliveryChannel {
    /// Intervals below [`MIN_TICK_INTERVAL`] are raised to it.
    pub fn new(poll_interval: Duration, mock_tick_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_TICK_INTERVAL),
            mock_tick_interval: mock_tick_interval.max(MIN_TICK_INTERVAL),
        }
    }

    /// Start notifications and polling on a resolved measurement characteristic.
    ///
    /// Either path may fail to start on its own; only when both fail is an
    /// error returned. Polling stops permanently on its first failed read and
    /// records that in `polling_disabled`, which outlives this delivery; once
    /// set, later starts on the same connection skip polling.
    pub async fn start(
        &self,
        device: Arc<dyn BleDevice>,
        measurement: &GattCharacteristic,
        sink: &SampleSink,
        polling_disabled: &Arc<AtomicBool>,
    ) -> Result<ActiveDelivery, HeartRateError> {
        let mut delivery = ActiveDelivery::default();

        let notification_error = match NotificationSubscription::open(
            device.clone(),
            measurement.clone(),
            sink.clone(),
        )
        .await
        {
            Ok(subscription) => {
                info!("Notifications started on {}", measurement.uuid);
                delivery.notifications = Some(subscription);
                None
            }
            Err(e) => {
                warn!("Notifications unavailable: {}", e);
                Some(e)
            }
        };

        if polling_disabled.load(Ordering::SeqCst) {
            debug!("Polling already disabled for this connection");
        } else {
            match device.read(measurement).await {
                Ok(payload) => {
                    sink.deliver_payload(&payload, ConnectionMode::Real);
                    delivery.polling = Some(self.spawn_polling(
                        device,
                        measurement.clone(),
                        sink.clone(),
                        polling_disabled.clone(),
                    ));
                    info!("Polling every {:?}", self.poll_interval);
                }
                Err(e) => {
                    info!("Measurement is not readable, polling disabled: {}", e);
                    polling_disabled.store(true, Ordering::SeqCst);
                }
            }
        }

        match notification_error {
            Some(e) if delivery.polling.is_none() => Err(HeartRateError::Transport(e)),
            _ => Ok(delivery),
        }
    }

    fn spawn_polling(
        &self,
        device: Arc<dyn BleDevice>,
        measurement: GattCharacteristic,
        sink: SampleSink,
        polling_disabled: Arc<AtomicBool>,
    ) -> TimerHandle {
        let period = self.poll_interval;
        TimerHandle::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match device.read(&measurement).await {
                    Ok(payload) => {
                        sink.deliver_payload(&payload, ConnectionMode::Real);
                    }
                    Err(e) => {
                        info!("Polling stopped after failed read: {}", e);
                        polling_disabled.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        })
    }

    /// Start the simulated tick in place of a device
    pub fn start_simulated(
        &self,
        simulator: Arc<Mutex<MockSimulator>>,
        sink: &SampleSink,
    ) -> ActiveDelivery {
        simulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reseed();

        let period = self.mock_tick_interval;
        let sink = sink.clone();
        let mock = TimerHandle::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let value = simulator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .step();
                sink.deliver(HeartRateSample {
                    value,
                    source: ConnectionMode::Mock,
                });
            }
        });

        info!("Simulated heart rate every {:?}", period);
        ActiveDelivery {
            mock: Some(mock),
            ..ActiveDelivery::default()
        }
    }
}
