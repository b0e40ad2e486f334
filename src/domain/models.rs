use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Which code path a connection (and the samples it produces) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    #[default]
    None,
    Real,
    Mock,
}

/// A decoded heart rate reading handed to the sample callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateSample {
    /// Beats per minute, always within [0, 299]
    pub value: u16,
    pub source: ConnectionMode,
}

/// Most recent sample together with the time it was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastReading {
    pub sample: HeartRateSample,
    pub received_at: SystemTime,
}

/// Which delivery paths are currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitoringState {
    #[default]
    Idle,
    NotificationsActive,
    PollingActive,
    Both,
    /// Mock tick running
    Simulated,
}

impl MonitoringState {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// A device seen during a listing scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub id: String,
    pub name: String,
    pub rssi: i16,
    pub advertises_heart_rate: bool,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    ConnectionStatus(ConnectionStatus),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
