//! Error types for heart rate acquisition

use thiserror::Error;

/// What the platform Bluetooth layer reports
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("no matching device or attribute")]
    NotFound,
    #[error("Bluetooth permission denied")]
    PermissionDenied,
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("device is not connected")]
    NotConnected,
    #[error("{0}")]
    Operation(String),
}

impl From<btleplug::Error> for BackendError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => Self::PermissionDenied,
            btleplug::Error::DeviceNotFound | btleplug::Error::NoSuchCharacteristic => {
                Self::NotFound
            }
            btleplug::Error::NotConnected => Self::NotConnected,
            btleplug::Error::NotSupported(what) => Self::Unsupported(what),
            other => Self::Operation(other.to_string()),
        }
    }
}

/// Every fallback strategy was exhausted
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("device exposes no services")]
    NoServiceFound,
    #[error("heart rate service exposes no characteristics")]
    NoCharacteristicFound,
}

/// Errors surfaced by the heart rate monitor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeartRateError {
    #[error("Bluetooth is not supported on this platform")]
    Unsupported,
    #[error("No heart rate device found. Make sure your device is nearby and broadcasting heart rate.")]
    NoDeviceFound,
    #[error("Bluetooth permission denied. Please allow Bluetooth access.")]
    PermissionDenied,
    #[error("Incompatible device: {0}")]
    ServiceDiscoveryFailed(#[from] ResolutionFailure),
    #[error("Device not connected. Call connect() first.")]
    NotConnected,
    #[error("Bluetooth transport error: {0}")]
    Transport(#[from] BackendError),
}

impl HeartRateError {
    /// Lift a platform failure, keeping the categories callers branch on
    pub(crate) fn from_platform(err: BackendError) -> Self {
        match err {
            BackendError::PermissionDenied => Self::PermissionDenied,
            BackendError::Unsupported(_) => Self::Unsupported,
            other => Self::Transport(other),
        }
    }

    /// Whether asking the user to try again can help
    pub fn is_user_retryable(&self) -> bool {
        matches!(self, Self::NoDeviceFound | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        assert_eq!(
            HeartRateError::NotConnected.to_string(),
            "Device not connected. Call connect() first."
        );
        assert_eq!(
            HeartRateError::from(ResolutionFailure::NoServiceFound).to_string(),
            "Incompatible device: device exposes no services"
        );
    }

    #[test]
    fn test_btleplug_errors_map_to_backend_errors() {
        assert_eq!(
            BackendError::from(btleplug::Error::PermissionDenied),
            BackendError::PermissionDenied
        );
        assert_eq!(
            BackendError::from(btleplug::Error::DeviceNotFound),
            BackendError::NotFound
        );
        assert_eq!(
            BackendError::from(btleplug::Error::NotConnected),
            BackendError::NotConnected
        );
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(HeartRateError::NoDeviceFound.is_user_retryable());
        assert!(HeartRateError::Transport(BackendError::NotConnected).is_user_retryable());

        assert!(!HeartRateError::Unsupported.is_user_retryable());
        assert!(!HeartRateError::PermissionDenied.is_user_retryable());
        assert!(!HeartRateError::NotConnected.is_user_retryable());
        assert!(!HeartRateError::from(ResolutionFailure::NoCharacteristicFound)
            .is_user_retryable());
    }
}
