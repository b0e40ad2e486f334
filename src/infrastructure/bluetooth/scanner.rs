//! BLE Scanner Module
//!
//! Lists nearby heart rate devices without connecting to them.

use crate::domain::models::ScannedDevice;
use crate::infrastructure::bluetooth::backend::{Advertisement, BleBackend};
use crate::infrastructure::bluetooth::error::HeartRateError;
use crate::infrastructure::bluetooth::protocol::{expand_uuid, HEART_RATE_SERVICE};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

/// BLE Scanner for listing heart rate devices
pub struct BleScanner {
    name_prefix: String,
}

impl BleScanner {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }

    /// Scan for `duration` and return devices that look like heart rate monitors.
    ///
    /// A device qualifies if its name contains the vendor prefix (case
    /// insensitive) or it advertises the heart rate service. Each device is
    /// reported once, in the order first seen.
    pub async fn scan(
        &self,
        backend: &dyn BleBackend,
        duration: Duration,
    ) -> Result<Vec<ScannedDevice>, HeartRateError> {
        if !backend.is_supported() {
            return Err(HeartRateError::Unsupported);
        }

        info!("Scanning for heart rate devices for {:?}", duration);
        let advertisements = backend
            .scan(duration)
            .await
            .map_err(HeartRateError::from_platform)?;

        let mut seen = HashSet::new();
        let devices: Vec<ScannedDevice> = advertisements
            .into_iter()
            .filter(|advertisement| seen.insert(advertisement.id.clone()))
            .filter_map(|advertisement| self.qualify(advertisement))
            .collect();

        info!("Scan found {} heart rate device(s)", devices.len());
        Ok(devices)
    }

    fn qualify(&self, advertisement: Advertisement) -> Option<ScannedDevice> {
        let advertises_heart_rate = advertisement
            .services
            .contains(&expand_uuid(HEART_RATE_SERVICE));
        let prefix = self.name_prefix.to_lowercase();
        let name_matches = advertisement
            .name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&prefix));

        if !name_matches && !advertises_heart_rate {
            return None;
        }

        Some(ScannedDevice {
            id: advertisement.id,
            name: advertisement
                .name
                .unwrap_or_else(|| "Unknown Device".to_string()),
            rssi: advertisement.rssi.unwrap_or(0),
            advertises_heart_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::{FakeBackend, FakeDevice};
    use std::sync::Arc;

    fn advert(id: &str, name: Option<&str>, services: Vec<uuid::Uuid>) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi: None,
            services,
        }
    }

    fn backend_with(adverts: Vec<Advertisement>) -> FakeBackend {
        FakeBackend::new(
            adverts
                .into_iter()
                .map(|a| (a, Arc::new(FakeDevice::new("unused", vec![]))))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_scan_filters_and_dedupes() {
        let hr = expand_uuid(HEART_RATE_SERVICE);
        let backend = backend_with(vec![
            advert("a", Some("my whoop strap"), vec![]),
            advert("b", None, vec![hr]),
            advert("c", Some("Headphones"), vec![expand_uuid(0x180F)]),
            advert("a", Some("my whoop strap"), vec![]),
        ]);

        let devices = BleScanner::new("WHOOP")
            .scan(&backend, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(
            devices,
            vec![
                ScannedDevice {
                    id: "a".into(),
                    name: "my whoop strap".into(),
                    rssi: 0,
                    advertises_heart_rate: false,
                },
                ScannedDevice {
                    id: "b".into(),
                    name: "Unknown Device".into(),
                    rssi: 0,
                    advertises_heart_rate: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_reports_rssi() {
        let backend = FakeBackend::with_device(Arc::new(FakeDevice::heart_rate_strap("Polar H10")));
        let devices = BleScanner::new("WHOOP")
            .scan(&backend, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rssi, -60);
        assert!(devices[0].advertises_heart_rate);
    }

    #[tokio::test]
    async fn test_scan_on_unsupported_host() {
        let result = BleScanner::new("WHOOP")
            .scan(&FakeBackend::unsupported(), Duration::from_millis(1))
            .await;
        assert_eq!(result, Err(HeartRateError::Unsupported));
    }
}
