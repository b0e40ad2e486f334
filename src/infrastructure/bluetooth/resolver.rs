//! Device Resolver
//!
//! Finds a heart rate device and resolves its measurement characteristic.
//! Each concern is an ordered list of strategies; the first success wins and
//! a miss simply moves on to the next strategy. Firmware exposes the profile
//! inconsistently (short vs. full UUIDs, nonstandard services), so the later
//! strategies get progressively less strict.

use crate::infrastructure::bluetooth::backend::{
    BleBackend, BleDevice, DeviceFilter, DeviceRequest, GattCharacteristic, GattService,
};
use crate::infrastructure::bluetooth::error::{BackendError, HeartRateError, ResolutionFailure};
use crate::infrastructure::bluetooth::protocol::{
    expand_uuid, uuid_matches_hint, AttributeId, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE,
    MEASUREMENT_HINTS, SERVICE_HINTS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Device discovery strategies, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// Vendor name prefix
    NamePrefix,
    /// Advertises the heart rate service
    HeartRateService,
    /// Any device the platform offers
    AnyDevice,
}

pub const DISCOVERY_STRATEGIES: [DiscoveryStrategy; 3] = [
    DiscoveryStrategy::NamePrefix,
    DiscoveryStrategy::HeartRateService,
    DiscoveryStrategy::AnyDevice,
];

/// Service and characteristic lookup strategies, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// 16-bit assigned number
    Canonical,
    /// 128-bit expanded UUID
    Expanded,
    /// UUID text contains a known hint
    Heuristic,
    /// Whatever comes first
    FirstAvailable,
}

pub const LOOKUP_STRATEGIES: [LookupStrategy; 4] = [
    LookupStrategy::Canonical,
    LookupStrategy::Expanded,
    LookupStrategy::Heuristic,
    LookupStrategy::FirstAvailable,
];

/// Outcome of a full resolution
pub struct ResolvedDevice {
    pub device: Arc<dyn BleDevice>,
    pub service: GattService,
    pub measurement: GattCharacteristic,
    pub service_strategy: LookupStrategy,
    pub measurement_strategy: LookupStrategy,
}

pub struct DeviceResolver {
    name_prefix: String,
    scan_timeout: Duration,
}

impl DeviceResolver {
    pub fn new(name_prefix: impl Into<String>, scan_timeout: Duration) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            scan_timeout,
        }
    }

    /// Discover, connect and resolve the measurement characteristic.
    ///
    /// A device that connects but fails resolution is disconnected again.
    pub async fn resolve(&self, backend: &dyn BleBackend) -> Result<ResolvedDevice, HeartRateError> {
        let device = self.discover(backend).await?;

        info!("Connecting to GATT server of {}", device.id());
        device
            .connect()
            .await
            .map_err(HeartRateError::from_platform)?;

        match self.resolve_on(device.as_ref()).await {
            Ok((service, service_strategy, measurement, measurement_strategy)) => {
                Ok(ResolvedDevice {
                    device,
                    service,
                    measurement,
                    service_strategy,
                    measurement_strategy,
                })
            }
            Err(failure) => {
                warn!("Resolution failed on {}: {}", device.id(), failure);
                if let Err(e) = device.disconnect().await {
                    debug!("Disconnect after failed resolution: {}", e);
                }
                Err(failure.into())
            }
        }
    }

    async fn resolve_on(
        &self,
        device: &dyn BleDevice,
    ) -> Result<(GattService, LookupStrategy, GattCharacteristic, LookupStrategy), ResolutionFailure>
    {
        let (service, service_strategy) = self.resolve_service(device).await?;
        let (measurement, measurement_strategy) =
            self.resolve_measurement(device, &service).await?;
        Ok((service, service_strategy, measurement, measurement_strategy))
    }

    /// The pick request a discovery strategy issues
    pub fn request_for(&self, strategy: DiscoveryStrategy) -> DeviceRequest {
        let filter = match strategy {
            DiscoveryStrategy::NamePrefix => DeviceFilter::NamePrefix(self.name_prefix.clone()),
            DiscoveryStrategy::HeartRateService => {
                DeviceFilter::Services(vec![expand_uuid(HEART_RATE_SERVICE)])
            }
            DiscoveryStrategy::AnyDevice => DeviceFilter::AcceptAll,
        };
        DeviceRequest {
            filter,
            optional_services: vec![expand_uuid(HEART_RATE_SERVICE)],
            timeout: self.scan_timeout,
        }
    }

    /// Try each discovery strategy until one yields a device
    pub async fn discover(
        &self,
        backend: &dyn BleBackend,
    ) -> Result<Arc<dyn BleDevice>, HeartRateError> {
        let mut denied = false;
        let mut unsupported = false;

        for strategy in DISCOVERY_STRATEGIES {
            match backend.request_device(&self.request_for(strategy)).await {
                Ok(device) => {
                    info!("Device {} found via {:?}", device.id(), strategy);
                    return Ok(device);
                }
                Err(e) => {
                    debug!("Discovery via {:?} failed: {}", strategy, e);
                    denied |= e == BackendError::PermissionDenied;
                    unsupported |= matches!(e, BackendError::Unsupported(_));
                }
            }
        }

        Err(if denied {
            HeartRateError::PermissionDenied
        } else if unsupported {
            HeartRateError::Unsupported
        } else {
            HeartRateError::NoDeviceFound
        })
    }

    pub async fn resolve_service(
        &self,
        device: &dyn BleDevice,
    ) -> Result<(GattService, LookupStrategy), ResolutionFailure> {
        for strategy in LOOKUP_STRATEGIES {
            match lookup_service(device, strategy).await {
                Ok(service) => {
                    info!("Heart rate service {} resolved via {:?}", service.uuid, strategy);
                    return Ok((service, strategy));
                }
                Err(e) => debug!("Service lookup via {:?} failed: {}", strategy, e),
            }
        }
        Err(ResolutionFailure::NoServiceFound)
    }

    pub async fn resolve_measurement(
        &self,
        device: &dyn BleDevice,
        service: &GattService,
    ) -> Result<(GattCharacteristic, LookupStrategy), ResolutionFailure> {
        for strategy in LOOKUP_STRATEGIES {
            match lookup_measurement(device, service, strategy).await {
                Ok(characteristic) => {
                    info!(
                        "Measurement characteristic {} resolved via {:?}",
                        characteristic.uuid, strategy
                    );
                    return Ok((characteristic, strategy));
                }
                Err(e) => debug!("Characteristic lookup via {:?} failed: {}", strategy, e),
            }
        }
        Err(ResolutionFailure::NoCharacteristicFound)
    }
}

async fn lookup_service(
    device: &dyn BleDevice,
    strategy: LookupStrategy,
) -> Result<GattService, BackendError> {
    match strategy {
        LookupStrategy::Canonical => {
            device
                .primary_service(AttributeId::Short(HEART_RATE_SERVICE))
                .await
        }
        LookupStrategy::Expanded => {
            device
                .primary_service(AttributeId::Full(expand_uuid(HEART_RATE_SERVICE)))
                .await
        }
        LookupStrategy::Heuristic => device
            .primary_services()
            .await?
            .into_iter()
            .find(|s| uuid_matches_hint(&s.uuid, SERVICE_HINTS))
            .ok_or(BackendError::NotFound),
        LookupStrategy::FirstAvailable => device
            .primary_services()
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::NotFound),
    }
}

async fn lookup_measurement(
    device: &dyn BleDevice,
    service: &GattService,
    strategy: LookupStrategy,
) -> Result<GattCharacteristic, BackendError> {
    match strategy {
        LookupStrategy::Canonical => {
            device
                .characteristic(service, AttributeId::Short(HEART_RATE_MEASUREMENT))
                .await
        }
        LookupStrategy::Expanded => {
            device
                .characteristic(service, AttributeId::Full(expand_uuid(HEART_RATE_MEASUREMENT)))
                .await
        }
        LookupStrategy::Heuristic => device
            .characteristics(service)
            .await?
            .into_iter()
            .find(|c| uuid_matches_hint(&c.uuid, MEASUREMENT_HINTS))
            .ok_or(BackendError::NotFound),
        LookupStrategy::FirstAvailable => device
            .characteristics(service)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::NotFound),
    }
}
