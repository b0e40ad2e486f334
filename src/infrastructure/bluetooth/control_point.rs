//! Heart Rate Control Point negotiation
//!
//! Some straps only start streaming after an explicit enable on the control
//! point. Everything here is best-effort: a missing characteristic or a
//! rejected write never fails the caller.

use crate::infrastructure::bluetooth::backend::{BleDevice, GattCharacteristic, GattService};
use crate::infrastructure::bluetooth::protocol::{
    uuid_matches_hint, AttributeId, ControlPointCommand, CONTROL_POINT_HINTS,
    HEART_RATE_CONTROL_POINT,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ControlPointNegotiator {
    delay: Duration,
}

impl ControlPointNegotiator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Canonical 0x2A39 first, then any characteristic whose UUID looks like one
    pub async fn locate(
        &self,
        device: &dyn BleDevice,
        service: &GattService,
    ) -> Option<GattCharacteristic> {
        match device
            .characteristic(service, AttributeId::Short(HEART_RATE_CONTROL_POINT))
            .await
        {
            Ok(characteristic) => return Some(characteristic),
            Err(e) => debug!("Canonical control point lookup failed: {}", e),
        }

        match device.characteristics(service).await {
            Ok(characteristics) => characteristics
                .into_iter()
                .find(|c| uuid_matches_hint(&c.uuid, CONTROL_POINT_HINTS)),
            Err(e) => {
                debug!("Control point scan failed: {}", e);
                None
            }
        }
    }

    /// Locate the control point and ask the device to start streaming.
    ///
    /// On a first-write success the enable is repeated after the delay; on a
    /// first-write failure the device is reset with disable, delay, enable.
    /// Returns the control point if one was found.
    pub async fn negotiate(
        &self,
        device: &dyn BleDevice,
        service: &GattService,
    ) -> Option<GattCharacteristic> {
        let Some(control_point) = self.locate(device, service).await else {
            debug!("No control point on {}", device.id());
            return None;
        };

        let enable = ControlPointCommand::Enable.as_bytes();
        match device.write(&control_point, enable).await {
            Ok(()) => {
                info!("Control point enable accepted");
                tokio::time::sleep(self.delay).await;
                if let Err(e) = device.write(&control_point, enable).await {
                    warn!("Second enable ignored: {}", e);
                }
            }
            Err(e) => {
                warn!("Control point enable rejected ({}), resetting", e);
                if let Err(e) = device
                    .write(&control_point, ControlPointCommand::Disable.as_bytes())
                    .await
                {
                    warn!("Disable ignored: {}", e);
                }
                tokio::time::sleep(self.delay).await;
                if let Err(e) = device.write(&control_point, enable).await {
                    warn!("Enable after reset ignored: {}", e);
                }
            }
        }

        Some(control_point)
    }
}
