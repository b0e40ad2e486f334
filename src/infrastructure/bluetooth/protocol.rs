//! Heart Rate Profile Protocol
//!
//! UUIDs, attribute identifiers and control point commands for the
//! Bluetooth GATT Heart Rate profile.

use uuid::Uuid;

/// Heart Rate service (16-bit assigned number)
pub const HEART_RATE_SERVICE: u16 = 0x180D;

/// Heart Rate Measurement characteristic - where samples are received
pub const HEART_RATE_MEASUREMENT: u16 = 0x2A37;

/// Heart Rate Control Point characteristic - where commands are sent
pub const HEART_RATE_CONTROL_POINT: u16 = 0x2A39;

/// Bluetooth Base UUID: 0000XXXX-0000-1000-8000-00805f9b34fb
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Substrings that identify a heart rate service in a nonstandard UUID
pub const SERVICE_HINTS: &[&str] = &["180d", "heart", "hr"];

/// Substrings that identify the measurement characteristic
pub const MEASUREMENT_HINTS: &[&str] = &["2a37", "heart", "measurement"];

/// Substrings that identify the control point characteristic
pub const CONTROL_POINT_HINTS: &[&str] = &["2a39", "control"];

/// Expand a 16-bit assigned number into its full 128-bit UUID
pub const fn expand_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Textual 128-bit form, lowercase
pub fn expanded_uuid_string(short: u16) -> String {
    format!("0000{:04x}-0000-1000-8000-00805f9b34fb", short)
}

/// How an attribute is addressed when asking the platform for it.
///
/// Platform stacks disagree on whether they accept the short assigned
/// number or only the full UUID, so lookups keep the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeId {
    Short(u16),
    Full(Uuid),
}

impl AttributeId {
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Short(short) => expand_uuid(*short),
            Self::Full(uuid) => *uuid,
        }
    }
}

impl std::fmt::Display for AttributeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short(short) => write!(f, "0x{:04X}", short),
            Self::Full(uuid) => write!(f, "{}", uuid),
        }
    }
}

/// True when the UUID text contains any of the hints
pub fn uuid_matches_hint(uuid: &Uuid, hints: &[&str]) -> bool {
    let text = uuid.hyphenated().to_string().to_lowercase();
    hints.iter().any(|hint| text.contains(hint))
}

/// Control point commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPointCommand {
    /// Stop streaming
    Disable,
    /// Start streaming
    Enable,
}

impl ControlPointCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Disable => &[0x00],
            Self::Enable => &[0x01],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_uuid() {
        assert_eq!(
            expand_uuid(HEART_RATE_SERVICE).to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            expand_uuid(HEART_RATE_MEASUREMENT).to_string(),
            expanded_uuid_string(HEART_RATE_MEASUREMENT)
        );
    }

    #[test]
    fn test_attribute_forms_share_uuid() {
        let short = AttributeId::Short(HEART_RATE_SERVICE);
        let full = AttributeId::Full(Uuid::parse_str(&expanded_uuid_string(HEART_RATE_SERVICE)).unwrap());
        assert_ne!(short, full);
        assert_eq!(short.uuid(), full.uuid());
    }

    #[test]
    fn test_hint_matching() {
        assert!(uuid_matches_hint(&expand_uuid(HEART_RATE_SERVICE), SERVICE_HINTS));
        assert!(uuid_matches_hint(&expand_uuid(HEART_RATE_CONTROL_POINT), CONTROL_POINT_HINTS));
        assert!(!uuid_matches_hint(&expand_uuid(0x180F), SERVICE_HINTS));
        assert!(!uuid_matches_hint(&expand_uuid(0x2A19), MEASUREMENT_HINTS));
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(ControlPointCommand::Enable.as_bytes(), &[0x01]);
        assert_eq!(ControlPointCommand::Disable.as_bytes(), &[0x00]);
    }
}
