//! Static device information read during discovery

use serde::Serialize;

use super::Characteristic;

/// Identification strings of the connected monitor
///
/// Each field is read independently; a failed read leaves it `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub manufacturer: Option<String>,
}

impl DeviceInfo {
    /// Store a raw characteristic value, returning the decoded string
    ///
    /// Values are UTF-8 with optional NUL padding. Characteristics that are
    /// not device information are ignored.
    pub fn set(&mut self, characteristic: Characteristic, raw: &[u8]) -> Option<String> {
        let slot = match characteristic {
            Characteristic::ModelNumber => &mut self.model,
            Characteristic::SerialNumber => &mut self.serial_number,
            Characteristic::HardwareRevision => &mut self.hardware_revision,
            Characteristic::FirmwareRevision => &mut self.firmware_revision,
            Characteristic::Manufacturer => &mut self.manufacturer,
            _ => return None,
        };
        let value = String::from_utf8_lossy(raw).trim_end_matches('\0').trim().to_string();
        *slot = Some(value.clone());
        Some(value)
    }

    pub fn get(&self, characteristic: Characteristic) -> Option<&str> {
        match characteristic {
            Characteristic::ModelNumber => self.model.as_deref(),
            Characteristic::SerialNumber => self.serial_number.as_deref(),
            Characteristic::HardwareRevision => self.hardware_revision.as_deref(),
            Characteristic::FirmwareRevision => self.firmware_revision.as_deref(),
            Characteristic::Manufacturer => self.manufacturer.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_padding_is_stripped() {
        let mut info = DeviceInfo::default();
        let value = info.set(Characteristic::SerialNumber, b"430123456\0\0\0");
        assert_eq!(value.as_deref(), Some("430123456"));
        assert_eq!(info.get(Characteristic::SerialNumber), Some("430123456"));
        assert_eq!(info.model, None);
    }

    #[test]
    fn non_device_characteristics_are_ignored() {
        let mut info = DeviceInfo::default();
        assert_eq!(info.set(Characteristic::StrokeData, b"PM5"), None);
        assert_eq!(info, DeviceInfo::default());
    }
}
