//! PM5 GATT characteristics and the stream identifiers built on them

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::RecordKind;

/// PM5 vendor base UUID, `ce06XXXX-43e5-11e4-916c-0800200c9a66`
const PM5_BASE_UUID: u128 = 0xce06_0000_43e5_11e4_916c_0800_200c_9a66;

/// Expand a 16-bit PM5 short id into its full UUID
pub const fn pm5_uuid(short: u16) -> Uuid {
    Uuid::from_u128(PM5_BASE_UUID | ((short as u128) << 96))
}

/// Characteristics the session knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Characteristic {
    ModelNumber,
    SerialNumber,
    HardwareRevision,
    FirmwareRevision,
    Manufacturer,
    /// Command channel, written by the host
    ControlReceive,
    /// Response channel, read by the host
    ControlTransmit,
    GeneralStatus,
    AdditionalStatus,
    StrokeData,
    SplitData,
    MultiplexedInformation,
}

impl Characteristic {
    /// Every known characteristic, device information first
    pub const ALL: [Characteristic; 12] = [
        Characteristic::ModelNumber,
        Characteristic::SerialNumber,
        Characteristic::HardwareRevision,
        Characteristic::FirmwareRevision,
        Characteristic::Manufacturer,
        Characteristic::ControlReceive,
        Characteristic::ControlTransmit,
        Characteristic::GeneralStatus,
        Characteristic::AdditionalStatus,
        Characteristic::StrokeData,
        Characteristic::SplitData,
        Characteristic::MultiplexedInformation,
    ];

    /// Device information fields read during discovery
    pub const DEVICE_INFO: [Characteristic; 5] = [
        Characteristic::ModelNumber,
        Characteristic::SerialNumber,
        Characteristic::HardwareRevision,
        Characteristic::FirmwareRevision,
        Characteristic::Manufacturer,
    ];

    /// 16-bit short id within the PM5 base UUID
    pub const fn short_id(self) -> u16 {
        match self {
            Characteristic::ModelNumber => 0x0011,
            Characteristic::SerialNumber => 0x0012,
            Characteristic::HardwareRevision => 0x0013,
            Characteristic::FirmwareRevision => 0x0014,
            Characteristic::Manufacturer => 0x0015,
            Characteristic::ControlReceive => 0x0021,
            Characteristic::ControlTransmit => 0x0022,
            Characteristic::GeneralStatus => 0x0031,
            Characteristic::AdditionalStatus => 0x0032,
            Characteristic::StrokeData => 0x0035,
            Characteristic::SplitData => 0x0037,
            Characteristic::MultiplexedInformation => 0x0080,
        }
    }

    pub const fn uuid(self) -> Uuid {
        pm5_uuid(self.short_id())
    }

    /// Stable kebab-case name, as used in configuration and events
    pub const fn name(self) -> &'static str {
        match self {
            Characteristic::ModelNumber => "model-number",
            Characteristic::SerialNumber => "serial-number",
            Characteristic::HardwareRevision => "hardware-revision",
            Characteristic::FirmwareRevision => "firmware-revision",
            Characteristic::Manufacturer => "manufacturer",
            Characteristic::ControlReceive => "control-receive",
            Characteristic::ControlTransmit => "control-transmit",
            Characteristic::GeneralStatus => "general-status",
            Characteristic::AdditionalStatus => "additional-status",
            Characteristic::StrokeData => "stroke-data",
            Characteristic::SplitData => "split-data",
            Characteristic::MultiplexedInformation => "multiplexed-information",
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the dispatcher treats notifications on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRoute {
    /// One record type per notification
    Dedicated(RecordKind),
    /// Tag byte followed by a shifted record payload
    Multiplexed,
    /// Forwarded undecoded (generic monitor mode)
    Raw,
}

/// Identifier for one subscribable notification source
///
/// At most one subscription per id is active within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamId {
    GeneralStatus,
    AdditionalStatus,
    StrokeData,
    SplitData,
    Multiplexed,
    /// Any discovered characteristic, monitored without decoding
    Custom(Uuid),
}

impl StreamId {
    /// Named characteristic behind this stream, if it is a PM5 one
    pub fn characteristic(self) -> Option<Characteristic> {
        match self {
            StreamId::GeneralStatus => Some(Characteristic::GeneralStatus),
            StreamId::AdditionalStatus => Some(Characteristic::AdditionalStatus),
            StreamId::StrokeData => Some(Characteristic::StrokeData),
            StreamId::SplitData => Some(Characteristic::SplitData),
            StreamId::Multiplexed => Some(Characteristic::MultiplexedInformation),
            StreamId::Custom(uuid) => Characteristic::from_uuid(uuid),
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            StreamId::Custom(uuid) => uuid,
            StreamId::GeneralStatus => Characteristic::GeneralStatus.uuid(),
            StreamId::AdditionalStatus => Characteristic::AdditionalStatus.uuid(),
            StreamId::StrokeData => Characteristic::StrokeData.uuid(),
            StreamId::SplitData => Characteristic::SplitData.uuid(),
            StreamId::Multiplexed => Characteristic::MultiplexedInformation.uuid(),
        }
    }

    pub fn route(self) -> StreamRoute {
        match self {
            StreamId::GeneralStatus => StreamRoute::Dedicated(RecordKind::GeneralStatus),
            StreamId::AdditionalStatus => StreamRoute::Dedicated(RecordKind::AdditionalStatus),
            StreamId::StrokeData => StreamRoute::Dedicated(RecordKind::StrokeData),
            StreamId::SplitData => StreamRoute::Dedicated(RecordKind::SplitData),
            StreamId::Multiplexed => StreamRoute::Multiplexed,
            StreamId::Custom(_) => StreamRoute::Raw,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::GeneralStatus => f.write_str("general-status"),
            StreamId::AdditionalStatus => f.write_str("additional-status"),
            StreamId::StrokeData => f.write_str("stroke-data"),
            StreamId::SplitData => f.write_str("split-data"),
            StreamId::Multiplexed => f.write_str("multiplexed"),
            StreamId::Custom(uuid) => write!(f, "{}", uuid),
        }
    }
}
