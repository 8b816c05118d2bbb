//! Core types for PM5 telemetry.
//!
//! ## Architecture
//!
//! - [`RawFrame`] is one notification exactly as the transport delivered it
//! - [`StreamId`] names a subscribable source and decides how it is decoded
//! - [`Characteristic`] maps PM5 GATT characteristics to their UUIDs
//! - [`TelemetryRecord`] is the decoded, physically-scaled result
//! - [`ConnectionState`] tracks the session lifecycle
//! - [`DeviceInfo`] holds the identification strings read at connect time
//!
//! ## Usage Example
//!
//! ```rust
//! use pm5_link::types::{RecordKind, StreamId, StreamRoute};
//!
//! assert_eq!(StreamId::StrokeData.route(), StreamRoute::Dedicated(RecordKind::StrokeData));
//! assert_eq!(RecordKind::from_tag(0x35), Some(RecordKind::StrokeData));
//! assert_eq!(RecordKind::StrokeData.min_len(), 20);
//! ```

mod device_info;
mod frame;
mod record;
mod state;
mod stream_id;

pub use device_info::DeviceInfo;
pub use frame::RawFrame;
pub use record::{
    AdditionalStatus, GeneralStatus, RecordKind, SplitData, StrokeData, TelemetryRecord,
};
pub use state::ConnectionState;
pub use stream_id::{Characteristic, StreamId, StreamRoute, pm5_uuid};
