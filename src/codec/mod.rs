//! Pure byte-level codecs, no I/O.
//!
//! - [`telemetry`] decodes notification payloads into [`TelemetryRecord`](crate::TelemetryRecord)s
//! - [`command`] builds and parses CSAFE frames for the control channel

pub mod command;
pub mod telemetry;

pub use command::{Command, CommandFrame, CommandResponse, ResponseFrame};
pub use telemetry::{decode, decode_for_stream, decode_multiplexed};
