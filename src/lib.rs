//! Type-safe Rust library for Concept2 PM5 rowing telemetry over Bluetooth LE.
//!
//! pm5-link turns the monitor's GATT notifications into typed workout records
//! and drives its CSAFE command channel, on top of any BLE stack that
//! implements [`Transport`].
//!
//! # Features
//!
//! - **Telemetry decoding**: General status, additional status, stroke and
//!   split records from dedicated or multiplexed characteristics
//! - **CSAFE commands**: Frame encoding with byte stuffing and checksums
//! - **Session management**: Capability discovery, subscriptions, and a single
//!   well-defined teardown on link loss
//! - **Transport agnostic**: No platform BLE code in the crate
//!
//! # Quick Start
//!
//! Decoding works without a session:
//!
//! ```rust
//! use pm5_link::{RecordKind, TelemetryRecord, decode};
//!
//! let frame = [
//!     0x39, 0x30, 0x00, 0xE8, 0x03, 0x00, 0x01, 0x02, 0x03, 0x01,
//!     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x05,
//! ];
//! match decode(RecordKind::GeneralStatus, &frame)? {
//!     TelemetryRecord::GeneralStatus(status) => {
//!         assert_eq!(status.elapsed_time, 123.45);
//!         assert_eq!(status.distance, 100.0);
//!     }
//!     other => panic!("unexpected record {:?}", other),
//! }
//! # Ok::<(), pm5_link::Pm5Error>(())
//! ```
//!
//! See [`ConnectionSession`] for the live workflow.

pub mod codec;
pub mod config;
mod error;
pub mod observer;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod types;

// Core exports
pub use error::*;
pub use types::*;

// Codec exports
pub use codec::{
    Command, CommandFrame, CommandResponse, ResponseFrame, decode, decode_for_stream,
    decode_multiplexed,
};

// Session exports
pub use config::SessionConfig;
pub use observer::{
    BroadcastObserver, DiagnosticLevel, NoopObserver, ParseErrorKind, SessionEvent,
    SessionObserver,
};
pub use session::{Capabilities, ConnectionSession, SubscriptionHandle};
pub use transport::{LinkLoss, NotificationStream, Transport};
