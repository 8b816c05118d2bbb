//! Session configuration
//!
//! Built in code or loaded from YAML:
//!
//! ```rust
//! use pm5_link::SessionConfig;
//!
//! let config = SessionConfig::from_yaml("command_timeout_ms: 500\nread_device_info: false\n")?;
//! assert_eq!(config.command_timeout().as_millis(), 500);
//! assert!(!config.read_device_info);
//! # Ok::<(), pm5_link::Pm5Error>(())
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::Characteristic;
use crate::{Pm5Error, Result};

/// Tunables for a [`ConnectionSession`](crate::ConnectionSession)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for a command response
    pub command_timeout_ms: u64,

    /// Bound on opening the link
    pub connect_timeout_ms: u64,

    /// Capacity for broadcast observers built from this config
    pub event_capacity: usize,

    /// Read the device information fields during discovery
    pub read_device_info: bool,

    /// Characteristics whose absence aborts the connect
    pub required: Vec<Characteristic>,

    /// Characteristics whose absence is recorded but tolerated
    pub optional: Vec<Characteristic>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 1_000,
            connect_timeout_ms: 10_000,
            event_capacity: 256,
            read_device_info: true,
            required: vec![
                Characteristic::ModelNumber,
                Characteristic::GeneralStatus,
                Characteristic::AdditionalStatus,
                Characteristic::StrokeData,
                Characteristic::SplitData,
            ],
            optional: vec![
                Characteristic::MultiplexedInformation,
                Characteristic::ControlReceive,
                Characteristic::ControlTransmit,
            ],
        }
    }
}

impl SessionConfig {
    /// Parse and validate a YAML document; missing keys take their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            return Err(Pm5Error::Config { details: "command_timeout_ms must be positive".into() });
        }
        if self.connect_timeout_ms == 0 {
            return Err(Pm5Error::Config { details: "connect_timeout_ms must be positive".into() });
        }
        if self.event_capacity == 0 {
            return Err(Pm5Error::Config { details: "event_capacity must be positive".into() });
        }
        if let Some(both) = self.required.iter().find(|c| self.optional.contains(c)) {
            return Err(Pm5Error::Config {
                details: format!("'{}' is listed as both required and optional", both),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
