//! Capability discovery and device information reads

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SessionInner;
use crate::config::SessionConfig;
use crate::observer::{DiagnosticLevel, SessionEvent};
use crate::transport::Transport;
use crate::types::{Characteristic, DeviceInfo, StreamId};
use crate::{Pm5Error, Result};

/// What the connected device offers, recorded once at connect time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    available: HashSet<Uuid>,
    missing: Vec<Characteristic>,
}

impl Capabilities {
    /// Check a listing against the required and optional sets
    ///
    /// Fails with [`Pm5Error::CapabilityMissing`] naming every absent
    /// required characteristic. Absent optional ones are recorded.
    pub fn evaluate(listed: Vec<Uuid>, config: &SessionConfig) -> Result<Self> {
        let available: HashSet<Uuid> = listed.into_iter().collect();

        let absent_required: Vec<&str> = config
            .required
            .iter()
            .filter(|c| !available.contains(&c.uuid()))
            .map(|c| c.name())
            .collect();
        if !absent_required.is_empty() {
            return Err(Pm5Error::capability_missing(absent_required.join(", ")));
        }

        let missing =
            config.optional.iter().copied().filter(|c| !available.contains(&c.uuid())).collect();

        Ok(Self { available, missing })
    }

    pub fn has(&self, characteristic: Characteristic) -> bool {
        self.available.contains(&characteristic.uuid())
    }

    pub fn has_uuid(&self, uuid: Uuid) -> bool {
        self.available.contains(&uuid)
    }

    /// Whether a subscription to `stream` can be attempted
    pub fn supports(&self, stream: StreamId) -> bool {
        self.has_uuid(stream.uuid())
    }

    /// Optional characteristics recorded as absent
    pub fn missing(&self) -> &[Characteristic] {
        &self.missing
    }

    pub fn is_missing(&self, characteristic: Characteristic) -> bool {
        self.missing.contains(&characteristic)
    }

    /// The command channel needs both halves
    pub fn supports_commands(&self) -> bool {
        self.has(Characteristic::ControlReceive) && self.has(Characteristic::ControlTransmit)
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}

impl<T: Transport> SessionInner<T> {
    /// Enumerate characteristics and validate them against the config
    pub(super) async fn discover_capabilities(&self) -> Result<Capabilities> {
        let listed = self.transport.list_characteristics().await?;
        debug!("Device lists {} characteristics", listed.len());

        let capabilities = Capabilities::evaluate(listed, &self.config)?;

        for missing in capabilities.missing() {
            info!("Optional characteristic '{}' not available", missing);
            self.emit(&SessionEvent::CapabilityMissing { name: missing.name().to_string() });
        }

        Ok(capabilities)
    }

    /// Read every device information field the device offers
    ///
    /// Reads are independent; a failed read leaves its field unset.
    pub(super) async fn read_device_info(&self, capabilities: &Capabilities) -> DeviceInfo {
        let present: Vec<Characteristic> =
            Characteristic::DEVICE_INFO.into_iter().filter(|c| capabilities.has(*c)).collect();

        let reads = present.iter().map(|&characteristic| async move {
            (characteristic, self.transport.read_characteristic(characteristic.uuid()).await)
        });

        let mut info = DeviceInfo::default();
        for (characteristic, result) in join_all(reads).await {
            match result {
                Ok(raw) => {
                    if let Some(value) = info.set(characteristic, &raw) {
                        debug!("Device {} = {}", characteristic, value);
                        self.emit(&SessionEvent::DeviceInfo { field: characteristic, value });
                    }
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", characteristic, e);
                    self.emit(&SessionEvent::Diagnostic {
                        level: DiagnosticLevel::Warn,
                        message: format!(
                            "device information '{}' unavailable: {}",
                            characteristic, e
                        ),
                    });
                }
            }
        }

        info
    }
}
