//! Connection lifecycle state

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a [`ConnectionSession`](crate::ConnectionSession)
///
/// ```text
/// Disconnected -> Connecting -> DiscoveringCapabilities -> Ready
///       ^                                                    |
///       +------------------- Disconnecting <-----------------+
/// ```
///
/// Link loss moves any state straight back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    DiscoveringCapabilities,
    Ready,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::DiscoveringCapabilities => "discovering capabilities",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
