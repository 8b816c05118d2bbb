//! Event delivery from the session to its consumer
//!
//! The session reports everything through one [`SessionObserver`]. Observers
//! are called synchronously from the dispatch tasks, so they must return
//! quickly; [`BroadcastObserver`] hands events to a bounded channel for
//! consumers that want an async `Stream` instead.

use futures::{Stream, StreamExt};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::config::SessionConfig;
use crate::types::{Characteristic, ConnectionState, RawFrame, StreamId, TelemetryRecord};

/// Why a notification produced no record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Payload shorter than the record layout
    Truncated { expected: usize, actual: usize },
    /// Multiplexed tag outside the decoded set
    UnknownTag { tag: u8 },
}

/// Severity of a [`SessionEvent::Diagnostic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Everything a session reports
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged { from: ConnectionState, to: ConnectionState },
    /// The session reached `Ready`
    Connected,
    /// Emitted once per physical disconnect
    Disconnected { reason: String },
    Telemetry { stream: StreamId, record: TelemetryRecord, received_at: Instant },
    /// Undecoded notification from a custom monitor stream
    Raw { frame: RawFrame },
    ParseError { stream: StreamId, kind: ParseErrorKind },
    DeviceInfo { field: Characteristic, value: String },
    /// An optional characteristic is absent on this device
    CapabilityMissing { name: String },
    Diagnostic { level: DiagnosticLevel, message: String },
}

/// Receives session events
pub trait SessionObserver: Send + Sync + 'static {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&SessionEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Observer that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Fans events out over a bounded broadcast channel
///
/// Receivers that fall more than `capacity` events behind skip the oldest
/// ones; the session itself never waits on a slow consumer.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Sized by [`SessionConfig::event_capacity`]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.event_capacity)
    }

    /// Stream of every event emitted after this call
    pub fn events(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!("Event consumer lagged, {} events dropped", missed);
                    None
                }
            }
        })
    }

    /// Stream of decoded telemetry only
    pub fn records(&self) -> impl Stream<Item = (StreamId, TelemetryRecord)> + Send + 'static {
        self.events().filter_map(|event| async move {
            match event {
                SessionEvent::Telemetry { stream, record, .. } => Some((stream, record)),
                _ => None,
            }
        })
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl SessionObserver for BroadcastObserver {
    fn on_event(&self, event: &SessionEvent) {
        // No receivers is not an error; events are simply not retained
        let _ = self.sender.send(event.clone());
    }
}
