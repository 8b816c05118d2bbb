//! Scriptable transport and recording observer for exercising sessions
//!
//! [`MockTransport`] stands in for a BLE stack: tests decide which
//! characteristics exist, what reads return, when notifications arrive and
//! when the link drops. [`RecordingObserver`] keeps every event for later
//! assertions.

#![cfg(any(test, feature = "test-utils"))]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::observer::{SessionEvent, SessionObserver};
use crate::transport::{LinkLoss, NotificationStream, Transport};
use crate::types::{Characteristic, StreamId, TelemetryRecord};
use crate::{Pm5Error, Result};

type ReadValue = std::result::Result<Vec<u8>, String>;

/// Where a scripted link drop fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDropPoint {
    /// While characteristics are being listed during discovery
    Discovery,
    /// While notifications are being enabled
    Subscribe,
}

/// Time given to the session to react to a scripted drop before the
/// interrupted call returns
const LINK_DROP_SETTLE: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct MockState {
    characteristics: Vec<Uuid>,
    reads: HashMap<Uuid, ReadValue>,
    responses: VecDeque<Vec<u8>>,
    writes: Vec<(Uuid, Vec<u8>)>,
    notifiers: HashMap<Uuid, mpsc::UnboundedSender<Result<Vec<u8>>>>,
    subscribe_calls: HashMap<Uuid, usize>,
    link: Option<oneshot::Sender<String>>,
    scripted_drop: Option<(LinkDropPoint, String)>,
    connect_error: Option<String>,
    subscribe_error: Option<String>,
    write_error: Option<String>,
    stop_error: Option<String>,
    connects: usize,
    disconnects: usize,
    stops: usize,
}

/// In-memory PM5 with scripted behaviour
///
/// Clones share state, so a test keeps one clone to drive the device while
/// the session owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Device exposing the given characteristics and nothing else
    pub fn new(characteristics: impl IntoIterator<Item = Characteristic>) -> Self {
        let transport = Self::default();
        lock(&transport.state).characteristics =
            characteristics.into_iter().map(|c| c.uuid()).collect();
        transport
    }

    /// Fully featured monitor with device information filled in
    pub fn pm5() -> Self {
        Self::new(Characteristic::ALL)
            .with_read(Characteristic::ModelNumber.uuid(), b"PM5\0\0\0")
            .with_read(Characteristic::SerialNumber.uuid(), b"430123456")
            .with_read(Characteristic::HardwareRevision.uuid(), b"0.61")
            .with_read(Characteristic::FirmwareRevision.uuid(), b"171.000 ")
            .with_read(Characteristic::Manufacturer.uuid(), b"Concept2")
    }

    pub fn without(self, characteristic: Characteristic) -> Self {
        lock(&self.state).characteristics.retain(|uuid| *uuid != characteristic.uuid());
        self
    }

    pub fn with_uuid(self, uuid: Uuid) -> Self {
        lock(&self.state).characteristics.push(uuid);
        self
    }

    pub fn with_read(self, uuid: Uuid, value: &[u8]) -> Self {
        lock(&self.state).reads.insert(uuid, Ok(value.to_vec()));
        self
    }

    /// Reads of `uuid` fail with a transport error
    pub fn with_failed_read(self, uuid: Uuid, reason: &str) -> Self {
        lock(&self.state).reads.insert(uuid, Err(reason.to_string()));
        self
    }

    pub fn fail_connect(&self, reason: &str) {
        lock(&self.state).connect_error = Some(reason.to_string());
    }

    pub fn fail_subscribe(&self, reason: &str) {
        lock(&self.state).subscribe_error = Some(reason.to_string());
    }

    pub fn fail_writes(&self, reason: &str) {
        lock(&self.state).write_error = Some(reason.to_string());
    }

    /// Every `stop` on a notification stream fails
    pub fn fail_stop(&self, reason: &str) {
        lock(&self.state).stop_error = Some(reason.to_string());
    }

    /// Queue the next value returned from the command response channel
    ///
    /// With nothing queued, response reads never complete.
    pub fn push_response(&self, frame: Vec<u8>) {
        lock(&self.state).responses.push_back(frame);
    }

    /// Deliver a notification; false if nothing is subscribed to `stream`
    pub fn notify(&self, stream: StreamId, bytes: &[u8]) -> bool {
        let state = lock(&self.state);
        match state.notifiers.get(&stream.uuid()) {
            Some(sender) => sender.send(Ok(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Make the stream's next read fail with a transport error
    pub fn break_stream(&self, stream: StreamId, reason: &str) -> bool {
        self.fail_stream(stream, Pm5Error::transport_failed(reason))
    }

    /// Make the stream's next read fail with `error`
    pub fn fail_stream(&self, stream: StreamId, error: Pm5Error) -> bool {
        let state = lock(&self.state);
        match state.notifiers.get(&stream.uuid()) {
            Some(sender) => sender.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// End the stream cleanly
    pub fn end_stream(&self, stream: StreamId) {
        lock(&self.state).notifiers.remove(&stream.uuid());
    }

    /// Fire the link-loss signal handed out by the last `connect`
    pub fn drop_link(&self, reason: &str) -> bool {
        match lock(&self.state).link.take() {
            Some(sender) => sender.send(reason.to_string()).is_ok(),
            None => false,
        }
    }

    /// Drop the link the next time the session reaches `point`
    pub fn drop_link_at(&self, point: LinkDropPoint, reason: &str) {
        lock(&self.state).scripted_drop = Some((point, reason.to_string()));
    }

    /// Fire a scripted drop for `point`, then give the session time to react
    async fn scripted_drop(&self, point: LinkDropPoint) {
        let fired = {
            let mut state = lock(&self.state);
            match state.scripted_drop.take() {
                Some((at, reason)) if at == point => match state.link.take() {
                    Some(sender) => sender.send(reason).is_ok(),
                    None => false,
                },
                other => {
                    state.scripted_drop = other;
                    false
                }
            }
        };
        if fired {
            tokio::time::sleep(LINK_DROP_SETTLE).await;
        }
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.state).writes.clone()
    }

    pub fn subscribe_calls(&self, stream: StreamId) -> usize {
        lock(&self.state).subscribe_calls.get(&stream.uuid()).copied().unwrap_or(0)
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<LinkLoss> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if let Some(reason) = &state.connect_error {
            return Err(Pm5Error::transport_failed(reason.clone()));
        }
        let (sender, receiver) = oneshot::channel();
        state.link = Some(sender);
        Ok(receiver)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.link = None;
        state.notifiers.clear();
        Ok(())
    }

    async fn list_characteristics(&self) -> Result<Vec<Uuid>> {
        self.scripted_drop(LinkDropPoint::Discovery).await;
        Ok(lock(&self.state).characteristics.clone())
    }

    async fn read_characteristic(&self, id: Uuid) -> Result<Vec<u8>> {
        if id == Characteristic::ControlTransmit.uuid() {
            let queued = lock(&self.state).responses.pop_front();
            return match queued {
                Some(frame) => Ok(frame),
                None => std::future::pending().await,
            };
        }

        match lock(&self.state).reads.get(&id) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(Pm5Error::transport_failed(reason.clone())),
            None => Err(Pm5Error::Protocol {
                context: "read",
                details: format!("{} is not readable", id),
            }),
        }
    }

    async fn write_characteristic(&self, id: Uuid, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.write_error {
            return Err(Pm5Error::transport_failed(reason.clone()));
        }
        state.writes.push((id, data.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, id: Uuid) -> Result<Box<dyn NotificationStream>> {
        self.scripted_drop(LinkDropPoint::Subscribe).await;
        let mut state = lock(&self.state);
        *state.subscribe_calls.entry(id).or_default() += 1;
        if let Some(reason) = &state.subscribe_error {
            return Err(Pm5Error::transport_failed(reason.clone()));
        }
        if !state.characteristics.contains(&id) {
            return Err(Pm5Error::Protocol {
                context: "subscribe",
                details: format!("{} not found", id),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.notifiers.insert(id, sender);
        Ok(Box::new(MockStream { receiver, state: Arc::clone(&self.state) }))
    }
}

struct MockStream {
    receiver: mpsc::UnboundedReceiver<Result<Vec<u8>>>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait::async_trait]
impl NotificationStream for MockStream {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.receiver.recv().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.receiver.close();
        let mut state = lock(&self.state);
        state.stops += 1;
        match &state.stop_error {
            Some(reason) => Err(Pm5Error::transport_failed(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Observer that keeps every event it sees
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        lock(&self.events).clone()
    }

    pub fn records(&self) -> Vec<(StreamId, TelemetryRecord)> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Telemetry { stream, record, .. } => Some((*stream, record.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|event| predicate(event)).count()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// Poll until `predicate` matches `count` events or `timeout` passes
    pub async fn wait_for(
        &self,
        count: usize,
        predicate: impl Fn(&SessionEvent) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(&predicate) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        lock(&self.events).push(event.clone());
    }
}
