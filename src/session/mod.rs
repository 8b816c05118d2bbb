//! Connection session: link lifecycle, subscriptions and commands
//!
//! A [`ConnectionSession`] is bound to one transport (one physical monitor).
//! It walks the link through
//! `Disconnected -> Connecting -> DiscoveringCapabilities -> Ready`, keeps one
//! dispatch task per active subscription, and reports everything through its
//! [`SessionObserver`].
//!
//! Control operations are serialized by a single operation lock. The
//! subscription table sits behind its own mutex that is never held across a
//! transport call, so link loss can be handled while an operation is pending.
//!
//! ```rust,no_run
//! use pm5_link::{BroadcastObserver, ConnectionSession, SessionConfig, StreamId, Transport};
//! use futures::StreamExt;
//!
//! async fn row<T: Transport>(transport: T) -> pm5_link::Result<()> {
//!     let observer = BroadcastObserver::new(256);
//!     let mut records = Box::pin(observer.records());
//!
//!     let session = ConnectionSession::new(transport, observer, SessionConfig::default())?;
//!     session.connect().await?;
//!     session.subscribe(StreamId::StrokeData).await?;
//!
//!     while let Some((stream, record)) = records.next().await {
//!         println!("{}: {:?}", stream, record);
//!     }
//!     Ok(())
//! }
//! ```

mod discovery;
mod dispatch;

pub use discovery::Capabilities;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{CommandFrame, ResponseFrame};
use crate::config::SessionConfig;
use crate::observer::{DiagnosticLevel, SessionEvent, SessionObserver};
use crate::transport::{LinkLoss, NotificationStream, Transport};
use crate::types::{Characteristic, ConnectionState, DeviceInfo, StreamId};
use crate::{Pm5Error, Result};
use dispatch::Dispatcher;

/// Identifies one active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    stream: StreamId,
    id: u64,
    pub(crate) generation: u64,
}

impl SubscriptionHandle {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Unique within the session; a resubscribe gets a new id
    pub fn id(&self) -> u64 {
        self.id
    }
}

type DispatchTask = JoinHandle<Option<Box<dyn NotificationStream>>>;

struct Subscription {
    handle: SubscriptionHandle,
    cancel: CancellationToken,
    task: DispatchTask,
}

/// Mutable session state, never held across a transport call
struct Shared {
    state: ConnectionState,
    /// Bumped on every connect and every teardown; stale work checks it
    generation: u64,
    capabilities: Capabilities,
    device_info: DeviceInfo,
    subscriptions: HashMap<StreamId, Subscription>,
    /// Parent token of the current link's watcher and dispatchers
    link: Option<CancellationToken>,
    next_subscription_id: u64,
}

impl Shared {
    fn transition(&mut self, to: ConnectionState) -> SessionEvent {
        let from = self.state;
        self.state = to;
        debug!("Session state {} -> {}", from, to);
        SessionEvent::StateChanged { from, to }
    }

    /// Move every subscription out of the table and cancel it
    fn drain_subscriptions(&mut self) -> Vec<Subscription> {
        let drained: Vec<Subscription> = self.subscriptions.drain().map(|(_, sub)| sub).collect();
        for sub in &drained {
            sub.cancel.cancel();
        }
        drained
    }
}

pub(crate) struct SessionInner<T: Transport> {
    transport: T,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    /// Serializes connect, subscribe, unsubscribe and disconnect
    ops: Mutex<()>,
    /// Serializes command round-trips
    control: Mutex<()>,
    shared: Mutex<Shared>,
    /// Cancelled when the session is dropped
    shutdown: CancellationToken,
}

impl<T: Transport> SessionInner<T> {
    fn emit(&self, event: &SessionEvent) {
        self.observer.on_event(event);
    }

    /// Remove a subscription whose stream ended on its own
    async fn release(&self, handle: SubscriptionHandle) {
        let mut shared = self.shared.lock().await;
        let current = shared.subscriptions.get(&handle.stream).map(|sub| sub.handle.id);
        if current == Some(handle.id) {
            shared.subscriptions.remove(&handle.stream);
            debug!("Released subscription {} on {}", handle.id, handle.stream);
        }
    }

    /// Tear down after an unsolicited disconnect
    ///
    /// Only the first call for a given link generation has any effect, so the
    /// consumer sees exactly one `Disconnected` per physical disconnect. The
    /// session stays `Disconnecting` until every dispatcher has finished and
    /// the events are out, so a reconnect cannot overtake the teardown.
    async fn handle_link_lost(&self, generation: u64, reason: String) {
        let drained = {
            let mut shared = self.shared.lock().await;
            if shared.generation != generation
                || matches!(
                    shared.state,
                    ConnectionState::Disconnected | ConnectionState::Disconnecting
                )
            {
                debug!("Ignoring stale link loss ({})", reason);
                return;
            }
            if let Some(link) = shared.link.take() {
                link.cancel();
            }
            let drained = shared.drain_subscriptions();
            shared.generation += 1;
            let transition = shared.transition(ConnectionState::Disconnecting);
            self.emit(&transition);
            drained
        };

        error!("Link lost with {} active streams: {}", drained.len(), reason);

        // The link is gone; streams are dropped without a device-side stop
        for sub in drained {
            if let Err(e) = sub.task.await {
                warn!("Dispatcher for {} did not shut down cleanly: {}", sub.handle.stream, e);
            }
        }

        let mut shared = self.shared.lock().await;
        shared.capabilities = Capabilities::default();
        let transition = shared.transition(ConnectionState::Disconnected);
        self.emit(&transition);
        self.emit(&SessionEvent::Disconnected { reason });
    }

    /// Report a transport failure seen during an explicit operation
    async fn check_link(&self, generation: u64, error: &Pm5Error) {
        if error.is_transport() {
            self.handle_link_lost(generation, error.to_string()).await;
        }
    }

    /// Undo a connect attempt that opened the link but failed afterwards
    async fn abort_connect(&self, generation: u64, error: &Pm5Error) {
        let transition = {
            let mut shared = self.shared.lock().await;
            if shared.generation != generation {
                // Link loss already tore everything down
                return;
            }
            if let Some(link) = shared.link.take() {
                link.cancel();
            }
            shared.generation += 1;
            shared.capabilities = Capabilities::default();
            shared.transition(ConnectionState::Disconnected)
        };

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect after failed connect also failed: {}", e);
        }

        self.emit(&transition);
        self.emit(&SessionEvent::Disconnected { reason: error.to_string() });
    }

    fn spawn_link_watch(
        self: &Arc<Self>,
        generation: u64,
        link: CancellationToken,
        loss: LinkLoss,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = link.cancelled() => {
                    debug!("Link watch for generation {} stopped", generation);
                }
                reason = loss => {
                    let reason = reason
                        .unwrap_or_else(|_| "transport dropped its link signal".to_string());
                    inner.handle_link_lost(generation, reason).await;
                }
            }
        });
    }
}

/// Session with one PM5 monitor over a [`Transport`]
pub struct ConnectionSession<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> ConnectionSession<T> {
    /// Create a disconnected session
    pub fn new(
        transport: T,
        observer: impl SessionObserver,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let shared = Shared {
            state: ConnectionState::Disconnected,
            generation: 0,
            capabilities: Capabilities::default(),
            device_info: DeviceInfo::default(),
            subscriptions: HashMap::new(),
            link: None,
            next_subscription_id: 0,
        };
        let inner = SessionInner {
            transport,
            observer: Arc::new(observer),
            config,
            ops: Mutex::new(()),
            control: Mutex::new(()),
            shared: Mutex::new(shared),
            shutdown: CancellationToken::new(),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Open the link, discover capabilities and read device information
    ///
    /// # Errors
    ///
    /// - [`Pm5Error::InvalidState`] if the session is not disconnected
    /// - [`Pm5Error::Transport`] / [`Pm5Error::Timeout`] if the link cannot be opened
    /// - [`Pm5Error::CapabilityMissing`] if a required characteristic is absent
    ///
    /// Every failure leaves the session `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        let inner = &self.inner;

        let generation = {
            let mut shared = inner.shared.lock().await;
            if shared.state != ConnectionState::Disconnected {
                return Err(Pm5Error::invalid_state("connect", shared.state));
            }
            shared.generation += 1;
            shared.capabilities = Capabilities::default();
            shared.device_info = DeviceInfo::default();
            let transition = shared.transition(ConnectionState::Connecting);
            inner.emit(&transition);
            shared.generation
        };

        info!("Connecting to monitor");
        let timeout = inner.config.connect_timeout();
        let opened = match tokio::time::timeout(timeout, inner.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(Pm5Error::Timeout { duration: timeout }),
        };
        let loss = match opened {
            Ok(loss) => loss,
            Err(e) => {
                warn!("Failed to open link: {}", e);
                let mut shared = inner.shared.lock().await;
                if shared.generation == generation {
                    shared.generation += 1;
                    let transition = shared.transition(ConnectionState::Disconnected);
                    inner.emit(&transition);
                }
                return Err(e);
            }
        };

        {
            let mut shared = inner.shared.lock().await;
            let link = inner.shutdown.child_token();
            shared.link = Some(link.clone());
            inner.spawn_link_watch(generation, link, loss);
            let transition = shared.transition(ConnectionState::DiscoveringCapabilities);
            inner.emit(&transition);
        }

        let capabilities = match inner.discover_capabilities().await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                warn!("Discovery failed: {}", e);
                inner.abort_connect(generation, &e).await;
                return Err(e);
            }
        };

        let device_info = if inner.config.read_device_info {
            inner.read_device_info(&capabilities).await
        } else {
            DeviceInfo::default()
        };

        let mut shared = inner.shared.lock().await;
        if shared.generation != generation {
            return Err(Pm5Error::transport_failed("link lost during discovery"));
        }
        info!(
            "Monitor ready ({} characteristics, {} optional missing)",
            capabilities.len(),
            capabilities.missing().len()
        );
        shared.capabilities = capabilities;
        shared.device_info = device_info;
        let transition = shared.transition(ConnectionState::Ready);
        inner.emit(&transition);
        inner.emit(&SessionEvent::Connected);
        Ok(())
    }

    /// Start delivering records for `stream`
    ///
    /// Subscribing to an already active stream returns the existing handle.
    ///
    /// # Errors
    ///
    /// - [`Pm5Error::InvalidState`] unless the session is `Ready`
    /// - [`Pm5Error::CapabilityMissing`] if the device lacks the characteristic
    /// - [`Pm5Error::Transport`] if notifications cannot be enabled; this also
    ///   tears the session down
    pub async fn subscribe(&self, stream: StreamId) -> Result<SubscriptionHandle> {
        let _op = self.inner.ops.lock().await;
        let inner = &self.inner;

        let (generation, link) = {
            let shared = inner.shared.lock().await;
            if shared.state != ConnectionState::Ready {
                return Err(Pm5Error::invalid_state("subscribe", shared.state));
            }
            if let Some(existing) = shared.subscriptions.get(&stream) {
                debug!("{} already subscribed", stream);
                return Ok(existing.handle);
            }
            if !shared.capabilities.supports(stream) {
                return Err(Pm5Error::capability_missing(stream.to_string()));
            }
            let link = shared.link.clone().unwrap_or_else(|| inner.shutdown.child_token());
            (shared.generation, link)
        };

        let notifications = match inner.transport.subscribe(stream.uuid()).await {
            Ok(notifications) => notifications,
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", stream, e);
                inner.check_link(generation, &e).await;
                return Err(e);
            }
        };

        let mut shared = inner.shared.lock().await;
        if shared.generation != generation || shared.state != ConnectionState::Ready {
            // Link dropped while notifications were being enabled
            return Err(Pm5Error::invalid_state("subscribe", shared.state));
        }

        shared.next_subscription_id += 1;
        let handle = SubscriptionHandle { stream, id: shared.next_subscription_id, generation };
        let cancel = link.child_token();
        let dispatcher =
            Dispatcher { inner: Arc::clone(inner), handle, cancel: cancel.clone() };
        let task = tokio::spawn(dispatcher.run(notifications));
        shared.subscriptions.insert(stream, Subscription { handle, cancel, task });

        info!("Subscribed to {} (subscription {})", stream, handle.id);
        Ok(handle)
    }

    /// Stop delivering records for `stream`
    ///
    /// Once this returns no further record for `stream` is emitted, even for
    /// notifications already in flight. Returns whether a subscription was
    /// active. Stopping notifications on the device is best-effort.
    pub async fn unsubscribe(&self, stream: StreamId) -> bool {
        let _op = self.inner.ops.lock().await;

        let removed = self.inner.shared.lock().await.subscriptions.remove(&stream);
        let Some(sub) = removed else {
            debug!("{} not subscribed", stream);
            return false;
        };

        self.inner.stop_subscription(sub).await;
        info!("Unsubscribed from {}", stream);
        true
    }

    /// Close the session
    ///
    /// Every subscription is torn down first; individual teardown failures are
    /// logged and reported as diagnostics, never returned. A no-op when
    /// already disconnected or while a lost link is still being torn down.
    pub async fn disconnect(&self) -> Result<()> {
        let _op = self.inner.ops.lock().await;
        let inner = &self.inner;

        let (generation, drained) = {
            let mut shared = inner.shared.lock().await;
            if matches!(
                shared.state,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            ) {
                return Ok(());
            }
            if let Some(link) = shared.link.take() {
                // Stops the link watch; dispatchers are children of this token
                link.cancel();
            }
            let drained = shared.drain_subscriptions();
            let transition = shared.transition(ConnectionState::Disconnecting);
            inner.emit(&transition);
            (shared.generation, drained)
        };

        info!("Disconnecting ({} active streams)", drained.len());
        for sub in drained {
            inner.stop_subscription(sub).await;
        }

        if let Err(e) = inner.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
            inner.emit(&SessionEvent::Diagnostic {
                level: DiagnosticLevel::Warn,
                message: format!("transport disconnect failed: {}", e),
            });
        }

        let mut shared = inner.shared.lock().await;
        if shared.generation == generation {
            shared.generation += 1;
            shared.capabilities = Capabilities::default();
            let transition = shared.transition(ConnectionState::Disconnected);
            inner.emit(&transition);
            inner.emit(&SessionEvent::Disconnected { reason: "requested".to_string() });
        }
        info!("Disconnected");
        Ok(())
    }

    /// Send a command frame and wait for the monitor's response
    ///
    /// # Errors
    ///
    /// - [`Pm5Error::InvalidState`] unless the session is `Ready`
    /// - [`Pm5Error::CapabilityMissing`] if the device has no command channel
    /// - [`Pm5Error::InvalidCommand`] if the frame cannot be encoded
    /// - [`Pm5Error::Timeout`] if no response arrives in time
    /// - [`Pm5Error::Format`], [`Pm5Error::Checksum`], [`Pm5Error::Protocol`]
    ///   for a malformed response
    /// - [`Pm5Error::Transport`] if the write or read fails; this also tears
    ///   the session down
    pub async fn send_command(&self, frame: &CommandFrame) -> Result<ResponseFrame> {
        let inner = &self.inner;

        let generation = {
            let shared = inner.shared.lock().await;
            if shared.state != ConnectionState::Ready {
                return Err(Pm5Error::invalid_state("send a command", shared.state));
            }
            for half in [Characteristic::ControlReceive, Characteristic::ControlTransmit] {
                if !shared.capabilities.has(half) {
                    return Err(Pm5Error::capability_missing(half.name()));
                }
            }
            shared.generation
        };

        let bytes = frame.encode()?;
        let _control = inner.control.lock().await;

        debug!("Sending {} command bytes", bytes.len());
        let control = Characteristic::ControlReceive.uuid();
        if let Err(e) = inner.transport.write_characteristic(control, &bytes).await {
            warn!("Command write failed: {}", e);
            inner.check_link(generation, &e).await;
            return Err(e);
        }

        let timeout = inner.config.command_timeout();
        let read = inner.transport.read_characteristic(Characteristic::ControlTransmit.uuid());
        let raw = match tokio::time::timeout(timeout, read).await {
            Err(_) => return Err(Pm5Error::Timeout { duration: timeout }),
            Ok(Err(e)) => {
                warn!("Command response read failed: {}", e);
                inner.check_link(generation, &e).await;
                return Err(e);
            }
            Ok(Ok(raw)) => raw,
        };

        ResponseFrame::decode(&raw).inspect_err(|e| warn!("Bad command response: {}", e))
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.shared.lock().await.state
    }

    /// Capabilities found at the last successful connect
    pub async fn capabilities(&self) -> Capabilities {
        self.inner.shared.lock().await.capabilities.clone()
    }

    pub async fn device_info(&self) -> DeviceInfo {
        self.inner.shared.lock().await.device_info.clone()
    }

    pub async fn active_streams(&self) -> Vec<StreamId> {
        self.inner.shared.lock().await.subscriptions.keys().copied().collect()
    }

    pub async fn is_subscribed(&self, stream: StreamId) -> bool {
        self.inner.shared.lock().await.subscriptions.contains_key(&stream)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport> SessionInner<T> {
    /// Cancel a subscription, wait for its dispatcher, then stop the stream
    async fn stop_subscription(&self, sub: Subscription) {
        let stream = sub.handle.stream;
        sub.cancel.cancel();

        match sub.task.await {
            Ok(Some(mut notifications)) => {
                if let Err(e) = notifications.stop().await {
                    warn!("Failed to stop notifications on {}: {}", stream, e);
                    self.emit(&SessionEvent::Diagnostic {
                        level: DiagnosticLevel::Warn,
                        message: format!("failed to stop {}: {}", stream, e),
                    });
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Dispatcher for {} did not shut down cleanly: {}", stream, e);
            }
        }
    }
}

impl<T: Transport> Drop for ConnectionSession<T> {
    fn drop(&mut self) {
        debug!("Dropping connection session");
        // Stops the link watch and every dispatcher
        self.inner.shutdown.cancel();
    }
}
