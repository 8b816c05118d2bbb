//! Transport traits the session drives
//!
//! A transport maps the session's needs onto a concrete BLE stack. The session
//! never assumes a platform API; it only uses the methods below.

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::Result;

/// Fired by the transport when the link drops without being asked to
///
/// The value is a human-readable reason. Dropping the sender without sending
/// is also treated as link loss.
pub type LinkLoss = oneshot::Receiver<String>;

/// One subscribed characteristic's notifications
#[async_trait::async_trait]
pub trait NotificationStream: Send + 'static {
    /// Wait for the next notification
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - Notification received
    /// - `Ok(None)` - Stream ended (stopped, or the link went away)
    /// - `Err(e)` - Transport failure
    ///
    /// Notifications are returned in the order the device sent them.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;

    /// Disable notifications on the device side
    ///
    /// Called once when the subscription is torn down. Errors are logged by
    /// the session and otherwise ignored.
    async fn stop(&mut self) -> Result<()>;
}

/// Access to one physical device's GATT characteristics
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the link
    ///
    /// Returns a signal that fires if the link is later lost.
    async fn connect(&self) -> Result<LinkLoss>;

    /// Close the link
    async fn disconnect(&self) -> Result<()>;

    /// Every characteristic the device exposes
    async fn list_characteristics(&self) -> Result<Vec<Uuid>>;

    async fn read_characteristic(&self, id: Uuid) -> Result<Vec<u8>>;

    async fn write_characteristic(&self, id: Uuid, data: &[u8]) -> Result<()>;

    /// Enable notifications and return the stream that delivers them
    async fn subscribe(&self, id: Uuid) -> Result<Box<dyn NotificationStream>>;
}
