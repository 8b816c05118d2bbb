//! Raw notification frames as delivered by the transport

use std::sync::Arc;
use std::time::Instant;

use super::StreamId;

/// One notification payload, tagged with the stream it arrived on
///
/// Frames are handed to the codec once and dropped; decoded records never
/// borrow from them.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Notification bytes (zero-copy via Arc)
    pub data: Arc<[u8]>,

    /// Stream the notification arrived on
    pub stream: StreamId,

    /// Arrival time, taken when the dispatcher received the bytes
    pub received_at: Instant,
}

impl RawFrame {
    /// Create a new frame stamped with the current instant
    pub fn new(data: Vec<u8>, stream: StreamId) -> Self {
        Self { data: data.into(), stream, received_at: Instant::now() }
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the notification carried no bytes at all
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
