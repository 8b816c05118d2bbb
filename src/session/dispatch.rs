//! Per-subscription dispatch task
//!
//! Each active subscription owns one task that reads its notification stream,
//! decodes every frame and hands the result to the observer. A bad frame is
//! reported and skipped; only the end of the stream or a transport failure
//! stops the task.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{SessionInner, SubscriptionHandle};
use crate::codec::telemetry;
use crate::observer::{DiagnosticLevel, ParseErrorKind, SessionEvent, SessionObserver};
use crate::transport::{NotificationStream, Transport};
use crate::types::{RawFrame, StreamRoute, TelemetryRecord};
use crate::Pm5Error;

/// Outcome of routing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    Record,
    Raw,
    Rejected,
}

/// Decode one frame and emit the matching event
pub(crate) fn dispatch_frame(observer: &dyn SessionObserver, frame: RawFrame) -> Dispatched {
    let stream = frame.stream;

    if stream.route() == StreamRoute::Raw {
        trace!("Raw frame on {} ({} bytes)", stream, frame.len());
        observer.on_event(&SessionEvent::Raw { frame });
        return Dispatched::Raw;
    }

    match telemetry::decode_for_stream(stream, &frame.data) {
        Ok(Some(TelemetryRecord::Unknown { tag, payload })) => {
            debug!("Unknown tag {:#04x} on {} ({} bytes)", tag, stream, payload.len());
            observer.on_event(&SessionEvent::ParseError {
                stream,
                kind: ParseErrorKind::UnknownTag { tag },
            });
            Dispatched::Rejected
        }
        Ok(Some(record)) => {
            observer.on_event(&SessionEvent::Telemetry {
                stream,
                record,
                received_at: frame.received_at,
            });
            Dispatched::Record
        }
        Ok(None) => Dispatched::Rejected,
        Err(Pm5Error::Format { context, expected, actual }) => {
            warn!("Dropping {} frame on {}: {} of {} bytes", context, stream, actual, expected);
            observer.on_event(&SessionEvent::ParseError {
                stream,
                kind: ParseErrorKind::Truncated { expected, actual },
            });
            Dispatched::Rejected
        }
        Err(e) => {
            warn!("Dropping frame on {}: {}", stream, e);
            Dispatched::Rejected
        }
    }
}

/// Reads one subscription's notifications until cancelled or the stream ends
pub(crate) struct Dispatcher<T: Transport> {
    pub(crate) inner: Arc<SessionInner<T>>,
    pub(crate) handle: SubscriptionHandle,
    pub(crate) cancel: CancellationToken,
}

impl<T: Transport> Dispatcher<T> {
    /// Run until cancelled or the stream ends
    ///
    /// Returns the stream when cancelled so the caller can stop it; returns
    /// `None` when the stream ended on its own and has already been released.
    pub(crate) async fn run(
        self,
        mut stream: Box<dyn NotificationStream>,
    ) -> Option<Box<dyn NotificationStream>> {
        let id = self.handle.stream();
        debug!("Dispatcher for {} started", id);
        let mut frame_count = 0u64;
        let mut rejected = 0u64;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Dispatcher for {} cancelled", id);
                    break;
                }
                result = stream.next_frame() => result,
            };

            match result {
                Ok(Some(bytes)) => {
                    // Late frames after cancellation are dropped unseen
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    frame_count += 1;
                    let frame = RawFrame::new(bytes, id);
                    if dispatch_frame(self.inner.observer.as_ref(), frame) == Dispatched::Rejected
                    {
                        rejected += 1;
                    }
                }
                Ok(None) => {
                    info!("Stream {} ended after {} frames", id, frame_count);
                    self.inner.release(self.handle).await;
                    self.inner.emit(&SessionEvent::Diagnostic {
                        level: DiagnosticLevel::Info,
                        message: format!("stream {} ended", id),
                    });
                    return None;
                }
                Err(e) => {
                    error!("Stream {} failed after {} frames: {}", id, frame_count, e);
                    self.inner.emit(&SessionEvent::Diagnostic {
                        level: DiagnosticLevel::Error,
                        message: format!("stream {} failed: {}", id, e),
                    });
                    self.inner.release(self.handle).await;
                    if e.is_transport() {
                        let inner = Arc::clone(&self.inner);
                        let generation = self.handle.generation;
                        let reason = e.to_string();
                        tokio::spawn(async move {
                            inner.handle_link_lost(generation, reason).await;
                        });
                    }
                    return None;
                }
            }
        }

        debug!("Dispatcher for {} stopped ({} frames, {} rejected)", id, frame_count, rejected);
        Some(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<SessionEvent>>);

    impl SessionObserver for Collect {
        fn on_event(&self, event: &SessionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn truncated_frames_become_parse_errors() {
        let observer = Collect::default();
        let outcome = dispatch_frame(&observer, RawFrame::new(vec![0; 5], StreamId::StrokeData));

        assert_eq!(outcome, Dispatched::Rejected);
        let events = observer.0.lock().unwrap();
        assert!(matches!(
            events[0],
            SessionEvent::ParseError {
                stream: StreamId::StrokeData,
                kind: ParseErrorKind::Truncated { expected: 20, actual: 5 }
            }
        ));
    }

    #[test]
    fn unknown_tags_become_parse_errors() {
        let observer = Collect::default();
        let outcome =
            dispatch_frame(&observer, RawFrame::new(vec![0x3A, 1, 2], StreamId::Multiplexed));

        assert_eq!(outcome, Dispatched::Rejected);
        let events = observer.0.lock().unwrap();
        assert!(matches!(
            events[0],
            SessionEvent::ParseError { kind: ParseErrorKind::UnknownTag { tag: 0x3A }, .. }
        ));
    }

    #[test]
    fn custom_streams_pass_through() {
        let observer = Collect::default();
        let id = StreamId::Custom(uuid::Uuid::from_u128(7));
        let outcome = dispatch_frame(&observer, RawFrame::new(vec![9, 9], id));

        assert_eq!(outcome, Dispatched::Raw);
        let events = observer.0.lock().unwrap();
        match &events[0] {
            SessionEvent::Raw { frame } => assert_eq!(&frame.data[..], &[9, 9]),
            other => panic!("Expected Raw event, got {:?}", other),
        }
    }
}
