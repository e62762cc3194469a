//! Asynchronous error and warning notifications.
//!
//! Pipeline threads never return errors to the application directly.
//! Problems are logged and posted as [`Event`]s on a bounded channel that
//! the application polls at its leisure. If nobody drains the channel,
//! new events are dropped rather than blocking a real-time thread.

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    /// A driver call failed.
    DriverError,
    /// The sensor device could not be opened.
    DriverMissing,
    /// Image data expected from the driver never arrived.
    ImageDropped,
    /// The frame queue overflowed and the drop policy evicted frames.
    FrameLimitHit,
    /// A caller-owned image has the wrong size.
    ResolutionMismatch,
    /// A caller-owned image has the wrong pixel format.
    FormatMismatch,
    /// A buffer arrived that no request accounts for.
    UnexpectedBuffer,
    /// A caller-owned image stayed locked past the write deadline.
    ImageTargetLocked,
    /// A frame was requested from a sensor that is not running.
    SensorStopped,
    /// A lens position was needed from before the recorded history.
    LensHistoryError,
    /// A flash state was needed from before the recorded history.
    FlashHistoryError,
    /// A sound clip could not be played.
    PlaybackFailed,
    /// A pipeline thread failed in a way it could not recover from.
    InternalError,
}

/// How bad it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    /// Worth knowing; nothing was lost.
    Info,
    /// Something was lost or late; capture continues.
    Warning,
    /// A failure the application should act on.
    Error,
}

/// A notification from the pipeline or a device.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// How bad it is.
    pub severity: Severity,
    /// Human-readable detail.
    pub message: String,
    /// When it was posted.
    pub time: DateTime<Utc>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {:?}/{:?}] {}",
            self.time.format("%H:%M:%S%.6f"),
            self.severity,
            self.kind,
            self.message
        )
    }
}

/// Creates a connected sink and stream holding at most `capacity` events.
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    (EventSink { tx }, EventStream { rx })
}

/// Posting side, cloned into every thread and device that reports.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Event>,
}

impl EventSink {
    /// Logs and posts an event. Never blocks.
    pub fn post(&self, kind: EventKind, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!(?kind, "{}", message),
            Severity::Warning => tracing::warn!(?kind, "{}", message),
            Severity::Error => tracing::error!(?kind, "{}", message),
        }

        let event = Event {
            kind,
            severity,
            message,
            time: Utc::now(),
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!(kind = ?event.kind, "Event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Posts an informational event.
    pub fn info(&self, kind: EventKind, message: impl Into<String>) {
        self.post(kind, Severity::Info, message);
    }

    /// Posts a warning.
    pub fn warning(&self, kind: EventKind, message: impl Into<String>) {
        self.post(kind, Severity::Warning, message);
    }

    /// Posts an error.
    pub fn error(&self, kind: EventKind, message: impl Into<String>) {
        self.post(kind, Severity::Error, message);
    }
}

/// Receiving side. Clones share one queue: each event is seen once.
#[derive(Debug, Clone)]
pub struct EventStream {
    rx: Receiver<Event>,
}

impl EventStream {
    /// Next event, if one is waiting.
    pub fn try_next(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes every event currently queued.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }

    /// Events waiting to be read.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no event is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_drain() {
        let (sink, stream) = channel(8);
        sink.warning(EventKind::FrameLimitHit, "too many frames");
        sink.error(EventKind::DriverError, "ioctl failed");

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::FrameLimitHit);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[1].severity, Severity::Error);
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let (sink, stream) = channel(2);
        for i in 0..5 {
            sink.info(EventKind::UnexpectedBuffer, format!("buffer {i}"));
        }
        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].message, "buffer 1");
    }

    #[test]
    fn test_post_after_stream_dropped_is_silent() {
        let (sink, stream) = channel(2);
        drop(stream);
        sink.error(EventKind::InternalError, "nobody listening");
    }
}
