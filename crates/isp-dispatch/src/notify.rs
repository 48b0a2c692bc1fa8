//! Consumer notifications

use isp_protocol::{FreeBuffer, LogicalCaptureMode, PostProcessFrame, StatsBuffer};
use tokio::sync::mpsc;
use tracing::warn;

/// What a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A frame buffer was filled and handed over
    FrameDone,
    /// A statistics buffer is ready
    Stats,
    /// Engine message without payload
    Message,
    /// Post-processing engine completion
    PostProcess,
}

/// Data attached to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    None,
    /// Filled buffer, now owned by the consumer
    Frame(FreeBuffer),
    Stats(StatsBuffer),
    PostProcess(PostProcessFrame),
}

/// Envelope delivered to the application layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Engine message or output id
    pub msg_id: u32,
    /// Frame sequence number
    pub frame_id: u32,
    pub mode: Option<LogicalCaptureMode>,
    pub payload: Payload,
    /// Set when the event failed and the payload is missing
    pub error: bool,
}

impl Notification {
    /// Frame buffer carried by this notification
    pub fn frame(&self) -> Option<&FreeBuffer> {
        match &self.payload {
            Payload::Frame(buffer) => Some(buffer),
            _ => None,
        }
    }
}

/// Sending half of the consumer queue
///
/// Delivery never waits: a full or closed queue hands the notification back
/// to the caller.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSender {
    /// Create a bounded notification queue
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Queue a notification without blocking
    pub fn send(&self, notification: Notification) -> Result<(), Notification> {
        self.tx.try_send(notification).map_err(|e| {
            warn!(
                kind = ?notification.kind,
                frame_id = notification.frame_id,
                "Consumer queue unavailable: {}",
                e
            );
            e.into_inner()
        })
    }
}
