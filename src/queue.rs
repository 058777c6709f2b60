//! Work queue seam and its in-process channel implementation

use crate::{CaptureError, CaptureRequest, FailReason};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// The queue the pipeline feeds and reports to
///
/// Redelivery and retry policy belong to the implementation; the pipeline
/// reports each terminal outcome exactly once.
#[async_trait]
pub trait CaptureQueue: Send + Sync {
    async fn enqueue_for_render(&self, capture: &CaptureRequest) -> Result<(), CaptureError>;

    async fn notify_failure(
        &self,
        capture: &CaptureRequest,
        reason: &FailReason,
    ) -> Result<(), CaptureError>;

    async fn notify_success(&self, capture: &CaptureRequest) -> Result<(), CaptureError>;
}

/// Terminal outcome published to downstream consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueNotice {
    Succeeded(Uuid),
    Failed(Uuid, FailReason),
}

/// Consumer ends of a [`ChannelQueue`]
///
/// The render channel carries capture ids; workers load the current record
/// from the store before running it.
pub struct QueueReceivers {
    pub renders: mpsc::Receiver<Uuid>,
    pub notices: mpsc::UnboundedReceiver<QueueNotice>,
}

#[derive(Clone)]
pub struct ChannelQueue {
    renders: mpsc::Sender<Uuid>,
    notices: mpsc::UnboundedSender<QueueNotice>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, QueueReceivers) {
        let (renders_tx, renders_rx) = mpsc::channel(capacity);
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        (
            Self {
                renders: renders_tx,
                notices: notices_tx,
            },
            QueueReceivers {
                renders: renders_rx,
                notices: notices_rx,
            },
        )
    }
}

#[async_trait]
impl CaptureQueue for ChannelQueue {
    async fn enqueue_for_render(&self, capture: &CaptureRequest) -> Result<(), CaptureError> {
        debug!("Queueing capture {} for render", capture.id);
        self.renders.send(capture.id).await?;
        Ok(())
    }

    async fn notify_failure(
        &self,
        capture: &CaptureRequest,
        reason: &FailReason,
    ) -> Result<(), CaptureError> {
        self.notices
            .send(QueueNotice::Failed(capture.id, reason.clone()))?;
        Ok(())
    }

    async fn notify_success(&self, capture: &CaptureRequest) -> Result<(), CaptureError> {
        self.notices.send(QueueNotice::Succeeded(capture.id))?;
        Ok(())
    }
}
