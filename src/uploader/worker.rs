use std::sync::Weak;
use tokio::sync::mpsc;
use tracing::info;
use crate::core::{UploadEvent, UploaderEvent};
use super::UploaderInner;

/// Aggregates per-upload events into uploader-level progress and completion.
///
/// Events are handled one at a time, in arrival order.
pub(crate) struct UploaderWorker {
    inner: Weak<UploaderInner>,
    event_rx: mpsc::UnboundedReceiver<UploadEvent>,
}

impl UploaderWorker {
    pub(crate) fn new(inner: Weak<UploaderInner>, event_rx: mpsc::UnboundedReceiver<UploadEvent>) -> Self {
        Self { inner, event_rx }
    }

    pub(crate) async fn run(mut self) {
        while let Some(event) = self.event_rx.recv().await {
            let Some(inner) = self.inner.upgrade() else {
                break;
            };

            match event {
                UploadEvent::Progress { .. } => inner.on_progress(),
                UploadEvent::Finished { .. } => Self::on_finished(&inner).await,
                UploadEvent::StatusChanged { .. } => {}
            }
        }
    }

    async fn on_finished(inner: &UploaderInner) {
        inner.on_progress();
        if !inner.all_settled() {
            return;
        }

        inner.queue.on_idle().await;

        // uploads may have been added or reset while waiting
        if !inner.all_settled() {
            return;
        }

        let uploads = inner.uploads.lock().len();
        let (_, total_bytes) = inner.aggregate();
        info!(uploads, total_bytes, "all uploads settled");
        let _ = inner.event_tx.send(UploaderEvent::Finished { uploads, total_bytes });
        inner.reset();
    }
}
