use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use super::errors::{Result, UploadError};
use super::types::{UploadEvent, UploadId, UploadListener, UploadStatus};

/// State shared by every kind of upload: identity, status, byte counters,
/// cancellation and listeners.
pub struct UploadCore {
    id: UploadId,
    source: RwLock<String>,
    status: watch::Sender<UploadStatus>,
    total_bytes: AtomicU64,
    uploaded_bytes: AtomicU64,
    start_time: DateTime<Utc>,
    token: CancellationToken,
    listeners: RwLock<Vec<UploadListener>>,
    started: AtomicBool,
    finished: AtomicBool,
}

impl UploadCore {
    pub fn new(source: impl Into<String>, total_bytes: u64) -> Self {
        let (status, _) = watch::channel(UploadStatus::Initialized);

        Self {
            id: UploadId::new(),
            source: RwLock::new(source.into()),
            status,
            total_bytes: AtomicU64::new(total_bytes),
            uploaded_bytes: AtomicU64::new(0),
            start_time: Utc::now(),
            token: CancellationToken::new(),
            listeners: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Destination URL.
    pub fn source(&self) -> String {
        self.source.read().clone()
    }

    pub fn status(&self) -> UploadStatus {
        *self.status.borrow()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::SeqCst)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: UploadListener) {
        self.listeners.write().push(listener);
    }

    /// Marks the upload as started; a second call is a protocol violation.
    pub fn begin(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(UploadError::AlreadyStarted(self.id));
        }
        Ok(())
    }

    /// Applies `next` if the state machine allows it. Returns whether it changed.
    pub fn set_status(&self, next: UploadStatus) -> bool {
        let mut previous = next;
        let changed = self.status.send_if_modified(|status| {
            if status.can_transition_to(next) {
                previous = *status;
                *status = next;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(upload_id = %self.id, from = %previous, to = %next, "upload status changed");
            self.emit(&UploadEvent::StatusChanged {
                upload_id: self.id,
                old_status: previous,
                new_status: next,
            });
        }
        changed
    }

    /// 取消上传
    pub fn cancel(&self) {
        self.set_status(UploadStatus::Cancelled);
        self.token.cancel();

        // never started, nobody else will report it
        if !self.is_started() {
            self.emit_finished();
        }
    }

    /// Stops in-flight work without deciding the final status.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Runs `fut` unless the upload gets cancelled first.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(UploadError::cancelled()),
            result = fut => result,
        }
    }

    /// Records the terminal status matching `err` and returns the error to propagate.
    pub fn settle(&self, err: UploadError) -> Result<()> {
        if err.is_cancelled() {
            self.set_status(UploadStatus::Cancelled);
        } else {
            self.set_status(UploadStatus::Failed);
        }

        if self.status() == UploadStatus::Cancelled {
            debug!(upload_id = %self.id, "upload cancelled");
            return Err(err.into_cancelled());
        }
        debug!(upload_id = %self.id, error = %err, "upload failed");
        Err(err)
    }

    pub fn set_total_bytes(&self, total: u64) {
        self.total_bytes.store(total, Ordering::SeqCst);
    }

    pub fn set_uploaded_bytes(&self, uploaded: u64) {
        self.uploaded_bytes.store(uploaded, Ordering::SeqCst);
    }

    pub fn add_uploaded_bytes(&self, delta: u64) {
        self.uploaded_bytes.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn emit_progress(&self) {
        self.emit(&UploadEvent::Progress {
            upload_id: self.id,
            uploaded_bytes: self.uploaded_bytes(),
            total_bytes: self.total_bytes(),
        });
    }

    /// Emits `Finished` the first time it is called, later calls are ignored.
    pub fn emit_finished(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(&UploadEvent::Finished {
            upload_id: self.id,
            status: self.status(),
        });
    }

    /// Resolves with the terminal status.
    pub async fn wait(&self) -> UploadStatus {
        let mut status = self.status.subscribe();
        match status.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    pub fn relocate(&self, source: impl Into<String>) {
        let source = source.into();
        debug!(upload_id = %self.id, source = %source, "upload relocated");
        *self.source.write() = source;
    }

    fn emit(&self, event: &UploadEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for UploadCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCore")
            .field("id", &self.id)
            .field("source", &*self.source.read())
            .field("status", &self.status())
            .field("total_bytes", &self.total_bytes())
            .field("uploaded_bytes", &self.uploaded_bytes())
            .finish()
    }
}
