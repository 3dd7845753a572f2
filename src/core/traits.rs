use std::collections::HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use super::errors::Result;
use super::queue::JobQueue;
use super::types::{UploadId, UploadListener, UploadStatus};
use super::upload::UploadCore;

/// 上传单元 - a file or a directory tree
#[async_trait]
pub trait Upload: Send + Sync {
    fn core(&self) -> &UploadCore;

    fn id(&self) -> UploadId {
        self.core().id()
    }

    /// Destination URL.
    fn source(&self) -> String {
        self.core().source()
    }

    fn status(&self) -> UploadStatus {
        self.core().status()
    }

    fn total_bytes(&self) -> u64 {
        self.core().total_bytes()
    }

    fn uploaded_bytes(&self) -> u64 {
        self.core().uploaded_bytes()
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.core().start_time()
    }

    /// Directory uploads only aggregate their children.
    fn is_tree(&self) -> bool {
        false
    }

    fn on_event(&self, listener: UploadListener) {
        self.core().add_listener(listener);
    }

    fn cancel(&self) {
        self.core().cancel();
    }

    /// Pushes the upload's requests onto `queue` and drives it to a terminal status.
    async fn start(&self, queue: &JobQueue) -> Result<()>;

    /// Resolves with the terminal status.
    async fn wait(&self) -> UploadStatus {
        self.core().wait().await
    }
}

/// Answer to a name conflict in an existing remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Skip the whole directory, it ends cancelled.
    Abort,
    /// Original child name to target name. Missing names are kept.
    Rename(HashMap<String, String>),
}

/// Called when a directory already exists on the server, before any child is uploaded.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, names: Vec<String>, path: &str) -> ConflictResolution;
}
