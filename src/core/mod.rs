mod errors;
mod queue;
mod traits;
mod types;
mod upload;

pub use errors::{Result, UploadError};
pub use queue::JobQueue;
pub use traits::{ConflictResolution, ConflictResolver, Upload};
pub use types::{
    Folder,
    NodeType,
    Permission,
    UploadEvent,
    UploadId,
    UploadListener,
    UploadStatus,
    UploaderEvent,
    UploaderStatus,
};
pub use upload::UploadCore;

#[cfg(test)]
mod tests;
