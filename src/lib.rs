pub mod config;
pub mod core;
pub mod dav;
pub mod source;
pub mod uploader;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use core::{
    ConflictResolution,
    ConflictResolver,
    Folder,
    JobQueue,
    NodeType,
    Permission,
    Result,
    Upload,
    UploadError,
    UploadEvent,
    UploadId,
    UploadStatus,
    UploaderEvent,
    UploaderStatus,
};

pub use dav::{DavClient, DavRequest, DavResponse, Transport, TransportError};
pub use source::{Directory, SourceFile, UploadEntry};
pub use uploader::{BatchOptions, UploadOptions, Uploader, UploaderOptions};
pub use uploaders::{UploadFile, UploadFileTree};
pub use utils::eta::{Eta, EtaSnapshot};
