use std::sync::Arc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::utils::eta::EtaSnapshot;

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a single upload unit.
///
/// `Assembling` only occurs for chunked uploads, between the last chunk and
/// the server-side assemble request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum UploadStatus {
    Initialized,
    Scheduled,
    Uploading,
    Assembling,
    Finished,
    Cancelled,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Failed)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled | Failed) => true,
            (Initialized, Scheduled) => true,
            (Scheduled, Uploading) => true,
            (Uploading, Assembling | Finished) => true,
            (Assembling, Finished) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Scheduled => "scheduled",
            Self::Uploading => "uploading",
            Self::Assembling => "assembling",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 任务状态变更
    StatusChanged {
        upload_id: UploadId,
        old_status: UploadStatus,
        new_status: UploadStatus,
    },

    Progress {
        upload_id: UploadId,
        uploaded_bytes: u64,
        total_bytes: u64,
    },

    /// Emitted exactly once, after the upload settled in a terminal status.
    Finished {
        upload_id: UploadId,
        status: UploadStatus,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> UploadId {
        match self {
            Self::StatusChanged { upload_id, .. }
            | Self::Progress { upload_id, .. }
            | Self::Finished { upload_id, .. } => *upload_id,
        }
    }
}

/// Observer invoked synchronously for every event of an upload.
pub type UploadListener = Arc<dyn Fn(&UploadEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploaderStatus {
    Idle,
    Uploading,
    Paused,
}

#[derive(Debug, Clone)]
pub enum UploaderEvent {
    Paused,

    Resumed,

    /// Aggregate over every tracked upload.
    Progress {
        uploaded_bytes: u64,
        total_bytes: u64,
        eta: EtaSnapshot,
    },

    /// 所有任务完成
    Finished {
        uploads: usize,
        total_bytes: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum NodeType {
    File,
    Folder,
}

/// Permission bit set of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const CREATE: Permission = Permission(4);
    pub const READ: Permission = Permission(1);
    pub const UPDATE: Permission = Permission(2);
    pub const DELETE: Permission = Permission(8);
    pub const SHARE: Permission = Permission(16);
    pub const ALL: Permission = Permission(31);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permission(self.0 | rhs.0)
    }
}

/// Remote folder uploads are written into. Only the fields the uploader consumes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Folder {
    pub source: String,
    pub node_type: NodeType,
    pub permissions: Permission,
    pub owner: Option<String>,
}

impl Folder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            node_type: NodeType::Folder,
            permissions: Permission::ALL,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Permission) -> Self {
        self.permissions = permissions;
        self
    }
}

// 静态断言确保类型是 Send的
const _: () = {
    fn assert_send<T: Send + Sync>() {}
    fn assert_types() {
        assert_send::<UploadEvent>();
        assert_send::<UploaderEvent>();
        assert_send::<Folder>();
    }
};
