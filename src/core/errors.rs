use thiserror::Error;
use crate::dav::{DavResponse, TransportError};
use super::types::UploadId;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Aborted by the caller or by a cancelled signal. Not a failure.
    #[error("Upload cancelled")]
    Cancelled {
        #[source]
        source: Option<TransportError>,
    },

    /// Network or server error. The HTTP response is kept when one was received.
    #[error("Upload failed: {source}")]
    Failed {
        #[source]
        source: TransportError,
    },

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid destination folder: {0}")]
    InvalidDestination(String),

    #[error("Invalid upload entry: {0}")]
    InvalidEntry(String),

    #[error("Upload {0} was already started")]
    AlreadyStarted(UploadId),

    #[error("Upload tree {0} was already initialized")]
    AlreadyInitialized(UploadId),

    #[error("Upload tree {0} must be initialized before it is started")]
    NotInitialized(UploadId),

    #[error("Config error: {0}")]
    Config(String),
}

impl UploadError {
    pub fn cancelled() -> Self {
        Self::Cancelled { source: None }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP response attached to a failed request, if the server answered at all.
    pub fn response(&self) -> Option<&DavResponse> {
        match self {
            Self::Failed { source } => source.response(),
            Self::Cancelled { source: Some(source) } => source.response(),
            _ => None,
        }
    }

    pub(crate) fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::Aborted => Self::Cancelled { source: Some(err) },
            err => Self::Failed { source: err },
        }
    }

    /// Re-labels an error as a cancellation, keeping the transport cause.
    pub(crate) fn into_cancelled(self) -> Self {
        match self {
            Self::Failed { source } => Self::Cancelled { source: Some(source) },
            Self::Cancelled { source } => Self::Cancelled { source },
            _ => Self::cancelled(),
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for UploadError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderName> for UploadError {
    fn from(err: reqwest::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<toml::de::Error> for UploadError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
