use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use super::headers::DESTINATION;

/// Receives the cumulative number of body bytes handed to the network.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone)]
pub struct DavRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub progress: Option<ProgressFn>,
}

impl DavRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            progress: None,
        }
    }

    pub fn put(url: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(Method::PUT, url);
        request.body = Some(body);
        request
    }

    pub fn mkcol(url: impl Into<String>) -> Self {
        Self::new(mkcol_method(), url)
    }

    pub fn move_to(url: impl Into<String>, destination: &str) -> Result<Self, TransportError> {
        let mut request = Self::new(move_method(), url);
        let value = HeaderValue::from_str(destination)
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        request.headers.insert(DESTINATION, value);
        Ok(request)
    }

    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for DavRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DavResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DavResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {}", .response.status)]
    Status {
        response: DavResponse,
    },

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request aborted")]
    Aborted,
}

impl TransportError {
    pub fn status(response: DavResponse) -> Self {
        Self::Status { response }
    }

    pub fn response(&self) -> Option<&DavResponse> {
        match self {
            Self::Status { response } => Some(response),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { response } => Some(response.status),
            Self::Http(err) => err.status(),
            _ => None,
        }
    }

    /// No usable response reached us: connection refused/reset, timeouts.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect() || err.is_timeout() || (err.is_request() && err.status().is_none()),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// The HTTP primitive uploads are built on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: DavRequest) -> Result<DavResponse, TransportError>;
}

pub fn mkcol_method() -> Method {
    Method::from_bytes(b"MKCOL").expect("MKCOL is a valid method token")
}

pub fn move_method() -> Method {
    Method::from_bytes(b"MOVE").expect("MOVE is a valid method token")
}
