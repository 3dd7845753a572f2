#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::sync::Semaphore;
use uplink::{DavRequest, DavResponse, Transport, TransportError};

pub const FILES_ROOT: &str = "https://cloud.example.com/remote.php/dav/files/alice";
pub const UPLOADS_ROOT: &str = "https://cloud.example.com/remote.php/dav/uploads/alice";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body_len: usize,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

struct Rule {
    method: String,
    url_contains: String,
    status: StatusCode,
    once: bool,
}

/// In-memory transport recording every request.
///
/// Answers 201 unless a rule matches. Blocked methods wait until released.
pub struct MockTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    rules: Mutex<Vec<Rule>>,
    blocked: Mutex<Vec<String>>,
    gate: Arc<Semaphore>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            blocked: Mutex::new(Vec::new()),
            gate: Arc::new(Semaphore::new(0)),
        })
    }

    pub fn respond(&self, method: &str, url_contains: &str, status: StatusCode) {
        self.rules.lock().push(Rule {
            method: method.to_string(),
            url_contains: url_contains.to_string(),
            status,
            once: false,
        });
    }

    pub fn respond_once(&self, method: &str, url_contains: &str, status: StatusCode) {
        self.rules.lock().push(Rule {
            method: method.to_string(),
            url_contains: url_contains.to_string(),
            status,
            once: true,
        });
    }

    pub fn block(&self, method: &str) {
        self.blocked.lock().push(method.to_string());
    }

    pub fn release(&self) {
        self.blocked.lock().clear();
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_with(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests_with(method).len()
    }

    /// Polls until at least `n` requests of `method` arrived.
    pub async fn wait_for(&self, method: &str, n: usize) {
        while self.count(method) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn status_for(&self, method: &str, url: &str) -> StatusCode {
        let mut rules = self.rules.lock();
        let position = rules
            .iter()
            .position(|rule| rule.method == method && url.contains(&rule.url_contains));

        match position {
            Some(index) if rules[index].once => rules.remove(index).status,
            Some(index) => rules[index].status,
            None => StatusCode::CREATED,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: DavRequest) -> Result<DavResponse, TransportError> {
        let method = request.method.to_string();
        let body_len = request.body.as_ref().map(|body| body.len()).unwrap_or(0);
        self.requests.lock().push(RecordedRequest {
            method: method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body_len,
        });

        let blocked = self.blocked.lock().contains(&method);
        if blocked {
            let _ = self.gate.acquire().await;
        }

        if let Some(progress) = &request.progress {
            progress(body_len as u64);
        }

        let status = self.status_for(&method, &request.url);
        let response = DavResponse::new(status);
        if status.is_success() {
            Ok(response)
        } else {
            Err(TransportError::status(response))
        }
    }
}

/// Collects the events of an upload.
pub fn record_events(upload: &dyn uplink::Upload) -> Arc<Mutex<Vec<uplink::UploadEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    upload.on_event(Arc::new(move |event: &uplink::UploadEvent| sink.lock().push(event.clone())));
    events
}

pub fn status_changes(events: &[uplink::UploadEvent]) -> Vec<uplink::UploadStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            uplink::UploadEvent::StatusChanged { new_status, .. } => Some(*new_status),
            _ => None,
        })
        .collect()
}

pub fn finished_count(events: &[uplink::UploadEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, uplink::UploadEvent::Finished { .. }))
        .count()
}
