use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Body, Client};
use tracing::debug;
use crate::config::Config;
use super::progress_stream::{body_stream, ProgressStream};
use super::transport::{DavRequest, DavResponse, Transport, TransportError};

/// WebDAV transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct DavClient {
    client: Client,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
}

impl DavClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            username: None,
            password: None,
            token: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let mut client = Self::new(Duration::from_secs(config.timeout_secs))?;
        client.username = config.username.clone();
        client.password = config.password.clone();
        client.token = config.token.clone();
        Ok(client)
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn create_headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for DavClient {
    async fn request(&self, request: DavRequest) -> Result<DavResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "dav request");

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(self.create_headers()?)
            .headers(request.headers);

        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_ref());
        }

        if let Some(body) = request.body {
            let length = body.len();
            let stream = ProgressStream::new(body_stream(body), request.progress);
            builder = builder
                .header(CONTENT_LENGTH, length)
                .body(Body::wrap_stream(stream));
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let response = DavResponse { status, headers, body };
        if !status.is_success() {
            debug!(url = %request.url, status = %status, "dav request rejected");
            return Err(TransportError::status(response));
        }

        Ok(response)
    }
}
