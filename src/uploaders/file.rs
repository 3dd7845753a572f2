use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::{debug, info};
use crate::config::UploadConfig;
use crate::core::{JobQueue, Result, Upload, UploadCore, UploadError, UploadStatus};
use crate::dav::headers::{self, DESTINATION, TOTAL_LENGTH};
use crate::dav::{DavRequest, ProgressFn, Transport};
use crate::source::SourceFile;
use crate::utils::retry::{retry_with_config, RetryConfig};

const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
pub struct UploadFileOptions {
    /// Sent with the PUT of a whole file and with the assemble request.
    pub headers: HeaderMap,
    pub no_chunking: bool,
    pub config: UploadConfig,
    /// Root of the temporary chunk workspaces. Chunking needs one.
    pub chunk_root: Option<String>,
    /// Overrides `config.retries`.
    pub retries: Option<u32>,
}

/// 分片信息
#[derive(Debug, Clone, Copy)]
struct ChunkInfo {
    index: u64,
    offset: u64,
    end: u64,
}

/// Uploads one file, whole or as chunks assembled by the server.
pub struct UploadFile {
    core: Arc<UploadCore>,
    file: SourceFile,
    transport: Arc<dyn Transport>,
    headers: HeaderMap,
    chunk_size: u64,
    chunk_root: Option<String>,
    retries: u32,
}

impl UploadFile {
    pub fn new(
        source: impl Into<String>,
        file: SourceFile,
        transport: Arc<dyn Transport>,
        options: UploadFileOptions,
    ) -> Self {
        let size = file.size();
        let max_chunk_size = options.config.chunk_size_for(size);
        let chunked = !options.no_chunking
            && max_chunk_size > 0
            && size > max_chunk_size
            && options.config.chunking_allowed()
            && options.chunk_root.is_some();

        Self {
            core: Arc::new(UploadCore::new(source, size)),
            file,
            transport,
            headers: options.headers,
            chunk_size: if chunked { max_chunk_size } else { 0 },
            chunk_root: options.chunk_root,
            retries: options.retries.unwrap_or(options.config.retries),
        }
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk_size > 0
    }

    /// Chunk size in use, 0 for a whole-file upload.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn number_of_chunks(&self) -> u64 {
        if self.is_chunked() {
            self.file.size().div_ceil(self.chunk_size)
        } else {
            1
        }
    }

    /// 计算分片信息
    fn calculate_chunks(&self) -> Vec<ChunkInfo> {
        let size = self.file.size();
        (0..self.number_of_chunks())
            .map(|index| {
                let offset = index * self.chunk_size;
                ChunkInfo {
                    index,
                    offset,
                    end: std::cmp::min(offset + self.chunk_size, size),
                }
            })
            .collect()
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig::default().with_max_retries(self.retries)
    }

    async fn run(&self, queue: &JobQueue) -> Result<()> {
        if self.is_chunked() {
            self.upload_chunked(queue).await
        } else {
            self.upload_whole(queue).await
        }
    }

    async fn upload_whole(&self, queue: &JobQueue) -> Result<()> {
        self.core.set_status(UploadStatus::Scheduled);

        let url = self.core.source();
        let total = self.file.size();
        let mut request_headers = self.headers.clone();
        request_headers.insert(CONTENT_TYPE, HeaderValue::from_str(self.file.mime_type())?);
        headers::insert_mtime(&mut request_headers, self.file.last_modified());

        // keep 10% back until the server acknowledged the upload
        let core = self.core.clone();
        let progress: ProgressFn = Arc::new(move |sent| {
            core.set_uploaded_bytes(sent.min(total).saturating_mul(9) / 10);
            core.emit_progress();
        });

        let retry_config = self.retry_config();
        queue
            .add(self.core.token(), || async {
                self.core.set_status(UploadStatus::Uploading);
                let body = self.file.read_all().await?;
                let request = DavRequest::put(url.as_str(), body)
                    .with_headers(&request_headers)
                    .with_progress(progress);

                retry_with_config(&retry_config, || self.transport.request(request.clone()))
                    .await
                    .map_err(UploadError::from_transport)
            })
            .await?;

        self.core.set_uploaded_bytes(total);
        self.core.emit_progress();
        if !self.core.set_status(UploadStatus::Finished) {
            return Err(UploadError::cancelled());
        }
        info!(upload_id = %self.core.id(), url = %url, bytes = total, "file uploaded");
        Ok(())
    }

    async fn upload_chunked(&self, queue: &JobQueue) -> Result<()> {
        self.core.set_status(UploadStatus::Scheduled);

        let chunk_root = self
            .chunk_root
            .as_deref()
            .ok_or_else(|| UploadError::Config("chunk upload root is not set".to_string()))?;
        let destination = self.core.source();
        let workspace = headers::join_url(chunk_root, &format!("web-file-upload-{}", random_token()))?;
        let destination_value = HeaderValue::from_str(&destination)?;
        let total_value = HeaderValue::from(self.file.size());

        // 创建临时工作区
        let mut workspace_headers = self.headers.clone();
        workspace_headers.insert(DESTINATION, destination_value.clone());
        queue
            .add(self.core.token(), || async {
                let request = DavRequest::mkcol(workspace.as_str()).with_headers(&workspace_headers);
                self.transport.request(request).await.map_err(UploadError::from_transport)
            })
            .await?;
        debug!(upload_id = %self.core.id(), workspace = %workspace, chunks = self.number_of_chunks(), "chunk workspace created");

        self.core.set_status(UploadStatus::Uploading);

        let mut chunk_headers = self.headers.clone();
        chunk_headers.insert(CONTENT_TYPE, HeaderValue::from_static(CHUNK_CONTENT_TYPE));
        chunk_headers.insert(DESTINATION, destination_value);
        chunk_headers.insert(TOTAL_LENGTH, total_value.clone());
        headers::insert_mtime(&mut chunk_headers, self.file.last_modified());

        let mut chunks: FuturesUnordered<_> = self
            .calculate_chunks()
            .into_iter()
            .map(|chunk| self.upload_chunk(queue, &workspace, &chunk_headers, chunk))
            .collect();

        let mut first_error = None;
        while let Some(result) = chunks.next().await {
            if let Err(err) = result {
                if first_error.is_none() {
                    // siblings are moot now
                    self.core.abort();
                    first_error = Some(err);
                }
            }
        }
        drop(chunks);
        if let Some(err) = first_error {
            return Err(err);
        }

        // 所有分片完成, 服务端合并
        self.core.set_status(UploadStatus::Assembling);

        let mut assemble_headers = self.headers.clone();
        assemble_headers.insert(TOTAL_LENGTH, total_value);
        headers::insert_mtime(&mut assemble_headers, self.file.last_modified());
        let assemble_url = headers::join_url(&workspace, ".file")?;

        queue
            .add(self.core.token(), || async {
                let request = DavRequest::move_to(assemble_url.as_str(), &destination)
                    .map_err(UploadError::from_transport)?
                    .with_headers(&assemble_headers);
                self.transport.request(request).await.map_err(UploadError::from_transport)
            })
            .await?;

        self.core.set_uploaded_bytes(self.file.size());
        self.core.emit_progress();
        // cancelled after the server already assembled the file
        if !self.core.set_status(UploadStatus::Finished) {
            return Err(UploadError::cancelled());
        }
        info!(
            upload_id = %self.core.id(),
            url = %destination,
            bytes = self.file.size(),
            chunks = self.number_of_chunks(),
            "chunked file uploaded"
        );
        Ok(())
    }

    async fn upload_chunk(
        &self,
        queue: &JobQueue,
        workspace: &str,
        chunk_headers: &HeaderMap,
        chunk: ChunkInfo,
    ) -> Result<()> {
        let url = headers::join_url(workspace, &(chunk.index + 1).to_string())?;

        // bytes of this chunk already counted, retries start again from 0
        let counted = Arc::new(AtomicU64::new(0));
        let core = self.core.clone();
        let progress: ProgressFn = Arc::new(move |sent| {
            let previous = counted.fetch_max(sent, Ordering::SeqCst);
            if sent > previous {
                core.add_uploaded_bytes(sent - previous);
                core.emit_progress();
            }
        });

        let retry_config = self.retry_config();
        queue
            .add(self.core.token(), || async {
                let body = self.file.read_range(chunk.offset, chunk.end).await?;
                let request = DavRequest::put(url.as_str(), body)
                    .with_headers(chunk_headers)
                    .with_progress(progress);

                retry_with_config(&retry_config, || self.transport.request(request.clone()))
                    .await
                    .map_err(UploadError::from_transport)
            })
            .await?;

        debug!(upload_id = %self.core.id(), chunk = chunk.index + 1, "chunk uploaded");
        Ok(())
    }
}

#[async_trait]
impl Upload for UploadFile {
    fn core(&self) -> &UploadCore {
        &self.core
    }

    async fn start(&self, queue: &JobQueue) -> Result<()> {
        self.core.begin()?;
        debug!(upload_id = %self.core.id(), url = %self.core.source(), chunked = self.is_chunked(), "upload started");

        let result = match self.run(queue).await {
            Ok(()) => Ok(()),
            Err(err) => self.core.settle(err),
        };
        self.core.emit_finished();
        result
    }
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("core", &self.core)
            .field("file", &self.file.name())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Random 16 hex characters scoping a chunk workspace.
fn random_token() -> String {
    format!("{:016x}", rand::random::<u64>())
}
