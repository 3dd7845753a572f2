mod global;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use reqwest::header::HeaderMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use crate::config::{Config, UploadConfig};
use crate::core::{
    ConflictResolver,
    Folder,
    JobQueue,
    NodeType,
    Result,
    Upload,
    UploadError,
    UploadEvent,
    UploaderEvent,
    UploaderStatus,
};
use crate::dav::headers::{join_path, join_url, to_header_map};
use crate::dav::{DavClient, Transport};
use crate::source::{Directory, SourceFile, UploadEntry};
use crate::uploaders::{TreeOptions, UploadFile, UploadFileOptions, UploadFileTree};
use crate::utils::eta::{Eta, EtaEvent, EtaOptions, EtaSnapshot, EtaStatus};
use self::worker::UploaderWorker;

pub use global::{get_uploader, reset_uploader, set_uploader};

pub struct UploaderOptions {
    pub transport: Arc<dyn Transport>,
    pub destination: Folder,
    /// Root of the temporary chunk workspaces, chunking is off without it.
    pub chunk_root: Option<String>,
    pub config: UploadConfig,
    /// Uploading through a public share link.
    pub is_public: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Base URL replacing the destination folder's source.
    pub root: Option<String>,
    pub retries: Option<u32>,
    /// Cancels the upload when fired.
    pub signal: Option<CancellationToken>,
    pub no_chunking: bool,
}

#[derive(Clone, Default)]
pub struct BatchOptions {
    pub conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    pub signal: Option<CancellationToken>,
    pub root: Option<String>,
}

pub(crate) struct UploaderInner {
    transport: Arc<dyn Transport>,
    destination: RwLock<Folder>,
    chunk_root: Option<String>,
    config: RwLock<UploadConfig>,
    /// Forces public-share rules on every config.
    is_public: bool,
    queue: JobQueue,
    uploads: Mutex<Vec<Arc<dyn Upload>>>,
    custom_headers: RwLock<HashMap<String, String>>,
    status: RwLock<UploaderStatus>,
    eta: Mutex<Eta>,
    event_tx: broadcast::Sender<UploaderEvent>,
    upload_event_tx: mpsc::UnboundedSender<UploadEvent>,
}

impl UploaderInner {
    /// Bytes over leaf uploads, trees only repeat their children.
    fn aggregate(&self) -> (u64, u64) {
        self.uploads
            .lock()
            .iter()
            .filter(|upload| !upload.is_tree())
            .fold((0, 0), |(uploaded, total), upload| {
                (uploaded + upload.uploaded_bytes(), total + upload.total_bytes())
            })
    }

    fn all_settled(&self) -> bool {
        let uploads = self.uploads.lock();
        !uploads.is_empty() && uploads.iter().all(|upload| upload.status().is_terminal())
    }

    fn on_progress(&self) {
        let (uploaded_bytes, total_bytes) = self.aggregate();
        let eta = {
            let mut eta = self.eta.lock();
            eta.update(uploaded_bytes, Some(total_bytes));
            eta.snapshot()
        };
        let _ = self.event_tx.send(UploaderEvent::Progress { uploaded_bytes, total_bytes, eta });
    }

    fn track(&self, upload: Arc<dyn Upload>) {
        let tx = self.upload_event_tx.clone();
        upload.on_event(Arc::new(move |event: &UploadEvent| {
            if matches!(event, UploadEvent::Progress { .. } | UploadEvent::Finished { .. }) {
                let _ = tx.send(event.clone());
            }
        }));
        self.uploads.lock().push(upload);

        let mut status = self.status.write();
        if *status != UploaderStatus::Paused {
            *status = UploaderStatus::Uploading;
            let mut eta = self.eta.lock();
            if eta.status() != EtaStatus::Running {
                eta.resume();
            }
        }
    }

    fn reset(&self) {
        let uploads: Vec<_> = self.uploads.lock().drain(..).collect();
        for upload in &uploads {
            upload.cancel();
        }
        self.queue.clear();
        self.queue.start();
        self.eta.lock().reset();
        *self.status.write() = UploaderStatus::Idle;
        debug!(uploads = uploads.len(), "uploader reset");
    }
}

/// Upload façade: one shared job queue for every upload it starts.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

impl Uploader {
    /// Must be called inside a tokio runtime.
    pub fn new(options: UploaderOptions) -> Result<Self> {
        validate_destination(&options.destination)?;

        let config = options.config;
        let (event_tx, _) = broadcast::channel(1024);
        let (upload_event_tx, upload_event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(UploaderInner {
            transport: options.transport,
            destination: RwLock::new(options.destination),
            chunk_root: options.chunk_root,
            queue: JobQueue::new(config.max_parallel_count),
            config: RwLock::new(config),
            is_public: options.is_public,
            uploads: Mutex::new(Vec::new()),
            custom_headers: RwLock::new(HashMap::new()),
            status: RwLock::new(UploaderStatus::Idle),
            eta: Mutex::new(Eta::new(EtaOptions { start: false, ..Default::default() })),
            event_tx,
            upload_event_tx,
        });

        let worker = UploaderWorker::new(Arc::downgrade(&inner), upload_event_rx);
        tokio::spawn(worker.run());

        Ok(Self { inner })
    }

    /// Uploader writing to the user's files with a reqwest transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = DavClient::from_config(config).map_err(|err| UploadError::Config(err.to_string()))?;
        Self::new(UploaderOptions {
            transport: Arc::new(client),
            destination: Folder::new(config.endpoint.clone()),
            chunk_root: Some(config.uploads_endpoint.clone()),
            config: config.upload.clone(),
            is_public: config.upload.is_public_share,
        })
    }

    pub fn destination(&self) -> Folder {
        self.inner.destination.read().clone()
    }

    pub fn set_destination(&self, folder: Folder) -> Result<()> {
        validate_destination(&folder)?;
        *self.inner.destination.write() = folder;
        Ok(())
    }

    /// URL every relative destination is resolved against.
    pub fn root(&self) -> String {
        self.inner.destination.read().source.clone()
    }

    pub fn status(&self) -> UploaderStatus {
        *self.inner.status.read()
    }

    /// Uploads tracked since the last reset.
    pub fn uploads(&self) -> Vec<Arc<dyn Upload>> {
        self.inner.uploads.lock().clone()
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    /// Config new uploads are created with.
    pub fn config(&self) -> UploadConfig {
        let mut config = self.inner.config.read().clone();
        if self.inner.is_public {
            config.is_public_share = true;
        }
        config
    }

    pub fn is_public(&self) -> bool {
        self.inner.is_public
    }

    /// Applies to uploads created afterwards.
    pub fn set_config(&self, config: UploadConfig) {
        *self.inner.config.write() = config;
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.inner.config.read().max_chunk_size
    }

    pub fn custom_headers(&self) -> HashMap<String, String> {
        self.inner.custom_headers.read().clone()
    }

    pub fn set_custom_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.custom_headers.write().insert(name.into(), value.into());
    }

    pub fn delete_custom_header(&self, name: &str) {
        self.inner.custom_headers.write().remove(name);
    }

    pub fn set_custom_headers(&self, headers: HashMap<String, String>) {
        *self.inner.custom_headers.write() = headers;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploaderEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn eta(&self) -> EtaSnapshot {
        self.inner.eta.lock().snapshot()
    }

    pub fn subscribe_eta(&self) -> broadcast::Receiver<EtaEvent> {
        self.inner.eta.lock().subscribe()
    }

    fn header_map(&self) -> Result<HeaderMap> {
        to_header_map(self.inner.custom_headers.read().iter())
    }

    fn base_url(&self, root: Option<String>) -> String {
        root.unwrap_or_else(|| self.root())
    }

    /// Uploads one file to `destination`, relative to the destination folder.
    ///
    /// The returned upload is already running.
    pub fn upload(&self, destination: &str, file: SourceFile, options: UploadOptions) -> Result<Arc<UploadFile>> {
        let url = join_url(&self.base_url(options.root), destination)?;
        let upload = Arc::new(UploadFile::new(
            url,
            file,
            self.inner.transport.clone(),
            UploadFileOptions {
                headers: self.header_map()?,
                no_chunking: options.no_chunking,
                config: self.config(),
                chunk_root: self.inner.chunk_root.clone(),
                retries: options.retries,
            },
        ));
        info!(upload_id = %upload.id(), url = %upload.source(), size = upload.total_bytes(), "upload queued");

        if let Some(signal) = options.signal {
            link_signal(upload.clone(), signal);
        }
        self.inner.track(upload.clone());
        self.spawn_start(upload.clone());
        Ok(upload)
    }

    /// Uploads files and folders below `destination`.
    ///
    /// Returns the root directory upload followed by every descendant upload.
    pub async fn batch_upload(
        &self,
        destination: &str,
        entries: Vec<UploadEntry>,
        options: BatchOptions,
    ) -> Result<Vec<Arc<dyn Upload>>> {
        let path = join_path("", destination);
        let mut directory = Directory::new(path.clone());
        directory.add_entries(entries).await?;

        let url = join_url(&self.base_url(options.root), destination)?;
        let root = UploadFileTree::new(
            url,
            directory,
            self.inner.transport.clone(),
            TreeOptions {
                headers: self.header_map()?,
                no_chunking: false,
                config: self.config(),
                chunk_root: self.inner.chunk_root.clone(),
                conflict_resolver: options.conflict_resolver,
                path,
            },
        );

        let mut uploads: Vec<Arc<dyn Upload>> = vec![root.clone()];
        uploads.extend(root.initialize()?);
        info!(upload_id = %root.id(), url = %root.source(), uploads = uploads.len(), "batch upload queued");

        for upload in &uploads {
            self.inner.track(upload.clone());
        }
        if let Some(signal) = options.signal {
            link_signal(root.clone(), signal);
        }
        self.spawn_start(root);
        Ok(uploads)
    }

    fn spawn_start(&self, upload: Arc<dyn Upload>) {
        let queue = self.inner.queue.clone();
        tokio::spawn(async move {
            if let Err(err) = upload.start(&queue).await {
                if err.is_cancelled() {
                    debug!(upload_id = %upload.id(), "upload cancelled");
                } else {
                    warn!(upload_id = %upload.id(), error = %err, "upload failed");
                }
            }
        });
    }

    /// Stops starting new requests and resolves once the running ones completed.
    pub async fn pause(&self) {
        self.inner.queue.pause();
        self.inner.queue.on_pending_zero().await;

        *self.inner.status.write() = UploaderStatus::Paused;
        self.inner.eta.lock().pause();
        let _ = self.inner.event_tx.send(UploaderEvent::Paused);
        info!("uploader paused");
    }

    /// Resumes a paused uploader.
    pub fn start(&self) {
        self.inner.queue.start();

        *self.inner.status.write() = UploaderStatus::Uploading;
        self.inner.eta.lock().resume();
        let _ = self.inner.event_tx.send(UploaderEvent::Resumed);
        info!("uploader resumed");
    }

    /// Cancels every tracked upload and forgets them.
    pub fn reset(&self) {
        self.inner.reset();
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("destination", &self.root())
            .field("status", &self.status())
            .field("uploads", &self.inner.uploads.lock().len())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

fn validate_destination(folder: &Folder) -> Result<()> {
    if folder.node_type != NodeType::Folder {
        return Err(UploadError::InvalidDestination(format!("{} is not a folder", folder.source)));
    }
    let url = Url::parse(&folder.source)
        .map_err(|err| UploadError::InvalidDestination(format!("{}: {}", folder.source, err)))?;
    if url.cannot_be_a_base() {
        return Err(UploadError::InvalidDestination(folder.source.clone()));
    }
    Ok(())
}

/// Cancels `upload` when `signal` fires before it settled.
fn link_signal(upload: Arc<dyn Upload>, signal: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = signal.cancelled() => upload.cancel(),
            _ = upload.wait() => {}
        }
    });
}
