use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::{debug, info};
use crate::config::UploadConfig;
use crate::core::{
    ConflictResolution,
    ConflictResolver,
    JobQueue,
    Result,
    Upload,
    UploadCore,
    UploadError,
    UploadEvent,
    UploadStatus,
};
use crate::dav::headers::{self, join_path, join_url};
use crate::dav::{DavRequest, Transport};
use crate::source::{DirEntry, Directory};
use super::file::{UploadFile, UploadFileOptions};

#[derive(Clone)]
pub struct TreeOptions {
    pub headers: HeaderMap,
    pub no_chunking: bool,
    pub config: UploadConfig,
    pub chunk_root: Option<String>,
    pub conflict_resolver: Option<Arc<dyn ConflictResolver>>,
    /// Remote path handed to the conflict resolver, `/` for the root.
    pub path: String,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            no_chunking: false,
            config: UploadConfig::default(),
            chunk_root: None,
            conflict_resolver: None,
            path: "/".to_string(),
        }
    }
}

#[derive(Clone)]
enum TreeChild {
    File(Arc<UploadFile>),
    Tree(Arc<UploadFileTree>),
}

impl TreeChild {
    fn upload(&self) -> &dyn Upload {
        match self {
            Self::File(file) => file.as_ref() as &dyn Upload,
            Self::Tree(tree) => tree.as_ref() as &dyn Upload,
        }
    }

    async fn start(&self, queue: &JobQueue) -> Result<()> {
        self.upload().start(queue).await
    }

    fn relocate(&self, source: String, path: String) -> Result<()> {
        match self {
            Self::File(file) => {
                file.core().relocate(source);
                Ok(())
            }
            Self::Tree(tree) => tree.relocate(source, path),
        }
    }
}

/// Uploads a directory: creates it remotely, then uploads every child concurrently.
pub struct UploadFileTree {
    core: Arc<UploadCore>,
    this: Weak<UploadFileTree>,
    directory: Directory,
    transport: Arc<dyn Transport>,
    options: TreeOptions,
    path: RwLock<String>,
    children: OnceLock<Vec<(String, TreeChild)>>,
    need_conflict_resolution: AtomicBool,
}

impl UploadFileTree {
    pub fn new(
        source: impl Into<String>,
        directory: Directory,
        transport: Arc<dyn Transport>,
        options: TreeOptions,
    ) -> Arc<Self> {
        let size = directory.size();
        Arc::new_cyclic(|this| Self {
            core: Arc::new(UploadCore::new(source, size)),
            this: this.clone(),
            directory,
            transport,
            path: RwLock::new(options.path.clone()),
            options,
            children: OnceLock::new(),
            need_conflict_resolution: AtomicBool::new(true),
        })
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    pub fn need_conflict_resolution(&self) -> bool {
        self.need_conflict_resolution.load(Ordering::SeqCst)
    }

    /// Builds the child uploads. Returns every descendant, depth first.
    pub fn initialize(&self) -> Result<Vec<Arc<dyn Upload>>> {
        if self.children.get().is_some() {
            return Err(UploadError::AlreadyInitialized(self.core.id()));
        }

        let source = self.core.source();
        let path = self.path();
        let mut uploads: Vec<Arc<dyn Upload>> = Vec::new();
        let mut children = Vec::new();

        for (name, entry) in self.directory.children() {
            let child_source = join_url(&source, name)?;
            let child = match entry {
                DirEntry::File(file) => {
                    let upload = Arc::new(UploadFile::new(
                        child_source,
                        file.clone(),
                        self.transport.clone(),
                        UploadFileOptions {
                            headers: self.options.headers.clone(),
                            no_chunking: self.options.no_chunking,
                            config: self.options.config.clone(),
                            chunk_root: self.options.chunk_root.clone(),
                            retries: None,
                        },
                    ));
                    uploads.push(upload.clone());
                    TreeChild::File(upload)
                }
                DirEntry::Directory(dir) => {
                    let tree = UploadFileTree::new(
                        child_source,
                        dir.clone(),
                        self.transport.clone(),
                        TreeOptions {
                            path: join_path(&path, name),
                            ..self.options.clone()
                        },
                    );
                    uploads.push(tree.clone());
                    uploads.extend(tree.initialize()?);
                    TreeChild::Tree(tree)
                }
            };

            let this = self.this.clone();
            child.upload().on_event(Arc::new(move |event: &UploadEvent| {
                if let UploadEvent::Progress { .. } = event {
                    if let Some(tree) = this.upgrade() {
                        tree.refresh_progress();
                    }
                }
            }));
            children.push((name.clone(), child));
        }

        self.children
            .set(children)
            .map_err(|_| UploadError::AlreadyInitialized(self.core.id()))?;
        Ok(uploads)
    }

    fn children(&self) -> &[(String, TreeChild)] {
        self.children.get().map(Vec::as_slice).unwrap_or_default()
    }

    fn refresh_progress(&self) {
        let uploaded = self
            .children()
            .iter()
            .map(|(_, child)| child.upload().uploaded_bytes())
            .sum();
        self.core.set_uploaded_bytes(uploaded);
        self.core.emit_progress();
    }

    fn set_need_conflict_resolution(&self, need: bool) {
        self.need_conflict_resolution.store(need, Ordering::SeqCst);
        for (_, child) in self.children() {
            if let TreeChild::Tree(tree) = child {
                tree.set_need_conflict_resolution(need);
            }
        }
    }

    /// Moves the directory, its descendants follow.
    fn relocate(&self, source: String, path: String) -> Result<()> {
        for (name, child) in self.children() {
            child.relocate(join_url(&source, name)?, join_path(&path, name))?;
        }
        self.core.relocate(source);
        *self.path.write() = path;
        Ok(())
    }

    fn cancel_children(&self) {
        for (_, child) in self.children() {
            child.upload().cancel();
        }
    }

    async fn run(&self, queue: &JobQueue, children: &[(String, TreeChild)]) -> Result<()> {
        self.core.set_status(UploadStatus::Scheduled);

        let source = self.core.source();
        let mut mkcol_headers = self.options.headers.clone();
        headers::insert_mtime(&mut mkcol_headers, self.directory.last_modified());

        let created = queue
            .add(self.core.token(), || async {
                let request = DavRequest::mkcol(source.as_str()).with_headers(&mkcol_headers);
                self.transport.request(request).await.map_err(UploadError::from_transport)
            })
            .await;
        self.core.set_status(UploadStatus::Uploading);

        match created {
            // 新建目录不可能有冲突
            Ok(_) => self.set_need_conflict_resolution(false),
            Err(err) if err.response().map(|r| r.status) == Some(StatusCode::METHOD_NOT_ALLOWED) => {
                debug!(upload_id = %self.core.id(), url = %source, "directory already exists");
                self.need_conflict_resolution.store(true, Ordering::SeqCst);
            }
            Err(err) => return Err(err),
        }

        if self.need_conflict_resolution() {
            if let Some(resolver) = &self.options.conflict_resolver {
                self.resolve_conflicts(resolver.as_ref(), &source, children).await?;
            }
        }

        let mut running: FuturesUnordered<_> = children
            .iter()
            .map(|(_, child)| child.start(queue))
            .collect();

        let mut first_error = None;
        while let Some(result) = running.next().await {
            if let Err(err) = result {
                if first_error.is_none() {
                    self.cancel_children();
                    first_error = Some(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        if !self.core.set_status(UploadStatus::Finished) {
            return Err(UploadError::cancelled());
        }
        info!(
            upload_id = %self.core.id(),
            url = %source,
            files = self.directory.file_count(),
            bytes = self.core.total_bytes(),
            "directory uploaded"
        );
        Ok(())
    }

    async fn resolve_conflicts(
        &self,
        resolver: &dyn ConflictResolver,
        source: &str,
        children: &[(String, TreeChild)],
    ) -> Result<()> {
        let names: Vec<String> = children.iter().map(|(name, _)| name.clone()).collect();
        let path = self.path();

        let resolution = self
            .core
            .guard(async { Ok(resolver.resolve(names, &path).await) })
            .await?;

        match resolution {
            ConflictResolution::Abort => {
                debug!(upload_id = %self.core.id(), path = %path, "conflict resolution aborted the upload");
                Err(UploadError::cancelled())
            }
            ConflictResolution::Rename(renames) => {
                for (name, child) in children {
                    if let Some(target) = renames.get(name).filter(|target| *target != name) {
                        debug!(upload_id = %self.core.id(), from = %name, to = %target, "renaming upload");
                        child.relocate(join_url(source, target)?, join_path(&path, target))?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Upload for UploadFileTree {
    fn core(&self) -> &UploadCore {
        &self.core
    }

    fn is_tree(&self) -> bool {
        true
    }

    /// Cancels the directory and every upload below it.
    fn cancel(&self) {
        self.core.cancel();
        self.cancel_children();
    }

    async fn start(&self, queue: &JobQueue) -> Result<()> {
        let children = self
            .children
            .get()
            .ok_or(UploadError::NotInitialized(self.core.id()))?;
        self.core.begin()?;
        debug!(upload_id = %self.core.id(), url = %self.core.source(), children = children.len(), "directory upload started");

        let result = match self.run(queue, children).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.cancel_children();
                self.core.settle(err)
            }
        };
        self.core.emit_finished();
        result
    }
}

impl std::fmt::Debug for UploadFileTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFileTree")
            .field("core", &self.core)
            .field("path", &self.path())
            .field("children", &self.children().len())
            .finish()
    }
}
