use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use crate::core::{Result, UploadError};

#[derive(Debug, Clone)]
enum FileContent {
    Memory(Bytes),
    Disk(PathBuf),
}

/// A file handle to upload, kept in memory or read lazily from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    /// Path relative to the selected directory, e.g. `photos/2024/a.jpg`.
    relative_path: Option<String>,
    mime_type: String,
    /// Milliseconds since the Unix epoch, may be <= 0 on some filesystems.
    last_modified: i64,
    size: u64,
    content: FileContent,
}

impl SourceFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();

        Self {
            mime_type: guess_mime_type(&name),
            name,
            relative_path: None,
            last_modified: Utc::now().timestamp_millis(),
            size: data.len() as u64,
            content: FileContent::Memory(data),
        }
    }

    /// Reads name, size and modification time of a file on disk.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::InvalidEntry(format!("{} is not a file", path.display())));
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::InvalidEntry(format!("{} has no file name", path.display())))?;
        let last_modified = metadata
            .modified()
            .map(|time| DateTime::<Utc>::from(time).timestamp_millis())
            .unwrap_or(0);

        Ok(Self {
            mime_type: guess_mime_type(&name),
            name,
            relative_path: None,
            last_modified,
            size: metadata.len(),
            content: FileContent::Disk(path.to_path_buf()),
        })
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: i64) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn read_all(&self) -> Result<Bytes> {
        match &self.content {
            FileContent::Memory(data) => Ok(data.clone()),
            FileContent::Disk(path) => Ok(Bytes::from(fs::read(path).await?)),
        }
    }

    /// Bytes in `start..end`, clamped to the file size.
    ///
    /// A range covering the whole file returns the original content.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let end = end.min(self.size);
        let start = start.min(end);
        if start == 0 && end == self.size {
            return self.read_all().await;
        }

        match &self.content {
            FileContent::Memory(data) => Ok(data.slice(start as usize..end as usize)),
            FileContent::Disk(path) => {
                let mut file = fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buffer = vec![0u8; (end - start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }
}

fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
