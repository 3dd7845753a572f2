mod directory;
mod file;

use std::path::PathBuf;

pub use directory::{DirEntry, Directory};
pub use file::SourceFile;

/// Input of a batch upload.
#[derive(Debug, Clone)]
pub enum UploadEntry {
    File(SourceFile),
    /// A file or a directory on disk, directories are walked recursively.
    Path(PathBuf),
}

impl From<SourceFile> for UploadEntry {
    fn from(file: SourceFile) -> Self {
        Self::File(file)
    }
}

impl From<PathBuf> for UploadEntry {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}
