use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use crate::core::{Result, UploadError};
use crate::dav::headers::join_path;
use super::file::SourceFile;
use super::UploadEntry;

#[derive(Debug, Clone)]
pub enum DirEntry {
    File(SourceFile),
    Directory(Directory),
}

impl DirEntry {
    pub fn size(&self) -> u64 {
        match self {
            Self::File(file) => file.size(),
            Self::Directory(dir) => dir.size(),
        }
    }

    pub fn last_modified(&self) -> i64 {
        match self {
            Self::File(file) => file.last_modified(),
            Self::Directory(dir) => dir.last_modified(),
        }
    }
}

/// Virtual folder assembled from the files of a batch upload.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    path: String,
    name: String,
    children: BTreeMap<String, DirEntry>,
}

impl Directory {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        Self {
            path,
            name,
            children: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> impl Iterator<Item = (&String, &DirEntry)> {
        self.children.iter()
    }

    pub fn get_child(&self, name: &str) -> Option<&DirEntry> {
        self.children.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.children.values().map(DirEntry::size).sum()
    }

    /// Latest modification time of the content, never negative.
    pub fn last_modified(&self) -> i64 {
        self.children
            .values()
            .map(DirEntry::last_modified)
            .max()
            .unwrap_or(0)
            .max(0)
    }

    pub fn file_count(&self) -> usize {
        self.children
            .values()
            .map(|entry| match entry {
                DirEntry::File(_) => 1,
                DirEntry::Directory(dir) => dir.file_count(),
            })
            .sum()
    }

    /// Nested directories, this one excluded.
    pub fn directory_count(&self) -> usize {
        self.children
            .values()
            .map(|entry| match entry {
                DirEntry::File(_) => 0,
                DirEntry::Directory(dir) => 1 + dir.directory_count(),
            })
            .sum()
    }

    /// Adds `file`, nested under the folders of its relative path.
    pub fn add_file(&mut self, file: SourceFile) -> Result<()> {
        let relative = file.relative_path().unwrap_or(file.name()).to_string();
        let mut components: Vec<&str> = relative.split('/').filter(|c| !c.is_empty()).collect();
        let name = match components.pop() {
            Some(name) => name.to_string(),
            None => file.name().to_string(),
        };

        let parent = self.ensure_directory(&components)?;
        if let Some(DirEntry::Directory(_)) = parent.children.get(&name) {
            return Err(UploadError::InvalidEntry(format!("{} is already a directory", relative)));
        }
        parent.children.insert(name, DirEntry::File(file));
        Ok(())
    }

    pub async fn add_entry(&mut self, entry: UploadEntry) -> Result<()> {
        match entry {
            UploadEntry::File(file) => self.add_file(file),
            UploadEntry::Path(path) => self.add_path(path).await,
        }
    }

    pub async fn add_entries(&mut self, entries: Vec<UploadEntry>) -> Result<()> {
        for entry in entries {
            self.add_entry(entry).await?;
        }
        Ok(())
    }

    /// Adds a file or walks a directory on disk, empty folders included.
    async fn add_path(&mut self, root: PathBuf) -> Result<()> {
        let metadata = fs::metadata(&root).await?;
        if metadata.is_file() {
            return self.add_file(SourceFile::open(&root).await?);
        }

        let root_name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::InvalidEntry(format!("{} has no name", root.display())))?;

        // 迭代遍历, 避免递归 async
        let mut stack = vec![(root, vec![root_name])];
        while let Some((dir, components)) = stack.pop() {
            let names: Vec<&str> = components.iter().map(String::as_str).collect();
            self.ensure_directory(&names)?;

            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let mut child = components.clone();
                child.push(name);

                if entry.file_type().await?.is_dir() {
                    stack.push((entry.path(), child));
                } else {
                    let file = SourceFile::open(entry.path()).await?.with_relative_path(child.join("/"));
                    self.add_file(file)?;
                }
            }
        }
        Ok(())
    }

    fn ensure_directory(&mut self, components: &[&str]) -> Result<&mut Directory> {
        let mut current = self;
        for component in components {
            let path = join_path(&current.path, component);
            let entry = current
                .children
                .entry(component.to_string())
                .or_insert_with(|| DirEntry::Directory(Directory::new(path)));

            current = match entry {
                DirEntry::Directory(dir) => dir,
                DirEntry::File(_) => {
                    return Err(UploadError::InvalidEntry(format!("{} is already a file", component)));
                }
            };
        }
        Ok(current)
    }
}
