//! Native file tier backed by a directory on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{FileStore, FileStoreError, check_relative_path};
use crate::logging::trace;

/// File tier rooted at a directory.
///
/// Writes go to a sibling `.tmp` file which is synced and then renamed over
/// the target, so a reader sees either the old or the new contents.
#[derive(Debug, Clone)]
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FileStoreError> {
        check_relative_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }
}

#[async_trait]
impl FileStore for DirFileStore {
    async fn read_file(&self, path: &str) -> Result<String, FileStoreError> {
        let full = self.resolve(path)?;
        fs::read_to_string(&full)
            .await
            .map_err(|e| FileStoreError::io(path, e))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FileStoreError::io(path, e))?;
        }

        let mut tmp = full.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| FileStoreError::io(path, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| FileStoreError::io(path, e))?;
        file.sync_all()
            .await
            .map_err(|e| FileStoreError::io(path, e))?;
        drop(file);

        fs::rename(&tmp, &full)
            .await
            .map_err(|e| FileStoreError::io(path, e))?;
        trace!(path = path, bytes = contents.len(), "native file written");
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileStoreError::io(path, e)),
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path)?;
        match fs::remove_dir_all(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileStoreError::io(path, e)),
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, FileStoreError> {
        let full = self.resolve(path)?;
        let mut entries = match fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FileStoreError::io(path, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileStoreError::io(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
