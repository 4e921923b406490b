use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use super::{BlobStore, StoreError};

/// A [`BlobStore`] backed by a directory; object keys are relative paths.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never sees a partially written object.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    connected: bool,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            connected: false,
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty() && *s != "." && *s != "..") {
            path.push(segment);
        }
        path
    }

    fn write_atomic(&self, key: &str, write: impl FnOnce(&Path) -> std::io::Result<()>) -> Result<(), StoreError> {
        let target = self.object_path(key);
        let parent = target.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

        let staging = tempfile::NamedTempFile::new_in(&parent).map_err(|e| StoreError::io(&parent, e))?;
        write(staging.path()).map_err(|e| StoreError::io(staging.path(), e))?;
        staging
            .persist(&target)
            .map_err(|e| StoreError::io(&target, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn connect(&mut self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.root.is_dir()
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.object_path(key).is_file())
    }

    async fn read_json(&self, key: &str) -> Result<Value, StoreError> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(StoreError::MissingObject {
                key: key.to_string(),
            });
        }
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })
    }

    async fn write_json(&self, key: &str, data: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(data).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.write_atomic(key, |path| fs::write(path, &body))
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<(), StoreError> {
        if !local_path.is_file() {
            return Err(StoreError::io(
                local_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source file missing"),
            ));
        }
        self.write_atomic(key, |path| fs::copy(local_path, path).map(|_| ()))
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(StoreError::MissingObject {
                key: key.to_string(),
            });
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::copy(&path, local_path).map_err(|e| StoreError::io(local_path, e))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                StoreError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // Skip in-flight temp files from write_atomic.
            if key.rsplit('/').next().is_some_and(|name| name.starts_with(".tmp")) {
                continue;
            }
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = self.list_objects(prefix).await?;
        for key in &keys {
            let path = self.object_path(key);
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(keys.len())
    }
}
