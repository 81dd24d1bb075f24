use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use glob::{glob, Pattern};
use tracing::trace;

use super::ObjectStore;
use crate::error::StorageError;

/// Marks an object that is still being written.
const STAGING_PREFIX: &str = ".salesmr-staging-";

/// Objects as plain files under `<root>/<bucket>/`.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("illegal object key `{}`", key)));
        }
        Ok(self.bucket_dir().join(relative))
    }
}

fn key_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_of(key)?;
        trace!("bucket:      {}", self.bucket);
        trace!("object:      {}", key);
        match tokio::fs::read(&path).await {
            Ok(buf) => Ok(Bytes::from(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Readers never see a half-written object.
        let staging = path.with_file_name(format!("{}{}", STAGING_PREFIX, key_file_name(&path)));
        tokio::fs::write(&staging, &body).await?;
        tokio::fs::rename(&staging, &path).await?;
        trace!(key, bytes = body.len(), "stored object");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let bucket_dir = self.bucket_dir();
        let pattern = format!("{}/**/*", Pattern::escape(&bucket_dir.to_string_lossy()));
        let paths = glob(&pattern).map_err(|e| StorageError::Backend(e.to_string()))?;

        // glob drops a leading `./` from what it yields.
        let bucket_dir = without_cur_dir(&bucket_dir);
        let mut keys = Vec::new();
        for path in paths.flatten() {
            if !path.is_file() || key_file_name(&path).starts_with(STAGING_PREFIX) {
                continue;
            }
            let path = without_cur_dir(&path);
            let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
