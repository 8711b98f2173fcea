//! Filesystem storage rooted at the configured matter directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{FolderId, StorageProvider};
use crate::error::ProviderError;
use crate::legal::policy::is_safe_path_segment;

const PROVIDER: &str = "local-storage";

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn segment(name: &str) -> Result<&str, ProviderError> {
        let trimmed = name.trim();
        if is_safe_path_segment(trimmed) {
            Ok(trimmed)
        } else {
            Err(ProviderError::invalid(
                PROVIDER,
                format!("unsafe path segment '{name}'"),
            ))
        }
    }

    /// Folder ids are paths relative to the root, joined with `/`.
    fn resolve(&self, folder: &FolderId) -> Result<PathBuf, ProviderError> {
        let mut path = self.root.clone();
        for part in folder.0.split('/') {
            path.push(Self::segment(part)?);
        }
        Ok(path)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn find_folder(&self, matter_name: &str) -> Result<Option<FolderId>, ProviderError> {
        let name = Self::segment(matter_name)?;
        match tokio::fs::metadata(self.root.join(name)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FolderId(name.to_string()))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProviderError::unavailable(PROVIDER, e)),
        }
    }

    async fn ensure_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ProviderError> {
        let child = FolderId(format!("{}/{}", parent.0, Self::segment(name)?));
        tokio::fs::create_dir_all(self.resolve(&child)?)
            .await
            .map_err(|e| ProviderError::unavailable(PROVIDER, e))?;
        Ok(child)
    }

    async fn upload(
        &self,
        folder: &FolderId,
        filename: &str,
        bytes: Bytes,
    ) -> Result<String, ProviderError> {
        let name = Self::segment(filename)?;
        let path = self.resolve(folder)?.join(name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ProviderError::unavailable(PROVIDER, e))?;
        Ok(format!("{}/{}", folder.0, name))
    }
}
