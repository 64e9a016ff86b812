// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filesystem-backed storage.
//!
//! Layout: `<base_path>/<bucket>/<entry name>`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Result, Storage, StorageData, StorageDataEntry, StorageError, check_name};

/// Storage backend writing buckets as directories under a base path.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    base_path: PathBuf,
}

impl FileSystemStorage {
    /// Create a storage rooted at `base_path`. The directory is created lazily.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Root directory of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf> {
        check_name(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let path = self.bucket_path(bucket)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(path)
    }
}

/// Walk `dir` and collect entries named relative to `root`.
async fn walk(root: &Path, dir: &Path, data: &mut StorageData) -> Result<()> {
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let relative = relative_name(root, &path)?;
            if entry.file_type().await?.is_dir() {
                data.add(StorageDataEntry::directory(relative));
                pending.push(path);
            } else {
                let bytes = tokio::fs::read(&path).await?;
                data.add(StorageDataEntry::file(relative, bytes));
            }
        }
    }

    Ok(())
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| StorageError::InvalidName(path.display().to_string()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

#[async_trait]
impl Storage for FileSystemStorage {
    fn storage_type(&self) -> &'static str {
        "filesystem"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket)?;
        tokio::fs::create_dir_all(&path).await?;
        debug!(bucket = %bucket, path = %path.display(), "Bucket created");
        Ok(())
    }

    async fn put(&self, bucket: &str, data: &StorageData) -> Result<()> {
        let root = self.ensure_bucket(bucket).await?;

        for entry in data.entries() {
            check_name(&entry.name)?;
            let path = root.join(entry.name.trim_end_matches('/'));
            if entry.is_dir() {
                tokio::fs::create_dir_all(&path).await?;
            } else {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &entry.data).await?;
            }
        }

        debug!(bucket = %bucket, entries = data.len(), "Storage data written");
        Ok(())
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<StorageData> {
        check_name(name)?;
        let root = self.ensure_bucket(bucket).await?;
        let trimmed = name.trim_end_matches('/');
        let path = root.join(trimmed);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            let mut data = StorageData::directory(trimmed);
            walk(&root, &path, &mut data).await?;
            data.sort_shallow_to_deep();
            Ok(data)
        } else {
            let bytes = tokio::fs::read(&path).await?;
            Ok(StorageData::file(trimmed, bytes))
        }
    }

    async fn list(&self, bucket: &str) -> Result<StorageData> {
        let root = self.ensure_bucket(bucket).await?;
        let mut data = StorageData::new();
        walk(&root, &root, &mut data).await?;
        data.sort_shallow_to_deep();
        Ok(data)
    }

    async fn exists(&self, bucket: &str) -> Result<bool> {
        let path = self.bucket_path(bucket)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
