// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container image registry boundary.
//!
//! Consulted only at task upload. [`FileSystemRegistry`] keeps image tars on
//! disk as `<base>/<repository>/<version>/image.tar`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Errors raised by a [`Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The qualified name is not `<repository>:<version>`.
    #[error("invalid image name '{0}'")]
    InvalidName(String),

    /// The registry rejected the image.
    #[error("image push rejected: {0}")]
    Rejected(String),

    /// I/O error while writing the image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Image registry a task's container image is pushed to.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Push an image tar under `qualified_name`; returns its digest.
    async fn push_image(&self, image: &[u8], qualified_name: &str) -> Result<String, RegistryError>;
}

/// Qualified image name for a task: dots in the namespace become path separators.
pub fn image_name(namespace: &str, version: &str) -> String {
    format!("{}:{}", namespace.replace('.', "/"), version)
}

fn split_name(qualified_name: &str) -> Result<(&str, &str), RegistryError> {
    let invalid = || RegistryError::InvalidName(qualified_name.to_string());
    let (repository, version) = qualified_name.rsplit_once(':').ok_or_else(invalid)?;
    let valid_path = !repository.is_empty()
        && !repository.starts_with('/')
        && repository
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if !valid_path || version.is_empty() || version.contains('/') || version == ".." {
        return Err(invalid());
    }
    Ok((repository, version))
}

/// Registry storing image tars on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSystemRegistry {
    base_path: PathBuf,
}

impl FileSystemRegistry {
    /// Create a registry rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Location of the image tar for a qualified name.
    pub fn image_path(&self, qualified_name: &str) -> Result<PathBuf, RegistryError> {
        let (repository, version) = split_name(qualified_name)?;
        Ok(self
            .base_path
            .join(repository)
            .join(version)
            .join("image.tar"))
    }
}

#[async_trait]
impl Registry for FileSystemRegistry {
    async fn push_image(&self, image: &[u8], qualified_name: &str) -> Result<String, RegistryError> {
        let path = self.image_path(qualified_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, image).await?;

        let mut hasher = Sha256::new();
        hasher.update(image);
        let digest = format!("sha256:{:x}", hasher.finalize());

        info!(image = %qualified_name, digest = %digest, size = image.len(), "Image pushed");
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name() {
        assert_eq!(image_name("com.example.sum", "1.0.0"), "com/example/sum:1.0.0");
    }

    #[test]
    fn test_rejects_bad_names() {
        let registry = FileSystemRegistry::new("/tmp/registry");
        assert!(registry.image_path("no-version").is_err());
        assert!(registry.image_path("../escape:1.0").is_err());
        assert!(registry.image_path("repo:").is_err());
        assert!(registry.image_path("com/example:1.0").is_ok());
    }

    #[tokio::test]
    async fn test_push_writes_image_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileSystemRegistry::new(dir.path());

        let digest = registry
            .push_image(b"layer", "com/example/sum:1.0.0")
            .await
            .unwrap();
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);

        let stored = tokio::fs::read(dir.path().join("com/example/sum/1.0.0/image.tar"))
            .await
            .unwrap();
        assert_eq!(stored, b"layer");
    }
}
