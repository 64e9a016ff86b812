// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory storage for tests and embedded use.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{Result, Storage, StorageData, StorageDataEntry, StorageError, check_name};

type Bucket = BTreeMap<String, StorageDataEntry>;

/// In-memory storage backend.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage whose `put` always fails.
    pub fn failing_writes() -> Self {
        let storage = Self::new();
        storage.set_fail_writes(true);
        storage
    }

    /// Toggle write failures at runtime.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Names of every bucket currently present.
    pub async fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.buckets.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        check_name(bucket)?;
        self.buckets
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put(&self, bucket: &str, data: &StorageData) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(format!(
                "writes disabled for bucket '{}'",
                bucket
            )));
        }

        let mut buckets = self.buckets.lock().await;
        let entries = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        for entry in data.entries() {
            check_name(&entry.name)?;
            entries.insert(entry.name.clone(), entry.clone());
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<StorageData> {
        let buckets = self.buckets.lock().await;
        let entries = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let trimmed = name.trim_end_matches('/');
        if !name.ends_with('/')
            && let Some(file) = entries.get(trimmed)
        {
            return Ok(StorageData::file(file.name.clone(), file.data.clone()));
        }

        let prefix = format!("{}/", trimmed);
        let mut data = StorageData::directory(prefix.clone());
        for (key, entry) in entries.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if *key != prefix {
                data.add(entry.clone());
            }
        }

        if data.len() == 1 && !entries.contains_key(&prefix) {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }

        data.sort_shallow_to_deep();
        Ok(data)
    }

    async fn list(&self, bucket: &str) -> Result<StorageData> {
        let buckets = self.buckets.lock().await;
        let entries = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let mut data = StorageData::new();
        for entry in entries.values() {
            data.add(entry.clone());
        }
        data.sort_shallow_to_deep();
        Ok(data)
    }

    async fn exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.lock().await.contains_key(bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets.lock().await.remove(bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_file() {
        let storage = MemoryStorage::new();
        storage.create_bucket("b").await.unwrap();
        storage
            .put("b", &StorageData::file("a", b"250".to_vec()))
            .await
            .unwrap();

        let data = storage.get("b", "a").await.unwrap();
        assert_eq!(data.file_bytes(), b"250");
    }

    #[tokio::test]
    async fn test_get_directory_returns_subtree() {
        let storage = MemoryStorage::new();
        storage.create_bucket("b").await.unwrap();

        let mut tree = StorageData::directory("dir");
        tree.add(StorageDataEntry::file("dir/1", b"x".to_vec()));
        tree.add(StorageDataEntry::directory("dir/sub"));
        tree.add(StorageDataEntry::file("dir/sub/2", b"y".to_vec()));
        storage.put("b", &tree).await.unwrap();
        storage
            .put("b", &StorageData::file("dirx", b"z".to_vec()))
            .await
            .unwrap();

        let data = storage.get("b", "dir").await.unwrap();
        let names: Vec<_> = data.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["dir/", "dir/1", "dir/sub/", "dir/sub/2"]);
    }

    #[tokio::test]
    async fn test_missing_bucket_and_entry() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get("nope", "a").await,
            Err(StorageError::BucketNotFound(_))
        ));

        storage.create_bucket("b").await.unwrap();
        assert!(matches!(
            storage.get("b", "a").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let storage = MemoryStorage::failing_writes();
        storage.create_bucket("b").await.unwrap();
        let result = storage.put("b", &StorageData::file("a", vec![])).await;
        assert!(matches!(result, Err(StorageError::WriteFailed(_))));

        storage.set_fail_writes(false);
        assert!(storage.put("b", &StorageData::file("a", vec![])).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_bucket() {
        let storage = MemoryStorage::new();
        storage.create_bucket("b").await.unwrap();
        assert!(storage.exists("b").await.unwrap());
        storage.delete_bucket("b").await.unwrap();
        assert!(!storage.exists("b").await.unwrap());
    }
}
