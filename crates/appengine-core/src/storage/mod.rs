// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage facade for run inputs, run outputs and task definitions.
//!
//! Values move to and from storage as [`StorageData`]: a flat list of file and
//! directory entries whose names encode the tree (`dir/`, `dir/file`). Buckets
//! are per run and per direction:
//!
//! | Bucket | Content |
//! |--------|---------|
//! | `task-run-inputs-<run_id>` | provisioned input values |
//! | `task-run-outputs-<run_id>` | reconciled output values |
//! | `task-<task_id>-def` | uploaded `descriptor.yml` |

pub mod filesystem;
pub mod memory;

pub use self::filesystem::FileSystemStorage;
pub use self::memory::MemoryStorage;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors from storage operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Bucket does not exist.
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// No entry with the given name exists in the bucket.
    #[error("Entry '{name}' not found in bucket '{bucket}'")]
    NotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Entry name.
        name: String,
    },

    /// Entry or bucket name escapes the storage root or is empty.
    #[error("Invalid storage name: {0}")]
    InvalidName(String),

    /// Backend refused the write.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Bucket holding the provisioned inputs of a run.
pub fn inputs_bucket(run_id: &Uuid) -> String {
    format!("task-run-inputs-{}", run_id)
}

/// Bucket holding the reconciled outputs of a run.
pub fn outputs_bucket(run_id: &Uuid) -> String {
    format!("task-run-outputs-{}", run_id)
}

/// Bucket holding a task's descriptor.
pub fn task_bucket(task_id: &Uuid) -> String {
    format!("task-{}-def", task_id)
}

/// Kind of a storage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with a payload.
    File,
    /// Directory marker; its name ends with `/`.
    Directory,
}

/// One file or directory inside a [`StorageData`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDataEntry {
    /// Path of the entry; directories end with `/`.
    pub name: String,
    /// File or directory.
    pub kind: EntryKind,
    /// File payload (empty for directories).
    pub data: Vec<u8>,
}

impl StorageDataEntry {
    /// Create a file entry.
    pub fn file(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            data,
        }
    }

    /// Create a directory entry. A trailing `/` is added when missing.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            kind: EntryKind::Directory,
            data: Vec::new(),
        }
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Number of path components; `a/b/` and `a/b` are both depth 2.
    pub fn depth(&self) -> usize {
        self.name
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .count()
    }

    /// Last path component without the trailing separator.
    pub fn file_name(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// In-memory tree of storage entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageData {
    entries: Vec<StorageDataEntry>,
}

impl StorageData {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree holding one file.
    pub fn file(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            entries: vec![StorageDataEntry::file(name, data)],
        }
    }

    /// A tree holding one (empty) directory.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            entries: vec![StorageDataEntry::directory(name)],
        }
    }

    /// Append an entry.
    pub fn add(&mut self, entry: StorageDataEntry) {
        self.entries.push(entry);
    }

    /// First entry, which names the tree.
    pub fn peek(&self) -> Option<&StorageDataEntry> {
        self.entries.first()
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All entries in their current order.
    pub fn entries(&self) -> &[StorageDataEntry] {
        &self.entries
    }

    /// Consume the tree into its entries.
    pub fn into_entries(self) -> Vec<StorageDataEntry> {
        self.entries
    }

    /// Append all of `other`'s entries after this tree's entries.
    pub fn merge(&mut self, other: StorageData) {
        self.entries.extend(other.entries);
    }

    /// Order entries parents-first.
    pub fn sort_shallow_to_deep(&mut self) {
        self.entries
            .sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.name.cmp(&b.name)));
    }

    /// Order entries children-first.
    pub fn sort_deep_to_shallow(&mut self) {
        self.entries
            .sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.name.cmp(&b.name)));
    }

    /// Concatenated payload of every file entry, in order.
    pub fn file_bytes(&self) -> Vec<u8> {
        self.entries
            .iter()
            .filter(|e| !e.is_dir())
            .flat_map(|e| e.data.iter().copied())
            .collect()
    }

    /// Prefix every entry name with `prefix/`.
    pub fn prefixed(self, prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|mut e| {
                    e.name = format!("{}/{}", prefix, e.name);
                    e
                })
                .collect(),
        }
    }
}

/// Reject names that are empty, absolute or traverse upwards.
pub(crate) fn check_name(name: &str) -> Result<()> {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty()
        || trimmed.starts_with('/')
        || trimmed.split('/').any(|part| part == ".." || part == ".")
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Blob store with per-run buckets.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend identifier for logging.
    fn storage_type(&self) -> &'static str;

    /// Create a bucket. Creating an existing bucket is not an error.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Write every entry of `data` into the bucket, overwriting existing files.
    async fn put(&self, bucket: &str, data: &StorageData) -> Result<()>;

    /// Read one entry. A directory name returns the directory and its subtree.
    async fn get(&self, bucket: &str, name: &str) -> Result<StorageData>;

    /// Read every entry of the bucket.
    async fn list(&self, bucket: &str) -> Result<StorageData>;

    /// Whether the bucket exists.
    async fn exists(&self, bucket: &str) -> Result<bool>;

    /// Delete the bucket and everything in it.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names() {
        let id = Uuid::nil();
        assert_eq!(
            inputs_bucket(&id),
            "task-run-inputs-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            outputs_bucket(&id),
            "task-run-outputs-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            task_bucket(&id),
            "task-00000000-0000-0000-0000-000000000000-def"
        );
    }

    #[test]
    fn test_directory_entry_gets_trailing_slash() {
        let entry = StorageDataEntry::directory("pyramid");
        assert_eq!(entry.name, "pyramid/");
        assert!(entry.is_dir());
        assert_eq!(entry.depth(), 1);
        assert_eq!(entry.file_name(), "pyramid");
    }

    #[test]
    fn test_merge_appends_entries() {
        let mut root = StorageData::directory("out");
        let mut child = StorageData::directory("out/0");
        child.add(StorageDataEntry::file("out/0/tile.png", vec![1, 2]));

        root.merge(child);

        assert_eq!(root.len(), 3);
        assert_eq!(root.peek().unwrap().name, "out/");
        assert_eq!(root.entries()[2].name, "out/0/tile.png");
    }

    #[test]
    fn test_sort_orders() {
        let mut data = StorageData::new();
        data.add(StorageDataEntry::file("a/b/c", vec![]));
        data.add(StorageDataEntry::directory("a"));
        data.add(StorageDataEntry::directory("a/b"));

        data.sort_shallow_to_deep();
        let names: Vec<_> = data.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a/", "a/b/", "a/b/c"]);

        data.sort_deep_to_shallow();
        let names: Vec<_> = data.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a/b/c", "a/b/", "a/"]);
    }

    #[test]
    fn test_prefixed() {
        let data = StorageData::file("value", b"1".to_vec()).prefixed("inputs/");
        assert_eq!(data.peek().unwrap().name, "inputs/value");
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("a").is_ok());
        assert!(check_name("a/b/").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("/etc/passwd").is_err());
        assert!(check_name("a/../../b").is_err());
    }
}
