// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Zip archives to and from [`StorageData`].

use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::storage::{StorageData, StorageDataEntry};

/// Errors raised while reading or writing archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The data is not a zip archive.
    #[error("not a zip archive: {0}")]
    Invalid(String),

    /// An entry could not be read.
    #[error("failed to read archive entry {index}: {details}")]
    Read {
        /// Position of the entry in the archive.
        index: usize,
        /// Error details.
        details: String,
    },

    /// The archive could not be written.
    #[error("failed to write archive: {0}")]
    Write(String),
}

const LOCAL_HEADER: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const EMPTY_ARCHIVE: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

/// Whether `bytes` starts with a zip signature.
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(&LOCAL_HEADER) || bytes.starts_with(&EMPTY_ARCHIVE)
}

fn open(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, ArchiveError> {
    if !is_zip(bytes) {
        return Err(ArchiveError::Invalid("missing zip signature".to_string()));
    }
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArchiveError::Invalid(e.to_string()))
}

/// Initial buffer size for an entry. The declared size comes from the archive
/// itself, so it never exceeds the archive length.
fn capacity_hint(declared: u64, archive_len: usize) -> usize {
    usize::try_from(declared).map_or(archive_len, |size| size.min(archive_len))
}

/// All entries in archive order. Directory entries keep their trailing `/`.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<StorageDataEntry>, ArchiveError> {
    let mut archive = open(bytes)?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| ArchiveError::Read {
            index,
            details: e.to_string(),
        })?;

        if file.is_dir() {
            entries.push(StorageDataEntry::directory(file.name()));
            continue;
        }

        let name = file.name().to_string();
        let mut data = Vec::with_capacity(capacity_hint(file.size(), bytes.len()));
        file.read_to_end(&mut data)
            .map_err(|e| ArchiveError::Read {
                index,
                details: e.to_string(),
            })?;
        entries.push(StorageDataEntry::file(name, data));
    }

    Ok(entries)
}

/// Contents of one named file, or `None` when the archive has no such entry.
pub fn read_file(bytes: &[u8], name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let mut archive = open(bytes)?;
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ArchiveError::Invalid(e.to_string())),
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| ArchiveError::Invalid(e.to_string()))?;
    Ok(Some(data))
}

/// Zip every entry of `data`, in order.
pub fn write(data: &StorageData) -> Result<Vec<u8>, ArchiveError> {
    let mut buffer = Cursor::new(Vec::new());

    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in data.entries() {
            if entry.is_dir() {
                zip.add_directory(entry.name.as_str(), options)
                    .map_err(|e| ArchiveError::Write(format!("{}: {}", entry.name, e)))?;
                continue;
            }
            zip.start_file(entry.name.as_str(), options)
                .map_err(|e| ArchiveError::Write(format!("{}: {}", entry.name, e)))?;
            zip.write_all(&entry.data)
                .map_err(|e| ArchiveError::Write(format!("{}: {}", entry.name, e)))?;
        }

        zip.finish()
            .map_err(|e| ArchiveError::Write(e.to_string()))?;
    }

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_archive_order() {
        let mut data = StorageData::new();
        data.add(StorageDataEntry::file("sum", b"500".to_vec()));
        data.add(StorageDataEntry::directory("tiles"));
        data.add(StorageDataEntry::file("tiles/0.png", vec![1, 2, 3]));

        let bytes = write(&data).unwrap();
        assert!(is_zip(&bytes));

        let entries = read_entries(&bytes).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sum", "tiles/", "tiles/0.png"]);
        assert!(entries[1].is_dir());
        assert_eq!(entries[2].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_capacity_hint_bounded_by_archive() {
        assert_eq!(capacity_hint(3, 120), 3);
        assert_eq!(capacity_hint(u64::MAX, 120), 120);
        assert_eq!(capacity_hint(4 * 1024 * 1024 * 1024, 512), 512);
    }

    #[test]
    fn test_read_single_file() {
        let bytes = write(&StorageData::file("descriptor.yml", b"name: x".to_vec())).unwrap();
        assert_eq!(
            read_file(&bytes, "descriptor.yml").unwrap(),
            Some(b"name: x".to_vec())
        );
        assert_eq!(read_file(&bytes, "image.tar").unwrap(), None);
    }

    #[test]
    fn test_rejects_non_zip() {
        assert!(matches!(
            read_entries(b"plain text"),
            Err(ArchiveError::Invalid(_))
        ));
    }

    #[test]
    fn test_empty_archive() {
        let bytes = write(&StorageData::new()).unwrap();
        assert!(read_entries(&bytes).unwrap().is_empty());
    }
}
