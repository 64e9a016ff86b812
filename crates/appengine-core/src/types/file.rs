// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `file` kind, plus the helpers shared by every binary kind.
//!
//! Binary values travel as base64 strings at the API boundary and as raw bytes
//! in storage. The typed-value row keeps no value for them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::formats::{self, FileFormat};
use super::size::parse_byte_size;
use super::{Charset, StoredValue, TypeValidationError, ValueKind, ValueType};
use crate::storage::StorageData;

/// Decode a base64 provision value.
pub(crate) fn decode_binary(value: &Value, kind: ValueType) -> Result<Vec<u8>, TypeValidationError> {
    let encoded = value
        .as_str()
        .ok_or(TypeValidationError::TypeMismatch(kind))?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|_| TypeValidationError::InvalidEncoding)
}

/// Enforce a `max_file_size` constraint.
pub(crate) fn check_size(max_file_size: Option<&str>, len: usize) -> Result<(), TypeValidationError> {
    let Some(limit) = max_file_size else {
        return Ok(());
    };
    let bytes = parse_byte_size(limit)
        .ok_or_else(|| TypeValidationError::InvalidFileSizeFormat(limit.to_string()))?;
    if len as u64 > bytes {
        return Err(TypeValidationError::InvalidFileSize);
    }
    Ok(())
}

/// Match the payload against the declared formats.
///
/// With no declared formats any payload is accepted and the detected format,
/// if any, is returned.
pub(crate) fn check_formats(
    declared: &[String],
    bytes: &[u8],
) -> Result<Option<FileFormat>, TypeValidationError> {
    if declared.is_empty() {
        return Ok(formats::detect(bytes));
    }
    declared
        .iter()
        .filter_map(|name| FileFormat::from_name(name))
        .find(|format| format.check_signature(bytes))
        .map(Some)
        .ok_or(TypeValidationError::InvalidFileFormat)
}

/// Raw bytes of a base64 value as a single storage file.
pub(crate) fn binary_to_storage(
    name: &str,
    value: &Value,
    kind: ValueType,
) -> Result<StorageData, TypeValidationError> {
    Ok(StorageData::file(name, decode_binary(value, kind)?))
}

/// Base64 of a single stored file; directory trees have no inline value.
pub(crate) fn binary_from_storage(data: &StorageData) -> Value {
    match data.peek() {
        Some(entry) if !entry.is_dir() => Value::String(STANDARD.encode(data.file_bytes())),
        _ => Value::Null,
    }
}

/// Arbitrary file, optionally restricted by size and signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileType {
    /// Size limit such as `"10MB"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<String>,
    /// Accepted format names (`png`, `jpeg`, `tiff`, `dicom`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
}

impl ValueKind for FileType {
    fn value_type(&self) -> ValueType {
        ValueType::File
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        let bytes = decode_binary(value, ValueType::File)?;
        check_formats(&self.formats, &bytes)?;
        check_size(self.max_file_size.as_deref(), bytes.len())
    }

    fn stored_value(&self, _value: &Value) -> Result<StoredValue, TypeValidationError> {
        Ok(StoredValue::None)
    }

    fn to_storage(
        &self,
        name: &str,
        value: &Value,
        _charset: Charset,
    ) -> Result<StorageData, TypeValidationError> {
        binary_to_storage(name, value, ValueType::File)
    }

    fn from_storage(
        &self,
        data: &StorageData,
        _charset: Charset,
    ) -> Result<Value, TypeValidationError> {
        Ok(binary_from_storage(data))
    }
}
