// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `image` and `wsi` kinds.
//!
//! Both share [`ImageConstraints`]; checks run in the order format, dimensions,
//! size. A whole-slide image read back from an archive may be a directory
//! (e.g. a tile pyramid), in which case its DTO carries no inline value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::file::{binary_from_storage, binary_to_storage, check_formats, check_size, decode_binary};
use super::formats;
use super::{Charset, StoredValue, TypeValidationError, ValueKind, ValueType};
use crate::storage::StorageData;

/// Constraints shared by raster and whole-slide images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConstraints {
    /// Size limit such as `"10MB"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<String>,
    /// Maximum width in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    /// Maximum height in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    /// Accepted format names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
}

impl ImageConstraints {
    fn check(&self, value: &Value, kind: ValueType) -> Result<(), TypeValidationError> {
        let bytes = decode_binary(value, kind)?;
        let format = check_formats(&self.formats, &bytes)?;

        if self.max_width.is_some() || self.max_height.is_some() {
            let (width, height) = format
                .or_else(|| formats::detect(&bytes))
                .and_then(|f| f.dimensions(&bytes))
                .ok_or(TypeValidationError::InvalidImageDimension)?;
            if let Some(max) = self.max_width
                && width > max
            {
                return Err(TypeValidationError::InvalidImageWidth);
            }
            if let Some(max) = self.max_height
                && height > max
            {
                return Err(TypeValidationError::InvalidImageHeight);
            }
        }

        check_size(self.max_file_size.as_deref(), bytes.len())
    }
}

/// Raster image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageType(pub ImageConstraints);

/// Whole-slide image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WsiType(pub ImageConstraints);

macro_rules! binary_kind {
    ($ty:ty, $tag:expr) => {
        impl ValueKind for $ty {
            fn value_type(&self) -> ValueType {
                $tag
            }

            fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
                self.0.check(value, $tag)
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
                binary_to_storage(name, value, $tag)
            }

            fn from_storage(
                &self,
                data: &StorageData,
                _charset: Charset,
            ) -> Result<Value, TypeValidationError> {
                Ok(binary_from_storage(data))
            }
        }
    };
}

binary_kind!(ImageType, ValueType::Image);
binary_kind!(WsiType, ValueType::Wsi);
