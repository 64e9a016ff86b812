// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `string` kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StoredValue, TypeValidationError, ValueKind, ValueType};

/// Free text bounded by length in characters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringType {
    /// Minimum length (inclusive).
    #[serde(default)]
    pub min_length: usize,
    /// Maximum length (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl ValueKind for StringType {
    fn value_type(&self) -> ValueType {
        ValueType::String
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        let text = value
            .as_str()
            .ok_or(TypeValidationError::TypeMismatch(ValueType::String))?;
        let length = text.chars().count();

        if length < self.min_length {
            return Err(TypeValidationError::MinLength);
        }
        if let Some(max) = self.max_length
            && length > max
        {
            return Err(TypeValidationError::MaxLength);
        }
        Ok(())
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        value
            .as_str()
            .map(|s| StoredValue::String(s.to_string()))
            .ok_or(TypeValidationError::TypeMismatch(ValueType::String))
    }

    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        Ok(Value::String(text.to_string()))
    }
}
