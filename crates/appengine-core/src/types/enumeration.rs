// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `enumeration` kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StoredValue, TypeValidationError, ValueKind, ValueType};

/// Longest accepted enumeration value, in characters.
pub const MAX_VALUE_LENGTH: usize = 256;

/// One of a fixed list of single-line strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumerationType {
    /// Accepted values.
    #[serde(default)]
    pub values: Vec<String>,
}

impl ValueKind for EnumerationType {
    fn value_type(&self) -> ValueType {
        ValueType::Enumeration
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        let text = value
            .as_str()
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Enumeration))?;

        if text.contains('\n')
            || text.chars().count() > MAX_VALUE_LENGTH
            || !self.values.iter().any(|v| v == text)
        {
            return Err(TypeValidationError::NotInEnumeration);
        }
        Ok(())
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        value
            .as_str()
            .map(|s| StoredValue::String(s.to_string()))
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Enumeration))
    }

    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        if text.is_empty() {
            return Err(TypeValidationError::BlankValue);
        }
        Ok(Value::String(text.to_string()))
    }
}
