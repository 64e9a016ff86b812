// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `boolean` kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StoredValue, TypeValidationError, ValueKind, ValueType};

/// Boolean flag; carries no constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BooleanType {}

impl ValueKind for BooleanType {
    fn value_type(&self) -> ValueType {
        ValueType::Boolean
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        value
            .as_bool()
            .map(|_| ())
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Boolean))
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        value
            .as_bool()
            .map(StoredValue::Boolean)
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Boolean))
    }

    /// Anything but a case-insensitive `true` reads as `false`.
    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        Ok(Value::Bool(text.eq_ignore_ascii_case("true")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_and_parse() {
        let ty = BooleanType {};
        assert_eq!(ty.validate(&json!(true)), Ok(()));
        assert!(ty.validate(&json!("true")).is_err());
        assert_eq!(ty.parse_text("TRUE").unwrap(), json!(true));
        assert_eq!(ty.parse_text("yes").unwrap(), json!(false));
        assert_eq!(ty.render_text(&json!(false)), "false");
    }
}
