// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `integer` kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StoredValue, TypeValidationError, ValueKind, ValueType};

/// 64-bit integer with independent strict and inclusive bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegerType {
    /// Value must be strictly greater.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<i64>,
    /// Value must be greater or equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geq: Option<i64>,
    /// Value must be strictly less.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<i64>,
    /// Value must be less or equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leq: Option<i64>,
}

impl IntegerType {
    fn check_bounds(&self, v: i64) -> Result<(), TypeValidationError> {
        if let Some(gt) = self.gt
            && v <= gt
        {
            return Err(TypeValidationError::GreaterThan);
        }
        if let Some(geq) = self.geq
            && v < geq
        {
            return Err(TypeValidationError::GreaterOrEqual);
        }
        if let Some(lt) = self.lt
            && v >= lt
        {
            return Err(TypeValidationError::LessThan);
        }
        if let Some(leq) = self.leq
            && v > leq
        {
            return Err(TypeValidationError::LessOrEqual);
        }
        Ok(())
    }

    fn as_integer(value: &Value) -> Result<i64, TypeValidationError> {
        value
            .as_i64()
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Integer))
    }
}

impl ValueKind for IntegerType {
    fn value_type(&self) -> ValueType {
        ValueType::Integer
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        self.check_bounds(Self::as_integer(value)?)
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        Ok(StoredValue::Integer(Self::as_integer(value)?))
    }

    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        if text.is_empty() {
            return Err(TypeValidationError::BlankValue);
        }
        text.parse::<i64>()
            .map(Value::from)
            .map_err(|e| TypeValidationError::Malformed(format!("'{}': {}", text, e)))
    }
}
