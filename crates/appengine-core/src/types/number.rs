// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `number` kind: IEEE doubles with optional NaN/Infinity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StoredValue, TypeValidationError, ValueKind, ValueType, number_to_json};

/// Double with bounds; NaN and infinities are opt-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberType {
    /// Value must be strictly greater.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    /// Value must be greater or equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geq: Option<f64>,
    /// Value must be strictly less.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    /// Value must be less or equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leq: Option<f64>,
    /// Accept `Infinity` / `-Infinity`.
    #[serde(default)]
    pub infinity_allowed: bool,
    /// Accept `NaN`.
    #[serde(default)]
    pub nan_allowed: bool,
}

/// Text form of a double; non-finite values use their JSON-less spelling.
pub(crate) fn render(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

/// Parse a double, including the spelled-out non-finite values.
pub(crate) fn parse(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" | "+Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => text.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

impl NumberType {
    fn as_number(value: &Value) -> Result<f64, TypeValidationError> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse(s).filter(|v| !v.is_finite()),
            _ => None,
        }
        .ok_or(TypeValidationError::TypeMismatch(ValueType::Number))
    }

    fn check(&self, v: f64) -> Result<(), TypeValidationError> {
        if v.is_nan() {
            return if self.nan_allowed {
                Ok(())
            } else {
                Err(TypeValidationError::NanNotAllowed)
            };
        }
        if v.is_infinite() && !self.infinity_allowed {
            return Err(TypeValidationError::InfinityNotAllowed);
        }
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
}

impl ValueKind for NumberType {
    fn value_type(&self) -> ValueType {
        ValueType::Number
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        self.check(Self::as_number(value)?)
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        Ok(StoredValue::Number(Self::as_number(value)?))
    }

    fn render_text(&self, value: &Value) -> String {
        match Self::as_number(value) {
            Ok(v) => render(v),
            Err(_) => value.to_string(),
        }
    }

    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        if text.is_empty() {
            return Err(TypeValidationError::BlankValue);
        }
        parse(text)
            .map(number_to_json)
            .ok_or_else(|| TypeValidationError::Malformed(format!("'{}' is not a number", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bounds_use_double_semantics() {
        let ty = NumberType {
            gt: Some(0.5),
            leq: Some(1.0),
            ..Default::default()
        };
        assert_eq!(ty.validate(&json!(0.5)), Err(TypeValidationError::GreaterThan));
        assert_eq!(ty.validate(&json!(0.5000001)), Ok(()));
        assert_eq!(ty.validate(&json!(1)), Ok(()));
        assert_eq!(ty.validate(&json!(1.01)), Err(TypeValidationError::LessOrEqual));
    }

    #[test]
    fn test_non_finite_values() {
        let strict = NumberType::default();
        assert_eq!(
            strict.validate(&json!("NaN")),
            Err(TypeValidationError::NanNotAllowed)
        );
        assert_eq!(
            strict.validate(&json!("-Infinity")),
            Err(TypeValidationError::InfinityNotAllowed)
        );

        let lenient = NumberType {
            nan_allowed: true,
            infinity_allowed: true,
            ..Default::default()
        };
        assert_eq!(lenient.validate(&json!("NaN")), Ok(()));
        assert_eq!(lenient.validate(&json!("Infinity")), Ok(()));
    }

    #[test]
    fn test_numeric_strings_are_mismatches() {
        let ty = NumberType::default();
        assert_eq!(
            ty.validate(&json!("1.5")),
            Err(TypeValidationError::TypeMismatch(ValueType::Number))
        );
    }

    #[test]
    fn test_text_round_trip() {
        let ty = NumberType::default();
        assert_eq!(ty.render_text(&json!(2.5)), "2.5");
        assert_eq!(ty.render_text(&json!("-Infinity")), "-Infinity");
        assert_eq!(ty.parse_text("2.50").unwrap(), json!(2.5));
        assert_eq!(ty.parse_text("NaN").unwrap(), json!("NaN"));
        assert!(ty.parse_text("two").is_err());
    }
}
