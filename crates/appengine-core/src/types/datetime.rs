// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `datetime` kind: RFC 3339 instants normalized to UTC.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StoredValue, TypeValidationError, ValueKind, ValueType};

/// Instant with optional `before` / `after` bounds.
///
/// `before` rejects values earlier than the bound and `after` rejects values
/// later than it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateTimeType {
    /// Earliest accepted instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    /// Latest accepted instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl DateTimeType {
    fn as_instant(value: &Value) -> Result<DateTime<Utc>, TypeValidationError> {
        value
            .as_str()
            .and_then(parse_instant)
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Datetime))
    }
}

impl ValueKind for DateTimeType {
    fn value_type(&self) -> ValueType {
        ValueType::Datetime
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        let instant = Self::as_instant(value)?;
        if let Some(before) = self.before
            && instant < before
        {
            return Err(TypeValidationError::Before);
        }
        if let Some(after) = self.after
            && instant > after
        {
            return Err(TypeValidationError::After);
        }
        Ok(())
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        Ok(StoredValue::DateTime(Self::as_instant(value)?))
    }

    fn render_text(&self, value: &Value) -> String {
        match Self::as_instant(value) {
            Ok(instant) => instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Err(_) => value.to_string(),
        }
    }

    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        parse_instant(text)
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .ok_or_else(|| TypeValidationError::Malformed(format!("'{}' is not RFC 3339", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instant(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_bounds() {
        let ty = DateTimeType {
            before: Some(instant("2024-01-01T00:00:00Z")),
            after: Some(instant("2025-01-01T00:00:00Z")),
        };
        assert_eq!(
            ty.validate(&json!("2023-12-31T23:59:59Z")),
            Err(TypeValidationError::Before)
        );
        assert_eq!(
            ty.validate(&json!("2025-01-01T00:00:01Z")),
            Err(TypeValidationError::After)
        );
        assert_eq!(ty.validate(&json!("2024-06-01T12:00:00+02:00")), Ok(()));
    }

    #[test]
    fn test_constraints_from_descriptor() {
        let ty: DateTimeType =
            serde_json::from_value(json!({ "before": "2024-01-01T00:00:00Z" })).unwrap();
        assert_eq!(ty.before, Some(instant("2024-01-01T00:00:00Z")));
    }

    #[test]
    fn test_parse_normalizes_to_utc() {
        let ty = DateTimeType::default();
        assert_eq!(
            ty.parse_text("2024-06-01T12:00:00+02:00").unwrap(),
            json!("2024-06-01T10:00:00Z")
        );
        assert!(ty.parse_text("yesterday").is_err());
        assert_eq!(
            ty.validate(&json!("2024-13-01")),
            Err(TypeValidationError::TypeMismatch(ValueType::Datetime))
        );
    }
}
