// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for appengine-core.
//!
//! One keyed record per task, per task parameter, per run and per
//! `(run, parameter, direction)` typed value.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::task_catalog::ParameterDirection;
use crate::types::{StoredValue, ValueType, number};

/// Task record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Task UUID.
    pub id: String,
    /// Namespace, unique together with `version`.
    pub namespace: String,
    /// Version string.
    pub version: String,
    /// Display name.
    pub name: String,
    /// Short name.
    pub name_short: Option<String>,
    /// Free-text description.
    pub description: Option<String>,
    /// Authors as a JSON array.
    pub authors: String,
    /// Raw `descriptor.yml`.
    pub descriptor: Vec<u8>,
    /// Storage bucket holding the descriptor.
    pub storage_reference: String,
    /// Qualified image name pushed to the registry.
    pub image_name: String,
    /// Folder inputs are mounted at inside the container.
    pub input_folder: String,
    /// Folder outputs are collected from inside the container.
    pub output_folder: String,
    /// Requested RAM, e.g. `2Gi`.
    pub ram: Option<String>,
    /// Requested CPUs.
    pub cpus: Option<i64>,
    /// Requested GPUs.
    pub gpus: Option<i64>,
    /// Upload time.
    pub created_at: DateTime<Utc>,
}

/// Declared input or output of a task.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParameterRecord {
    /// Parameter UUID.
    pub id: String,
    /// Owning task.
    pub task_id: String,
    /// Name, unique per task and direction.
    pub name: String,
    /// `INPUT` or `OUTPUT`.
    pub direction: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Whether a value may be omitted.
    pub optional: bool,
    /// Type definition as JSON.
    pub type_definition: String,
    /// Default value as JSON.
    pub default_value: Option<String>,
    /// Input this output is derived from.
    pub derived_from: Option<String>,
}

/// Run record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    /// Run UUID.
    pub id: String,
    /// Task this run executes.
    pub task_id: String,
    /// Current lifecycle state.
    pub state: String,
    /// Secret authenticating the output archive upload.
    pub secret: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Time of the last state change.
    pub last_state_transition_at: DateTime<Utc>,
}

/// Typed value of one parameter of one run.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TypedValueRecord {
    /// Row UUID.
    pub id: String,
    /// Owning run.
    pub run_id: String,
    /// Parameter name.
    pub parameter_name: String,
    /// `INPUT` or `OUTPUT`.
    pub direction: String,
    /// Value kind tag.
    pub value_type: String,
    /// Integer kinds.
    pub integer_value: Option<i64>,
    /// Finite doubles.
    pub number_value: Option<f64>,
    /// Text kinds, and non-finite doubles.
    pub string_value: Option<String>,
    /// Booleans.
    pub boolean_value: Option<bool>,
    /// Instants.
    pub datetime_value: Option<DateTime<Utc>>,
    /// Collections, as JSON text.
    pub json_value: Option<String>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl TypedValueRecord {
    /// Build a row for a value.
    pub fn new(
        run_id: &Uuid,
        parameter_name: &str,
        direction: ParameterDirection,
        value_type: ValueType,
        stored: &StoredValue,
    ) -> Self {
        let mut record = Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            parameter_name: parameter_name.to_string(),
            direction: direction.as_str().to_string(),
            value_type: value_type.as_str().to_string(),
            integer_value: None,
            number_value: None,
            string_value: None,
            boolean_value: None,
            datetime_value: None,
            json_value: None,
            updated_at: Utc::now(),
        };

        match stored {
            StoredValue::None => {}
            StoredValue::Integer(v) => record.integer_value = Some(*v),
            StoredValue::Number(v) if v.is_finite() => record.number_value = Some(*v),
            StoredValue::Number(v) => record.string_value = Some(number::render(*v)),
            StoredValue::String(v) => record.string_value = Some(v.clone()),
            StoredValue::Boolean(v) => record.boolean_value = Some(*v),
            StoredValue::DateTime(v) => record.datetime_value = Some(*v),
            StoredValue::Json(v) => record.json_value = Some(v.to_string()),
        }
        record
    }

    /// The value held by whichever column is set.
    pub fn stored(&self) -> StoredValue {
        if let Some(v) = self.integer_value {
            return StoredValue::Integer(v);
        }
        if let Some(v) = self.number_value {
            return StoredValue::Number(v);
        }
        if let Some(v) = self.boolean_value {
            return StoredValue::Boolean(v);
        }
        if let Some(v) = self.datetime_value {
            return StoredValue::DateTime(v);
        }
        if let Some(v) = &self.json_value {
            return serde_json::from_str(v)
                .map(StoredValue::Json)
                .unwrap_or_else(|_| StoredValue::String(v.clone()));
        }
        if let Some(v) = &self.string_value {
            if self.value_type == ValueType::Number.as_str()
                && let Some(n) = number::parse(v)
            {
                return StoredValue::Number(n);
            }
            return StoredValue::String(v.clone());
        }
        StoredValue::None
    }
}

/// Persistence interface used by the catalog, provisioning and reconciliation.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a task and its parameters atomically.
    async fn insert_task(
        &self,
        task: &TaskRecord,
        parameters: &[ParameterRecord],
    ) -> Result<(), CoreError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CoreError>;

    async fn get_task_by_namespace_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Option<TaskRecord>, CoreError>;

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, CoreError>;

    async fn get_task_parameters(&self, task_id: &str) -> Result<Vec<ParameterRecord>, CoreError>;

    async fn insert_run(&self, run: &RunRecord) -> Result<(), CoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, CoreError>;

    /// Compare-and-swap the run state.
    ///
    /// Applies only when the current state is one of `from`; returns whether
    /// the row changed.
    async fn transition_run_state(
        &self,
        run_id: &str,
        from: &[&str],
        to: &str,
    ) -> Result<bool, CoreError>;

    /// Move `from` → `to` only once at least `declared_inputs` INPUT rows exist.
    ///
    /// The count and the state change are evaluated in one statement.
    async fn promote_run_if_inputs_complete(
        &self,
        run_id: &str,
        from: &str,
        to: &str,
        declared_inputs: i64,
    ) -> Result<bool, CoreError>;

    /// Insert or overwrite the row keyed by `(run_id, parameter_name, direction)`.
    async fn upsert_typed_value(&self, value: &TypedValueRecord) -> Result<(), CoreError>;

    async fn get_typed_value(
        &self,
        run_id: &str,
        parameter_name: &str,
        direction: &str,
    ) -> Result<Option<TypedValueRecord>, CoreError>;

    async fn list_typed_values(
        &self,
        run_id: &str,
        direction: &str,
    ) -> Result<Vec<TypedValueRecord>, CoreError>;

    async fn count_typed_values(&self, run_id: &str, direction: &str) -> Result<i64, CoreError>;

    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_columns() {
        let run_id = Uuid::new_v4();
        let record = TypedValueRecord::new(
            &run_id,
            "a",
            ParameterDirection::Input,
            ValueType::Integer,
            &StoredValue::Integer(250),
        );
        assert_eq!(record.direction, "INPUT");
        assert_eq!(record.value_type, "INTEGER");
        assert_eq!(record.integer_value, Some(250));
        assert_eq!(record.stored(), StoredValue::Integer(250));
    }

    #[test]
    fn test_non_finite_number_round_trip() {
        let record = TypedValueRecord::new(
            &Uuid::new_v4(),
            "x",
            ParameterDirection::Output,
            ValueType::Number,
            &StoredValue::Number(f64::NEG_INFINITY),
        );
        assert_eq!(record.number_value, None);
        assert_eq!(record.string_value.as_deref(), Some("-Infinity"));
        assert_eq!(record.stored(), StoredValue::Number(f64::NEG_INFINITY));
    }

    #[test]
    fn test_json_column() {
        let value = json!([{ "index": 0, "value": 1 }]);
        let record = TypedValueRecord::new(
            &Uuid::new_v4(),
            "list",
            ParameterDirection::Input,
            ValueType::Array,
            &StoredValue::Json(value.clone()),
        );
        assert_eq!(record.stored(), StoredValue::Json(value));
    }
}
