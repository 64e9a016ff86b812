// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Types bound to their persistence port and storage charset.

use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::{Charset, StoredValue, Type, TypeDefinitionError, TypeValidationError, TypedValue};
use crate::error::CoreError;
use crate::persistence::{Persistence, TypedValueRecord};
use crate::storage::StorageData;
use crate::task_catalog::ParameterDirection;

/// Factory for [`Type`]s and the injection point for their persistence.
#[derive(Clone)]
pub struct TypeRegistry {
    persistence: Arc<dyn Persistence>,
    charset: Charset,
}

impl TypeRegistry {
    /// Create a registry writing typed values through `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>, charset: Charset) -> Self {
        Self {
            persistence,
            charset,
        }
    }

    /// Charset used for textual storage.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Build the type declared by a descriptor parameter node.
    pub fn create_type(&self, fragment: &Value) -> Result<Type, TypeDefinitionError> {
        Type::from_descriptor(fragment)
    }

    /// Bind a type to this registry's persistence and charset.
    pub fn bind<'a>(&'a self, ty: &'a Type) -> BoundType<'a> {
        BoundType { ty, registry: self }
    }
}

/// A [`Type`] able to persist and serialize values.
pub struct BoundType<'a> {
    ty: &'a Type,
    registry: &'a TypeRegistry,
}

fn validation(param_name: &str) -> impl FnOnce(TypeValidationError) -> CoreError + '_ {
    move |error| CoreError::Validation {
        param_name: param_name.to_string(),
        error,
    }
}

impl BoundType<'_> {
    /// The underlying type.
    pub fn ty(&self) -> &Type {
        self.ty
    }

    /// Validate a provision value.
    pub fn validate(&self, value: &Value, optional: bool) -> Result<(), TypeValidationError> {
        self.ty.validate(value, optional)
    }

    fn stored(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        if value.is_null() {
            return Ok(StoredValue::None);
        }
        self.ty.kind().stored_value(value)
    }

    /// Serialize a provision value into the storage form named after the parameter.
    pub fn map_to_storage(
        &self,
        param_name: &str,
        value: &Value,
    ) -> Result<StorageData, TypeValidationError> {
        if value.is_null() {
            return Ok(StorageData::file(param_name, Vec::new()));
        }
        self.ty
            .kind()
            .to_storage(param_name, value, self.registry.charset)
    }

    /// Upsert the INPUT row for `(run_id, param_name)`.
    pub async fn persist_provision(
        &self,
        run_id: &Uuid,
        param_name: &str,
        value: &Value,
    ) -> Result<(), CoreError> {
        let stored = self.stored(value).map_err(validation(param_name))?;
        let record = TypedValueRecord::new(
            run_id,
            param_name,
            ParameterDirection::Input,
            self.ty.value_type(),
            &stored,
        );
        self.registry.persistence.upsert_typed_value(&record).await
    }

    /// Parse storage content into the kind's JSON form.
    pub fn read_storage(&self, data: &StorageData) -> Result<Value, TypeValidationError> {
        self.ty.kind().from_storage(data, self.registry.charset)
    }

    /// Parse an output read back from an archive and upsert its OUTPUT row.
    ///
    /// Returns the parsed value.
    pub async fn persist_result(
        &self,
        run_id: &Uuid,
        param_name: &str,
        data: &StorageData,
    ) -> Result<Value, CoreError> {
        let value = self.read_storage(data).map_err(validation(param_name))?;
        let stored = self.stored(&value).map_err(validation(param_name))?;
        let record = TypedValueRecord::new(
            run_id,
            param_name,
            ParameterDirection::Output,
            self.ty.value_type(),
            &stored,
        );
        self.registry.persistence.upsert_typed_value(&record).await?;
        Ok(value)
    }

    /// Acknowledgment returned after a successful provision.
    ///
    /// Kinds that keep no value in their row (binary kinds) do not echo it.
    pub fn create_typed_parameter_response(
        &self,
        run_id: &Uuid,
        param_name: &str,
        value: &Value,
    ) -> Value {
        let mut response = json!({
            "param_name": param_name,
            "task_run_id": run_id.to_string(),
        });
        if !matches!(self.stored(value), Ok(StoredValue::None)) {
            response["value"] = value.clone();
        }
        response
    }

    /// Read-back DTO around an already parsed value.
    pub fn typed_value(&self, run_id: &Uuid, param_name: &str, value: Value) -> TypedValue {
        TypedValue {
            param_name: param_name.to_string(),
            task_run_id: *run_id,
            value_type: self.ty.value_type(),
            value,
        }
    }

    /// Read-back DTO built from storage content.
    pub fn build_value_from_storage(
        &self,
        run_id: &Uuid,
        param_name: &str,
        data: &StorageData,
    ) -> Result<TypedValue, TypeValidationError> {
        let value = self.read_storage(data)?;
        Ok(self.typed_value(run_id, param_name, value))
    }

    /// Read-back DTO built from a persisted row.
    pub fn build_value_from_record(
        &self,
        run_id: &Uuid,
        record: &TypedValueRecord,
    ) -> TypedValue {
        self.typed_value(run_id, &record.parameter_name, record.stored().to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlitePersistence;
    use crate::types::file::FileType;
    use crate::types::integer::IntegerType;
    use crate::types::ValueType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn registry() -> TypeRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrations::run_sqlite(&pool).await.unwrap();
        TypeRegistry::new(Arc::new(SqlitePersistence::new(pool)), Charset::Utf8)
    }

    #[tokio::test]
    async fn test_persist_provision_upserts() {
        let registry = registry().await;
        let ty = Type::Integer(IntegerType::default());
        let bound = registry.bind(&ty);
        let run_id = Uuid::new_v4();

        bound.persist_provision(&run_id, "a", &json!(1)).await.unwrap();
        bound.persist_provision(&run_id, "a", &json!(2)).await.unwrap();

        let rows = registry
            .persistence
            .list_typed_values(&run_id.to_string(), ParameterDirection::Input.as_str())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let dto = bound.build_value_from_record(&run_id, &rows[0]);
        assert_eq!(dto.value, json!(2));
        assert_eq!(dto.value_type, ValueType::Integer);
    }

    #[tokio::test]
    async fn test_persist_result_parses_storage_text() {
        let registry = registry().await;
        let ty = Type::Integer(IntegerType::default());
        let bound = registry.bind(&ty);
        let run_id = Uuid::new_v4();

        let value = bound
            .persist_result(&run_id, "sum", &StorageData::file("sum", b" 042\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(value, json!(42));

        let err = bound
            .persist_result(&run_id, "sum", &StorageData::file("sum", b"many".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.param_name(), Some("sum"));
    }

    #[tokio::test]
    async fn test_binary_response_omits_value() {
        let registry = registry().await;
        let ty = Type::File(FileType::default());
        let run_id = Uuid::new_v4();
        let response =
            registry
                .bind(&ty)
                .create_typed_parameter_response(&run_id, "blob", &json!("aGVsbG8="));
        assert_eq!(response["param_name"], json!("blob"));
        assert!(response.get("value").is_none());

        let ty = Type::Integer(IntegerType::default());
        let response = registry
            .bind(&ty)
            .create_typed_parameter_response(&run_id, "a", &json!(250));
        assert_eq!(response["value"], json!(250));
    }
}
