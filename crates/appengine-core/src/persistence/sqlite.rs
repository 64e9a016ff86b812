// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;

use super::{ParameterRecord, Persistence, RunRecord, TaskRecord, TypedValueRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run all migrations.
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/appengine.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn duplicate_task(err: sqlx::Error, task: &TaskRecord) -> CoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::TaskAlreadyExists {
            namespace: task.namespace.clone(),
            version: task.version.clone(),
        },
        _ => err.into(),
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_task(
        &self,
        task: &TaskRecord,
        parameters: &[ParameterRecord],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, namespace, version, name, name_short, description, authors,
                               descriptor, storage_reference, image_name, input_folder,
                               output_folder, ram, cpus, gpus, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.namespace)
        .bind(&task.version)
        .bind(&task.name)
        .bind(&task.name_short)
        .bind(&task.description)
        .bind(&task.authors)
        .bind(&task.descriptor)
        .bind(&task.storage_reference)
        .bind(&task.image_name)
        .bind(&task.input_folder)
        .bind(&task.output_folder)
        .bind(&task.ram)
        .bind(task.cpus)
        .bind(task.gpus)
        .bind(task.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_task(e, task))?;

        for param in parameters {
            sqlx::query(
                r#"
                INSERT INTO task_parameters (id, task_id, name, direction, display_name,
                                             description, optional, type_definition,
                                             default_value, derived_from)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&param.id)
            .bind(&param.task_id)
            .bind(&param.name)
            .bind(&param.direction)
            .bind(&param.display_name)
            .bind(&param.description)
            .bind(param.optional)
            .bind(&param.type_definition)
            .bind(&param.default_value)
            .bind(&param.derived_from)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT id, namespace, version, name, name_short, description, authors, descriptor,
                   storage_reference, image_name, input_folder, output_folder, ram, cpus, gpus,
                   created_at
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_task_by_namespace_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Option<TaskRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT id, namespace, version, name, name_short, description, authors, descriptor,
                   storage_reference, image_name, input_folder, output_folder, ram, cpus, gpus,
                   created_at
            FROM tasks
            WHERE namespace = ? AND version = ?
            "#,
        )
        .bind(namespace)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, CoreError> {
        let records = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT id, namespace, version, name, name_short, description, authors, descriptor,
                   storage_reference, image_name, input_folder, output_folder, ram, cpus, gpus,
                   created_at
            FROM tasks
            ORDER BY namespace, version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn get_task_parameters(&self, task_id: &str) -> Result<Vec<ParameterRecord>, CoreError> {
        let records = sqlx::query_as::<_, ParameterRecord>(
            r#"
            SELECT id, task_id, name, direction, display_name, description, optional,
                   type_definition, default_value, derived_from
            FROM task_parameters
            WHERE task_id = ?
            ORDER BY direction, name
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, task_id, state, secret, created_at, updated_at,
                              last_state_transition_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.task_id)
        .bind(&run.state)
        .bind(&run.secret)
        .bind(run.created_at)
        .bind(run.updated_at)
        .bind(run.last_state_transition_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
        let record = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, task_id, state, secret, created_at, updated_at, last_state_transition_at
            FROM runs
            WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn transition_run_state(
        &self,
        run_id: &str,
        from: &[&str],
        to: &str,
    ) -> Result<bool, CoreError> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE runs SET state = ?, updated_at = ?, last_state_transition_at = ? \
             WHERE id = ? AND state IN ({placeholders})"
        );

        let now = Utc::now();
        let mut query = sqlx::query(&sql).bind(to).bind(now).bind(now).bind(run_id);
        for state in from {
            query = query.bind(*state);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn promote_run_if_inputs_complete(
        &self,
        run_id: &str,
        from: &str,
        to: &str,
        declared_inputs: i64,
    ) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET state = ?, updated_at = ?, last_state_transition_at = ?
            WHERE id = ? AND state = ?
              AND (SELECT COUNT(*) FROM typed_values
                   WHERE run_id = ? AND direction = 'INPUT') >= ?
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(now)
        .bind(run_id)
        .bind(from)
        .bind(run_id)
        .bind(declared_inputs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_typed_value(&self, value: &TypedValueRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO typed_values (id, run_id, parameter_name, direction, value_type,
                                      integer_value, number_value, string_value, boolean_value,
                                      datetime_value, json_value, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id, parameter_name, direction) DO UPDATE SET
                value_type = excluded.value_type,
                integer_value = excluded.integer_value,
                number_value = excluded.number_value,
                string_value = excluded.string_value,
                boolean_value = excluded.boolean_value,
                datetime_value = excluded.datetime_value,
                json_value = excluded.json_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&value.id)
        .bind(&value.run_id)
        .bind(&value.parameter_name)
        .bind(&value.direction)
        .bind(&value.value_type)
        .bind(value.integer_value)
        .bind(value.number_value)
        .bind(&value.string_value)
        .bind(value.boolean_value)
        .bind(value.datetime_value)
        .bind(&value.json_value)
        .bind(value.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_typed_value(
        &self,
        run_id: &str,
        parameter_name: &str,
        direction: &str,
    ) -> Result<Option<TypedValueRecord>, CoreError> {
        let record = sqlx::query_as::<_, TypedValueRecord>(
            r#"
            SELECT id, run_id, parameter_name, direction, value_type, integer_value,
                   number_value, string_value, boolean_value, datetime_value, json_value,
                   updated_at
            FROM typed_values
            WHERE run_id = ? AND parameter_name = ? AND direction = ?
            "#,
        )
        .bind(run_id)
        .bind(parameter_name)
        .bind(direction)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_typed_values(
        &self,
        run_id: &str,
        direction: &str,
    ) -> Result<Vec<TypedValueRecord>, CoreError> {
        let records = sqlx::query_as::<_, TypedValueRecord>(
            r#"
            SELECT id, run_id, parameter_name, direction, value_type, integer_value,
                   number_value, string_value, boolean_value, datetime_value, json_value,
                   updated_at
            FROM typed_values
            WHERE run_id = ? AND direction = ?
            ORDER BY parameter_name
            "#,
        )
        .bind(run_id)
        .bind(direction)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_typed_values(&self, run_id: &str, direction: &str) -> Result<i64, CoreError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM typed_values WHERE run_id = ? AND direction = ?
            "#,
        )
        .bind(run_id)
        .bind(direction)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_catalog::ParameterDirection;
    use crate::types::{StoredValue, ValueType};
    use chrono::Utc;
    use uuid::Uuid;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        pool
    }

    fn task_record(namespace: &str, version: &str) -> TaskRecord {
        TaskRecord {
            id: Uuid::new_v4().to_string(),
            namespace: namespace.to_string(),
            version: version.to_string(),
            name: "Sum".to_string(),
            name_short: Some("sum".to_string()),
            description: None,
            authors: "[]".to_string(),
            descriptor: b"name: Sum\n".to_vec(),
            storage_reference: "task-def".to_string(),
            image_name: format!("{}:{}", namespace, version),
            input_folder: "/inputs".to_string(),
            output_folder: "/outputs".to_string(),
            ram: Some("1Gi".to_string()),
            cpus: Some(1),
            gpus: None,
            created_at: Utc::now(),
        }
    }

    fn parameter(task_id: &str, name: &str, direction: &str) -> ParameterRecord {
        ParameterRecord {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            name: name.to_string(),
            direction: direction.to_string(),
            display_name: Some(name.to_uppercase()),
            description: None,
            optional: false,
            type_definition: r#"{"id":"integer"}"#.to_string(),
            default_value: None,
            derived_from: None,
        }
    }

    async fn seeded_run(persistence: &SqlitePersistence) -> String {
        let task = task_record("com.example.sum", "1.0.0");
        persistence.insert_task(&task, &[]).await.unwrap();
        let now = Utc::now();
        let run = RunRecord {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            state: "CREATED".to_string(),
            secret: "s3cret".to_string(),
            created_at: now,
            updated_at: now,
            last_state_transition_at: now,
        };
        persistence.insert_run(&run).await.unwrap();
        run.id
    }

    fn input(run_id: &str, name: &str, value: i64) -> TypedValueRecord {
        let run_id = Uuid::parse_str(run_id).unwrap();
        TypedValueRecord::new(
            &run_id,
            name,
            ParameterDirection::Input,
            ValueType::Integer,
            &StoredValue::Integer(value),
        )
    }

    #[tokio::test]
    async fn test_insert_and_lookup_task() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let task = task_record("com.example.sum", "1.0.0");
        let params = vec![
            parameter(&task.id, "a", "INPUT"),
            parameter(&task.id, "b", "INPUT"),
            parameter(&task.id, "sum", "OUTPUT"),
        ];
        persistence.insert_task(&task, &params).await.unwrap();

        let by_id = persistence.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(by_id.namespace, "com.example.sum");
        assert_eq!(by_id.descriptor, b"name: Sum\n");
        assert_eq!(by_id.cpus, Some(1));

        let by_version = persistence
            .get_task_by_namespace_version("com.example.sum", "1.0.0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_version.id, task.id);

        let stored = persistence.get_task_parameters(&task.id).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(
            stored.iter().filter(|p| p.direction == "INPUT").count(),
            2
        );
        assert_eq!(persistence.list_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_namespace_version_rejected() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let first = task_record("com.example.sum", "1.0.0");
        persistence.insert_task(&first, &[]).await.unwrap();

        let second = task_record("com.example.sum", "1.0.0");
        let err = persistence.insert_task(&second, &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "TASK_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_failed_parameter_insert_rolls_back_task() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let task = task_record("com.example.sum", "1.0.0");
        let params = vec![
            parameter(&task.id, "a", "INPUT"),
            parameter(&task.id, "a", "INPUT"),
        ];
        assert!(persistence.insert_task(&task, &params).await.is_err());
        assert!(persistence.get_task(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let run_id = seeded_run(&persistence).await;

        let moved = persistence
            .transition_run_state(&run_id, &["PROVISIONED"], "QUEUING")
            .await
            .unwrap();
        assert!(!moved);

        let moved = persistence
            .transition_run_state(&run_id, &["CREATED", "PROVISIONED"], "FAILED")
            .await
            .unwrap();
        assert!(moved);

        let run = persistence.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, "FAILED");
        assert!(run.last_state_transition_at >= run.created_at);

        assert!(
            !persistence
                .transition_run_state(&run_id, &[], "RUNNING")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_promotion_waits_for_every_input() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let run_id = seeded_run(&persistence).await;

        persistence
            .upsert_typed_value(&input(&run_id, "a", 250))
            .await
            .unwrap();
        assert!(
            !persistence
                .promote_run_if_inputs_complete(&run_id, "CREATED", "PROVISIONED", 2)
                .await
                .unwrap()
        );

        persistence
            .upsert_typed_value(&input(&run_id, "b", 250))
            .await
            .unwrap();
        assert!(
            persistence
                .promote_run_if_inputs_complete(&run_id, "CREATED", "PROVISIONED", 2)
                .await
                .unwrap()
        );
        assert!(
            !persistence
                .promote_run_if_inputs_complete(&run_id, "CREATED", "PROVISIONED", 2)
                .await
                .unwrap()
        );

        let run = persistence.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, "PROVISIONED");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_single_row() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let run_id = seeded_run(&persistence).await;

        persistence
            .upsert_typed_value(&input(&run_id, "a", 1))
            .await
            .unwrap();
        persistence
            .upsert_typed_value(&input(&run_id, "a", 2))
            .await
            .unwrap();

        assert_eq!(
            persistence
                .count_typed_values(&run_id, "INPUT")
                .await
                .unwrap(),
            1
        );
        let row = persistence
            .get_typed_value(&run_id, "a", "INPUT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.stored(), StoredValue::Integer(2));
        assert!(
            persistence
                .get_typed_value(&run_id, "a", "OUTPUT")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let persistence = SqlitePersistence::new(test_pool().await);
        assert!(persistence.health_check_db().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("appengine.db");
        let persistence = SqlitePersistence::from_path(&path).await.unwrap();
        assert!(path.exists());
        assert!(persistence.list_tasks().await.unwrap().is_empty());
    }
}
