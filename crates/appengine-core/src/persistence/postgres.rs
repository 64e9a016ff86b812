// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence operations.
//!
//! Free functions over a [`PgPool`]; [`PostgresPersistence`] delegates to them.

use chrono::Utc;
use sqlx::PgPool;

use crate::error::CoreError;

use super::{ParameterRecord, Persistence, RunRecord, TaskRecord, TypedValueRecord};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const TASK_COLUMNS: &str = "id, namespace, version, name, name_short, description, authors, \
     descriptor, storage_reference, image_name, input_folder, output_folder, ram, cpus, gpus, \
     created_at";

const TYPED_VALUE_COLUMNS: &str = "id, run_id, parameter_name, direction, value_type, \
     integer_value, number_value, string_value, boolean_value, datetime_value, json_value, \
     updated_at";

// ============================================================================
// Task Operations
// ============================================================================

/// Insert a task and its parameters in one transaction.
pub async fn insert_task(
    pool: &PgPool,
    task: &TaskRecord,
    parameters: &[ParameterRecord],
) -> Result<(), CoreError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO tasks (id, namespace, version, name, name_short, description, authors,
                           descriptor, storage_reference, image_name, input_folder,
                           output_folder, ram, cpus, gpus, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (namespace, version) DO NOTHING
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
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(CoreError::TaskAlreadyExists {
            namespace: task.namespace.clone(),
            version: task.version.clone(),
        });
    }

    for param in parameters {
        sqlx::query(
            r#"
            INSERT INTO task_parameters (id, task_id, name, direction, display_name,
                                         description, optional, type_definition,
                                         default_value, derived_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
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

/// Get a task by ID.
pub async fn get_task(pool: &PgPool, task_id: &str) -> Result<Option<TaskRecord>, CoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
    let record = sqlx::query_as::<_, TaskRecord>(&sql)
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// Get a task by its namespace and version.
pub async fn get_task_by_namespace_version(
    pool: &PgPool,
    namespace: &str,
    version: &str,
) -> Result<Option<TaskRecord>, CoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE namespace = $1 AND version = $2");
    let record = sqlx::query_as::<_, TaskRecord>(&sql)
        .bind(namespace)
        .bind(version)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// List all tasks.
pub async fn list_tasks(pool: &PgPool) -> Result<Vec<TaskRecord>, CoreError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY namespace, version");
    let records = sqlx::query_as::<_, TaskRecord>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(records)
}

/// Declared inputs and outputs of a task.
pub async fn get_task_parameters(
    pool: &PgPool,
    task_id: &str,
) -> Result<Vec<ParameterRecord>, CoreError> {
    let records = sqlx::query_as::<_, ParameterRecord>(
        r#"
        SELECT id, task_id, name, direction, display_name, description, optional,
               type_definition, default_value, derived_from
        FROM task_parameters
        WHERE task_id = $1
        ORDER BY direction, name
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

// ============================================================================
// Run Operations
// ============================================================================

/// Insert a new run.
pub async fn insert_run(pool: &PgPool, run: &RunRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO runs (id, task_id, state, secret, created_at, updated_at,
                          last_state_transition_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&run.id)
    .bind(&run.task_id)
    .bind(&run.state)
    .bind(&run.secret)
    .bind(run.created_at)
    .bind(run.updated_at)
    .bind(run.last_state_transition_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get a run by ID.
pub async fn get_run(pool: &PgPool, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
    let record = sqlx::query_as::<_, RunRecord>(
        r#"
        SELECT id, task_id, state, secret, created_at, updated_at, last_state_transition_at
        FROM runs
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Guarded state change; returns whether the row changed.
pub async fn transition_run_state(
    pool: &PgPool,
    run_id: &str,
    from: &[&str],
    to: &str,
) -> Result<bool, CoreError> {
    let from: Vec<String> = from.iter().map(|s| s.to_string()).collect();
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE runs
        SET state = $1, updated_at = $2, last_state_transition_at = $2
        WHERE id = $3 AND state = ANY($4)
        "#,
    )
    .bind(to)
    .bind(now)
    .bind(run_id)
    .bind(&from)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Promote a run once its INPUT row count reaches `declared_inputs`.
pub async fn promote_run_if_inputs_complete(
    pool: &PgPool,
    run_id: &str,
    from: &str,
    to: &str,
    declared_inputs: i64,
) -> Result<bool, CoreError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE runs
        SET state = $1, updated_at = $2, last_state_transition_at = $2
        WHERE id = $3 AND state = $4
          AND (SELECT COUNT(*) FROM typed_values
               WHERE run_id = $3 AND direction = 'INPUT') >= $5
        "#,
    )
    .bind(to)
    .bind(now)
    .bind(run_id)
    .bind(from)
    .bind(declared_inputs)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Typed Value Operations
// ============================================================================

/// Insert or overwrite a typed value.
pub async fn upsert_typed_value(pool: &PgPool, value: &TypedValueRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO typed_values (id, run_id, parameter_name, direction, value_type,
                                  integer_value, number_value, string_value, boolean_value,
                                  datetime_value, json_value, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (run_id, parameter_name, direction) DO UPDATE SET
            value_type = EXCLUDED.value_type,
            integer_value = EXCLUDED.integer_value,
            number_value = EXCLUDED.number_value,
            string_value = EXCLUDED.string_value,
            boolean_value = EXCLUDED.boolean_value,
            datetime_value = EXCLUDED.datetime_value,
            json_value = EXCLUDED.json_value,
            updated_at = EXCLUDED.updated_at
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
    .execute(pool)
    .await?;
    Ok(())
}

/// Get one typed value.
pub async fn get_typed_value(
    pool: &PgPool,
    run_id: &str,
    parameter_name: &str,
    direction: &str,
) -> Result<Option<TypedValueRecord>, CoreError> {
    let sql = format!(
        "SELECT {TYPED_VALUE_COLUMNS} FROM typed_values \
         WHERE run_id = $1 AND parameter_name = $2 AND direction = $3"
    );
    let record = sqlx::query_as::<_, TypedValueRecord>(&sql)
        .bind(run_id)
        .bind(parameter_name)
        .bind(direction)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// List the typed values of a run in one direction.
pub async fn list_typed_values(
    pool: &PgPool,
    run_id: &str,
    direction: &str,
) -> Result<Vec<TypedValueRecord>, CoreError> {
    let sql = format!(
        "SELECT {TYPED_VALUE_COLUMNS} FROM typed_values \
         WHERE run_id = $1 AND direction = $2 ORDER BY parameter_name"
    );
    let records = sqlx::query_as::<_, TypedValueRecord>(&sql)
        .bind(run_id)
        .bind(direction)
        .fetch_all(pool)
        .await?;
    Ok(records)
}

/// Count the typed values of a run in one direction.
pub async fn count_typed_values(
    pool: &PgPool,
    run_id: &str,
    direction: &str,
) -> Result<i64, CoreError> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM typed_values WHERE run_id = $1 AND direction = $2")
            .bind(run_id)
            .bind(direction)
            .fetch_one(pool)
            .await?;
    Ok(count.0)
}

// ============================================================================
// Trait Implementation
// ============================================================================

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn insert_task(
        &self,
        task: &TaskRecord,
        parameters: &[ParameterRecord],
    ) -> Result<(), CoreError> {
        insert_task(&self.pool, task, parameters).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CoreError> {
        get_task(&self.pool, task_id).await
    }

    async fn get_task_by_namespace_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Option<TaskRecord>, CoreError> {
        get_task_by_namespace_version(&self.pool, namespace, version).await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, CoreError> {
        list_tasks(&self.pool).await
    }

    async fn get_task_parameters(&self, task_id: &str) -> Result<Vec<ParameterRecord>, CoreError> {
        get_task_parameters(&self.pool, task_id).await
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<(), CoreError> {
        insert_run(&self.pool, run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, CoreError> {
        get_run(&self.pool, run_id).await
    }

    async fn transition_run_state(
        &self,
        run_id: &str,
        from: &[&str],
        to: &str,
    ) -> Result<bool, CoreError> {
        transition_run_state(&self.pool, run_id, from, to).await
    }

    async fn promote_run_if_inputs_complete(
        &self,
        run_id: &str,
        from: &str,
        to: &str,
        declared_inputs: i64,
    ) -> Result<bool, CoreError> {
        promote_run_if_inputs_complete(&self.pool, run_id, from, to, declared_inputs).await
    }

    async fn upsert_typed_value(&self, value: &TypedValueRecord) -> Result<(), CoreError> {
        upsert_typed_value(&self.pool, value).await
    }

    async fn get_typed_value(
        &self,
        run_id: &str,
        parameter_name: &str,
        direction: &str,
    ) -> Result<Option<TypedValueRecord>, CoreError> {
        get_typed_value(&self.pool, run_id, parameter_name, direction).await
    }

    async fn list_typed_values(
        &self,
        run_id: &str,
        direction: &str,
    ) -> Result<Vec<TypedValueRecord>, CoreError> {
        list_typed_values(&self.pool, run_id, direction).await
    }

    async fn count_typed_values(&self, run_id: &str, direction: &str) -> Result<i64, CoreError> {
        count_typed_values(&self.pool, run_id, direction).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
