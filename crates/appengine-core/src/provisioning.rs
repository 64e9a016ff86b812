// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Input provisioning.
//!
//! Validation is a pure step ([`validate_all`]) that produces everything the
//! commit step needs. Nothing is written until every item of a request has
//! passed it. Commit writes storage first and the typed-value row second, so a
//! row never points at bytes that failed to land.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::run_handlers::{LoadedRun, RunHandlerState, load_run};
use crate::state_machine::TaskRunState;
use crate::storage::{StorageData, inputs_bucket};
use crate::task_catalog::{Parameter, Task};
use crate::types::TypeRegistry;

/// One `{param_name, value}` provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Declared input name.
    pub param_name: String,
    /// Value in the parameter kind's JSON form.
    pub value: Value,
}

impl ProvisionRequest {
    /// Create a provision request.
    pub fn new(param_name: impl Into<String>, value: Value) -> Self {
        Self {
            param_name: param_name.into(),
            value,
        }
    }
}

/// A provision that passed validation, ready to commit.
#[derive(Debug)]
pub struct ValidatedProvision<'a> {
    /// Declared input it targets.
    pub parameter: &'a Parameter,
    /// Provided value.
    pub value: &'a Value,
    /// Storage form of the value.
    pub data: StorageData,
}

/// Validate one request against the task's declared inputs.
pub fn validate<'a>(
    task: &'a Task,
    types: &TypeRegistry,
    request: &'a ProvisionRequest,
) -> Result<ValidatedProvision<'a>, CoreError> {
    let parameter = task
        .input(&request.param_name)
        .ok_or_else(|| CoreError::ParameterNotFound {
            param_name: request.param_name.clone(),
        })?;
    let bound = types.bind(&parameter.ty);
    let invalid = |error| CoreError::Validation {
        param_name: parameter.name.clone(),
        error,
    };

    bound
        .validate(&request.value, parameter.optional)
        .map_err(invalid)?;
    let data = bound
        .map_to_storage(&parameter.name, &request.value)
        .map_err(invalid)?;

    Ok(ValidatedProvision {
        parameter,
        value: &request.value,
        data,
    })
}

/// Validate every request, one result per request, in order.
///
/// Pure: reads nothing and writes nothing.
pub fn validate_all<'a>(
    task: &'a Task,
    types: &TypeRegistry,
    requests: &'a [ProvisionRequest],
) -> Vec<Result<ValidatedProvision<'a>, CoreError>> {
    requests
        .iter()
        .map(|request| validate(task, types, request))
        .collect()
}

fn check_provisionable(run: &LoadedRun) -> Result<(), CoreError> {
    match run.state {
        TaskRunState::Created | TaskRunState::Provisioned => Ok(()),
        other => Err(CoreError::InvalidRunState {
            run_id: run.id.to_string(),
            expected: TaskRunState::Created.to_string(),
            actual: other.to_string(),
        }),
    }
}

async fn commit(
    state: &RunHandlerState,
    run_id: &Uuid,
    item: &ValidatedProvision<'_>,
) -> Result<(), CoreError> {
    let name = &item.parameter.name;
    state
        .storage
        .put(&inputs_bucket(run_id), &item.data)
        .await
        .map_err(|e| CoreError::storage(name, e))?;
    debug!(run_id = %run_id, param_name = %name, "Provision stored");

    state
        .types
        .bind(&item.parameter.ty)
        .persist_provision(run_id, name, item.value)
        .await
}

async fn promote(state: &RunHandlerState, run: &LoadedRun) -> Result<(), CoreError> {
    state
        .machine
        .promote_if_provisioned(&run.id, run.task.inputs.len())
        .await?;
    Ok(())
}

/// Provision a single input.
///
/// Returns the acknowledgment `{param_name, task_run_id[, value]}`. The run
/// becomes PROVISIONED once every declared input has a value.
///
/// # Errors
///
/// - `RunNotFound` / `ParameterNotFound` for unknown references
/// - `Validation` if the type rejects the value
/// - `StorageFailure` if the value could not be stored
#[instrument(skip(state, request), fields(run_id = %run_id, param_name = %request.param_name))]
pub async fn provision_one(
    state: &RunHandlerState,
    run_id: &Uuid,
    request: &ProvisionRequest,
) -> Result<Value, CoreError> {
    let _gate = state.input_gates.gate(run_id).read().await;
    let run = load_run(state, run_id).await?;
    check_provisionable(&run)?;

    let item = validate(&run.task, &state.types, request)?;
    commit(state, run_id, &item).await?;
    info!(run_id = %run_id, param_name = %request.param_name, "Input provisioned");

    promote(state, &run).await?;

    Ok(state
        .types
        .bind(&item.parameter.ty)
        .create_typed_parameter_response(run_id, &item.parameter.name, item.value))
}

/// Provision a binary input (file, image, WSI) from raw bytes.
#[instrument(skip(state, bytes), fields(run_id = %run_id, size = bytes.len()))]
pub async fn provision_bytes(
    state: &RunHandlerState,
    run_id: &Uuid,
    param_name: &str,
    bytes: &[u8],
) -> Result<Value, CoreError> {
    let request = ProvisionRequest::new(param_name, Value::String(STANDARD.encode(bytes)));
    provision_one(state, run_id, &request).await
}

/// Provision several inputs at once.
///
/// Every item is validated before anything is written; a single invalid item
/// rejects the whole batch. Storage failures during the commit are collected
/// and reported together; items already written stay written.
///
/// # Errors
///
/// `Batch` holding one error per failed item.
#[instrument(skip(state, requests), fields(run_id = %run_id, items = requests.len()))]
pub async fn provision_many(
    state: &RunHandlerState,
    run_id: &Uuid,
    requests: &[ProvisionRequest],
) -> Result<Vec<Value>, CoreError> {
    let _gate = state.input_gates.gate(run_id).read().await;
    let run = load_run(state, run_id).await?;
    check_provisionable(&run)?;

    // Phase 1: validate everything, write nothing
    let mut validated = Vec::with_capacity(requests.len());
    let mut errors = Vec::new();
    for result in validate_all(&run.task, &state.types, requests) {
        match result {
            Ok(item) => validated.push(item),
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        warn!(run_id = %run_id, failed = errors.len(), "Provision batch rejected");
        return Err(CoreError::Batch { errors });
    }

    // Phase 2: commit
    let mut responses = Vec::with_capacity(validated.len());
    for item in &validated {
        match commit(state, run_id, item).await {
            Ok(()) => responses.push(
                state
                    .types
                    .bind(&item.parameter.ty)
                    .create_typed_parameter_response(run_id, &item.parameter.name, item.value),
            ),
            Err(e) => {
                warn!(run_id = %run_id, param_name = %item.parameter.name, error = %e, "Provision commit failed");
                errors.push(e);
            }
        }
    }
    if !errors.is_empty() {
        return Err(CoreError::Batch { errors });
    }
    info!(run_id = %run_id, items = responses.len(), "Inputs provisioned");

    promote(state, &run).await?;
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::fixtures::{SUM_DESCRIPTOR, bundle};
    use crate::persistence::{Persistence, SqlitePersistence};
    use crate::registry::FileSystemRegistry;
    use crate::run_handlers::{TaskSelector, create_run, retrieve_run, update_run_state};
    use crate::scheduler::InMemoryScheduler;
    use crate::storage::{MemoryStorage, Storage};
    use crate::task_catalog::TaskCatalog;
    use crate::types::Charset;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    struct Fixture {
        state: RunHandlerState,
        storage: Arc<MemoryStorage>,
        run_id: Uuid,
        _registry: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrations::run_sqlite(&pool).await.unwrap();
        let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::new(pool));
        let storage = Arc::new(MemoryStorage::new());
        let registry = tempfile::tempdir().unwrap();
        let types = TypeRegistry::new(persistence.clone(), Charset::Utf8);
        let catalog = TaskCatalog::new(
            persistence.clone(),
            storage.clone(),
            Arc::new(FileSystemRegistry::new(registry.path())),
            types.clone(),
            1 << 20,
        );
        let task = catalog
            .upload(&bundle(SUM_DESCRIPTOR, Some("image.tar")))
            .await
            .unwrap();
        let state = RunHandlerState::new(
            persistence,
            storage.clone(),
            Arc::new(InMemoryScheduler::new()),
            catalog,
            types,
        );
        let run = create_run(&state, TaskSelector::Id(task.id)).await.unwrap();
        Fixture {
            state,
            storage,
            run_id: run.run_id,
            _registry: registry,
        }
    }

    async fn input_rows(fixture: &Fixture) -> i64 {
        fixture
            .state
            .persistence
            .count_typed_values(&fixture.run_id.to_string(), "INPUT")
            .await
            .unwrap()
    }

    async fn run_state(fixture: &Fixture) -> TaskRunState {
        retrieve_run(&fixture.state, &fixture.run_id)
            .await
            .unwrap()
            .state
    }

    #[tokio::test]
    async fn test_validate_all_reports_every_item() {
        let fixture = fixture().await;
        let task = fixture.state.catalog.find("com.example.sum", "1.0.0").await.unwrap();
        let requests = vec![
            ProvisionRequest::new("a", json!(1)),
            ProvisionRequest::new("b", json!(1000)),
            ProvisionRequest::new("c", json!(1)),
        ];

        let results = validate_all(&task, &fixture.state.types, &requests);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.to_error_response().details.validation_code.as_deref(), Some("LT_VIOLATION"));
        assert_eq!(results[2].as_ref().unwrap_err().error_code(), "PARAMETER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_provision_one_promotes_after_last_input() {
        let fixture = fixture().await;

        let ack = provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new("a", json!(250)))
            .await
            .unwrap();
        assert_eq!(ack["param_name"], json!("a"));
        assert_eq!(ack["value"], json!(250));
        assert_eq!(run_state(&fixture).await, TaskRunState::Created);

        provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new("b", json!(250)))
            .await
            .unwrap();
        assert_eq!(run_state(&fixture).await, TaskRunState::Provisioned);

        let stored = fixture
            .storage
            .get(&inputs_bucket(&fixture.run_id), "a")
            .await
            .unwrap();
        assert_eq!(stored.file_bytes(), b"250");
    }

    #[tokio::test]
    async fn test_reprovision_overwrites() {
        let fixture = fixture().await;
        for value in [1, 2] {
            provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new("a", json!(value)))
                .await
                .unwrap();
        }
        assert_eq!(input_rows(&fixture).await, 1);
        assert_eq!(run_state(&fixture).await, TaskRunState::Created);

        let row = fixture
            .state
            .persistence
            .get_typed_value(&fixture.run_id.to_string(), "a", "INPUT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.integer_value, Some(2));
    }

    #[tokio::test]
    async fn test_invalid_value_writes_nothing() {
        let fixture = fixture().await;
        let err = provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new("b", json!(1000)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.param_name(), Some("b"));
        assert_eq!(input_rows(&fixture).await, 0);

        let err = provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new("zzz", json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PARAMETER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_batch_is_atomic_on_validation() {
        let fixture = fixture().await;
        let err = provision_many(
            &fixture.state,
            &fixture.run_id,
            &[
                ProvisionRequest::new("a", json!(1)),
                ProvisionRequest::new("b", json!("two")),
            ],
        )
        .await
        .unwrap_err();

        match &err {
            CoreError::Batch { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].param_name(), Some("b"));
            }
            other => panic!("expected batch error, got {:?}", other),
        }
        assert_eq!(input_rows(&fixture).await, 0);
        assert!(
            fixture
                .storage
                .get(&inputs_bucket(&fixture.run_id), "a")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_batch_promotes() {
        let fixture = fixture().await;
        let acks = provision_many(
            &fixture.state,
            &fixture.run_id,
            &[
                ProvisionRequest::new("a", json!(1)),
                ProvisionRequest::new("b", json!(2)),
            ],
        )
        .await
        .unwrap();
        assert_eq!(acks.len(), 2);
        assert_eq!(run_state(&fixture).await, TaskRunState::Provisioned);
    }

    #[tokio::test]
    async fn test_storage_failures_are_collected() {
        let fixture = fixture().await;
        fixture.storage.set_fail_writes(true);

        let err = provision_many(
            &fixture.state,
            &fixture.run_id,
            &[
                ProvisionRequest::new("a", json!(1)),
                ProvisionRequest::new("b", json!(2)),
            ],
        )
        .await
        .unwrap_err();
        match err {
            CoreError::Batch { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().all(|e| e.error_code() == "STORAGE_FAILURE"));
            }
            other => panic!("expected batch error, got {:?}", other),
        }
        assert_eq!(input_rows(&fixture).await, 0);
        assert_eq!(run_state(&fixture).await, TaskRunState::Created);
    }

    #[tokio::test]
    async fn test_start_claim_waits_for_inflight_provision() {
        let fixture = fixture().await;
        for (name, value) in [("a", 1), ("b", 2)] {
            provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new(name, json!(value)))
                .await
                .unwrap();
        }

        let inflight = fixture.state.input_gates.gate(&fixture.run_id).read().await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            update_run_state(&fixture.state, &fixture.run_id, "RUNNING"),
        )
        .await;
        assert!(blocked.is_err());
        assert_eq!(run_state(&fixture).await, TaskRunState::Provisioned);
        drop(inflight);

        let action = update_run_state(&fixture.state, &fixture.run_id, "RUNNING")
            .await
            .unwrap();
        assert_eq!(action.resource.state, TaskRunState::Queuing);

        let err = provision_one(&fixture.state, &fixture.run_id, &ProvisionRequest::new("a", json!(9)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RUN_STATE");
    }
}
