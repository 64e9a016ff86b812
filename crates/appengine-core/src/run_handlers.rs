// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle handlers for appengine-core.
//!
//! These handlers create runs, move them through their user-driven transitions
//! and read back their provisioned inputs and reconciled outputs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::archive;
use crate::error::CoreError;
use crate::persistence::{Persistence, RunRecord};
use crate::scheduler::{ScheduleRequest, Scheduler};
use crate::state_machine::{RunStateMachine, TaskRunState};
use crate::storage::{Storage, StorageData, inputs_bucket, outputs_bucket};
use crate::task_catalog::{ParameterDirection, Task, TaskCatalog, TaskDescription};
use crate::types::{TypeRegistry, TypedValue};

/// Shared state for run handlers.
///
/// Cloning is cheap; every collaborator is reference counted.
#[derive(Clone)]
pub struct RunHandlerState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Storage facade holding run buckets.
    pub storage: Arc<dyn Storage>,
    /// Cluster scheduler.
    pub scheduler: Arc<dyn Scheduler>,
    /// Task catalog.
    pub catalog: TaskCatalog,
    /// Type factory bound to the persistence and charset.
    pub types: TypeRegistry,
    /// Guarded run state transitions.
    pub machine: RunStateMachine,
    /// Keeps input writes apart from the start claim.
    pub input_gates: Arc<InputGates>,
}

impl RunHandlerState {
    /// Create handler state from its collaborators.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        storage: Arc<dyn Storage>,
        scheduler: Arc<dyn Scheduler>,
        catalog: TaskCatalog,
        types: TypeRegistry,
    ) -> Self {
        let machine = RunStateMachine::new(persistence.clone());
        Self {
            persistence,
            storage,
            scheduler,
            catalog,
            types,
            machine,
            input_gates: Arc::new(InputGates::default()),
        }
    }
}

const INPUT_GATE_STRIPES: usize = 64;

/// Per-run gates serializing input writes against the start claim.
///
/// Provisions hold a run's gate shared while they check the state and write;
/// claiming the run for the scheduler holds it exclusively. Runs share a fixed
/// set of stripes.
#[derive(Debug)]
pub struct InputGates {
    stripes: Vec<RwLock<()>>,
}

impl InputGates {
    /// Gate guarding the inputs of `run_id`.
    pub fn gate(&self, run_id: &Uuid) -> &RwLock<()> {
        let index = (run_id.as_u128() % self.stripes.len() as u128) as usize;
        &self.stripes[index]
    }
}

impl Default for InputGates {
    fn default() -> Self {
        Self {
            stripes: (0..INPUT_GATE_STRIPES).map(|_| RwLock::new(())).collect(),
        }
    }
}

/// How a task is referenced when creating a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelector {
    /// By task UUID.
    Id(Uuid),
    /// By namespace and version.
    Version {
        /// Task namespace.
        namespace: String,
        /// Task version.
        version: String,
    },
}

/// A freshly created run, including its secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// The task the run executes.
    pub task: TaskDescription,
    /// Run UUID.
    pub run_id: Uuid,
    /// Initial state.
    pub state: TaskRunState,
    /// Secret the container presents when posting outputs.
    pub secret: String,
}

/// Run as returned by lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunResponse {
    /// The task the run executes.
    pub task: TaskDescription,
    /// Run UUID.
    pub id: Uuid,
    /// Current state.
    pub state: TaskRunState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Time of the last state change.
    pub last_state_transition_at: DateTime<Utc>,
}

/// Result of a user-requested state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAction {
    /// Always `success`; failures are errors.
    pub status: String,
    /// The run after the change.
    pub resource: TaskRunResponse,
}

/// A run row with its parsed state and task.
pub(crate) struct LoadedRun {
    pub(crate) id: Uuid,
    pub(crate) record: RunRecord,
    pub(crate) state: TaskRunState,
    pub(crate) task: Task,
}

impl LoadedRun {
    fn response(&self) -> TaskRunResponse {
        TaskRunResponse {
            task: self.task.description(),
            id: self.id,
            state: self.state,
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
            last_state_transition_at: self.record.last_state_transition_at,
        }
    }

    fn invalid_state(&self, expected: &str) -> CoreError {
        CoreError::InvalidRunState {
            run_id: self.id.to_string(),
            expected: expected.to_string(),
            actual: self.state.to_string(),
        }
    }
}

pub(crate) async fn load_run(state: &RunHandlerState, run_id: &Uuid) -> Result<LoadedRun, CoreError> {
    let record = state
        .persistence
        .get_run(&run_id.to_string())
        .await?
        .ok_or_else(|| CoreError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
    let run_state = record.state.parse::<TaskRunState>()?;
    let task_id = Uuid::parse_str(&record.task_id).map_err(|e| CoreError::DatabaseError {
        operation: "load_run".to_string(),
        details: format!("invalid task id '{}': {}", record.task_id, e),
    })?;
    let task = state.catalog.get(&task_id).await?;

    Ok(LoadedRun {
        id: *run_id,
        record,
        state: run_state,
        task,
    })
}

// ============================================================================
// Run Creation and Lookup
// ============================================================================

/// Create a run of a task.
///
/// # Errors
///
/// - `TaskNotFound` if the task does not exist
/// - `BundleValidation` if the task declares no inputs
#[instrument(skip(state))]
pub async fn create_run(state: &RunHandlerState, task: TaskSelector) -> Result<TaskRun, CoreError> {
    let task = match &task {
        TaskSelector::Id(id) => state.catalog.get(id).await?,
        TaskSelector::Version { namespace, version } => {
            state.catalog.find(namespace, version).await?
        }
    };

    if task.inputs.is_empty() {
        return Err(CoreError::BundleValidation {
            message: "task has no inputs".to_string(),
        });
    }

    let run_id = Uuid::new_v4();
    let secret = Uuid::new_v4().simple().to_string();
    let now = Utc::now();

    // Buckets first, so a persisted run always has somewhere to write.
    state.storage.create_bucket(&inputs_bucket(&run_id)).await?;
    state.storage.create_bucket(&outputs_bucket(&run_id)).await?;

    state
        .persistence
        .insert_run(&RunRecord {
            id: run_id.to_string(),
            task_id: task.id.to_string(),
            state: TaskRunState::Created.as_str().to_string(),
            secret: secret.clone(),
            created_at: now,
            updated_at: now,
            last_state_transition_at: now,
        })
        .await?;

    info!(run_id = %run_id, task_id = %task.id, "Run created");

    Ok(TaskRun {
        task: task.description(),
        run_id,
        state: TaskRunState::Created,
        secret,
    })
}

/// Look up a run.
#[instrument(skip(state), fields(run_id = %run_id))]
pub async fn retrieve_run(
    state: &RunHandlerState,
    run_id: &Uuid,
) -> Result<TaskRunResponse, CoreError> {
    Ok(load_run(state, run_id).await?.response())
}

// ============================================================================
// User-driven State Changes
// ============================================================================

/// Move a run to `desired`, which must be `PROVISIONED` or `RUNNING`.
///
/// `RUNNING` moves the run to QUEUING and hands it to the scheduler. The
/// returned resource is the run as claimed, in QUEUING; the scheduler's
/// acknowledgment then moves it on to QUEUED.
///
/// # Errors
///
/// - `UnknownState` for any other target, whatever the run's state
/// - `RunNotProvisioned` if inputs are still missing
/// - `InvalidRunState` if the run is past the requested state
/// - `SchedulingFailed` if the scheduler refuses the run (the run is then FAILED)
#[instrument(skip(state), fields(run_id = %run_id))]
pub async fn update_run_state(
    state: &RunHandlerState,
    run_id: &Uuid,
    desired: &str,
) -> Result<StateAction, CoreError> {
    let target = match desired.parse::<TaskRunState>() {
        Ok(target @ (TaskRunState::Provisioned | TaskRunState::Running)) => target,
        _ => {
            return Err(CoreError::UnknownState {
                desired: desired.to_string(),
            });
        }
    };

    let run = load_run(state, run_id).await?;
    let resource = match target {
        TaskRunState::Provisioned => {
            provision_run(state, &run).await?;
            load_run(state, run_id).await?.response()
        }
        _ => start_run(state, &run).await?,
    };

    Ok(StateAction {
        status: "success".to_string(),
        resource,
    })
}

async fn provision_run(state: &RunHandlerState, run: &LoadedRun) -> Result<(), CoreError> {
    if run.state != TaskRunState::Created {
        return Err(run.invalid_state(TaskRunState::Created.as_str()));
    }

    if state
        .machine
        .promote_if_provisioned(&run.id, run.task.inputs.len())
        .await?
    {
        return Ok(());
    }

    // A concurrent provision may have promoted the run in between.
    match state.machine.current(&run.id).await? {
        TaskRunState::Provisioned => Ok(()),
        TaskRunState::Created => Err(CoreError::RunNotProvisioned {
            run_id: run.id.to_string(),
        }),
        other => Err(CoreError::InvalidRunState {
            run_id: run.id.to_string(),
            expected: TaskRunState::Created.to_string(),
            actual: other.to_string(),
        }),
    }
}

async fn start_run(
    state: &RunHandlerState,
    run: &LoadedRun,
) -> Result<TaskRunResponse, CoreError> {
    // 1. Only a provisioned run may start
    match run.state {
        TaskRunState::Provisioned => {}
        TaskRunState::Created => {
            return Err(CoreError::RunNotProvisioned {
                run_id: run.id.to_string(),
            });
        }
        _ => return Err(run.invalid_state(TaskRunState::Provisioned.as_str())),
    }

    // 2. Claim the run before talking to the scheduler
    let gate = state.input_gates.gate(&run.id).write().await;
    let claimed = state
        .machine
        .transition(&run.id, &[TaskRunState::Provisioned], TaskRunState::Queuing)
        .await?;
    drop(gate);
    if !claimed {
        let actual = state.machine.current(&run.id).await?;
        return Err(CoreError::InvalidRunState {
            run_id: run.id.to_string(),
            expected: TaskRunState::Provisioned.to_string(),
            actual: actual.to_string(),
        });
    }
    let resource = load_run(state, &run.id).await?.response();

    // 3. Schedule
    let request = ScheduleRequest {
        run_id: run.id,
        secret: run.record.secret.clone(),
        image_name: run.task.image_name.clone(),
        input_folder: run.task.input_folder.clone(),
        output_folder: run.task.output_folder.clone(),
        resources: run.task.resources.clone(),
        inputs_bucket: inputs_bucket(&run.id),
        outputs_bucket: outputs_bucket(&run.id),
    };

    match state.scheduler.schedule(&request).await {
        Ok(ack) => {
            info!(
                run_id = %run.id,
                scheduler = state.scheduler.scheduler_type(),
                reference = %ack.reference,
                "Run accepted by scheduler"
            );
            // No-op when a phase event already moved the run further.
            state
                .machine
                .transition(&run.id, &[TaskRunState::Queuing], TaskRunState::Queued)
                .await?;
            Ok(resource)
        }
        Err(e) => {
            error!(run_id = %run.id, error = %e, "Scheduling failed");
            state
                .machine
                .transition(&run.id, &[TaskRunState::Queuing], TaskRunState::Failed)
                .await?;
            Err(CoreError::SchedulingFailed {
                run_id: run.id.to_string(),
                details: e.to_string(),
            })
        }
    }
}

// ============================================================================
// Read-back
// ============================================================================

async fn typed_values(
    state: &RunHandlerState,
    run: &LoadedRun,
    direction: ParameterDirection,
) -> Result<Vec<TypedValue>, CoreError> {
    let records = state
        .persistence
        .list_typed_values(&run.id.to_string(), direction.as_str())
        .await?;

    let mut values = Vec::with_capacity(records.len());
    for record in &records {
        let Some(parameter) = run.task.parameter(&record.parameter_name, direction) else {
            warn!(
                run_id = %run.id,
                param_name = %record.parameter_name,
                "Stored value has no declared parameter"
            );
            continue;
        };
        values.push(
            state
                .types
                .bind(&parameter.ty)
                .build_value_from_record(&run.id, record),
        );
    }
    Ok(values)
}

/// Provisioned inputs of a run.
///
/// # Errors
///
/// `InvalidRunState` while the run is still CREATED.
#[instrument(skip(state), fields(run_id = %run_id))]
pub async fn retrieve_run_inputs(
    state: &RunHandlerState,
    run_id: &Uuid,
) -> Result<Vec<TypedValue>, CoreError> {
    let run = load_run(state, run_id).await?;
    if run.state == TaskRunState::Created {
        return Err(run.invalid_state(TaskRunState::Provisioned.as_str()));
    }
    typed_values(state, &run, ParameterDirection::Input).await
}

/// Reconciled outputs of a finished run.
#[instrument(skip(state), fields(run_id = %run_id))]
pub async fn retrieve_run_outputs(
    state: &RunHandlerState,
    run_id: &Uuid,
) -> Result<Vec<TypedValue>, CoreError> {
    let run = load_run(state, run_id).await?;
    if run.state != TaskRunState::Finished {
        return Err(run.invalid_state(TaskRunState::Finished.as_str()));
    }
    typed_values(state, &run, ParameterDirection::Output).await
}

async fn zip_bucket(state: &RunHandlerState, bucket: &str) -> Result<Vec<u8>, CoreError> {
    let data = state.storage.list(bucket).await?;
    archive::write(&data).map_err(|e| CoreError::StorageFailure {
        param_name: None,
        details: e.to_string(),
    })
}

/// Zip of every provisioned input.
///
/// # Errors
///
/// - `InvalidRunState` while the run is still CREATED
/// - `ParameterNotFound` if nothing was provisioned
#[instrument(skip(state), fields(run_id = %run_id))]
pub async fn retrieve_inputs_archive(
    state: &RunHandlerState,
    run_id: &Uuid,
) -> Result<Vec<u8>, CoreError> {
    let run = load_run(state, run_id).await?;
    if run.state == TaskRunState::Created {
        return Err(run.invalid_state(TaskRunState::Provisioned.as_str()));
    }

    let provisioned = state
        .persistence
        .count_typed_values(&run_id.to_string(), ParameterDirection::Input.as_str())
        .await?;
    if provisioned == 0 {
        return Err(CoreError::ParameterNotFound {
            param_name: "no provisions".to_string(),
        });
    }

    zip_bucket(state, &inputs_bucket(run_id)).await
}

/// Zip of every output of a finished run.
#[instrument(skip(state), fields(run_id = %run_id))]
pub async fn retrieve_outputs_archive(
    state: &RunHandlerState,
    run_id: &Uuid,
) -> Result<Vec<u8>, CoreError> {
    let run = load_run(state, run_id).await?;
    if run.state != TaskRunState::Finished {
        return Err(run.invalid_state(TaskRunState::Finished.as_str()));
    }
    zip_bucket(state, &outputs_bucket(run_id)).await
}

/// Stored content of one input or output.
///
/// A file parameter returns its bytes; a directory parameter (arrays, WSI
/// pyramids) returns a zip of its subtree.
#[instrument(skip(state), fields(run_id = %run_id, param_name = %param_name))]
pub async fn retrieve_single_io(
    state: &RunHandlerState,
    run_id: &Uuid,
    param_name: &str,
    direction: ParameterDirection,
) -> Result<Vec<u8>, CoreError> {
    let run = load_run(state, run_id).await?;
    if run.task.parameter(param_name, direction).is_none() {
        return Err(CoreError::ParameterNotFound {
            param_name: param_name.to_string(),
        });
    }

    let bucket = match direction {
        ParameterDirection::Input => inputs_bucket(run_id),
        ParameterDirection::Output => outputs_bucket(run_id),
    };
    let data: StorageData = state
        .storage
        .get(&bucket, param_name)
        .await
        .map_err(|e| CoreError::storage(param_name, e))?;

    match data.peek() {
        Some(entry) if entry.is_dir() => {
            archive::write(&data).map_err(|e| CoreError::storage(param_name, e))
        }
        _ => Ok(data.file_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::fixtures::{SUM_DESCRIPTOR, bundle};
    use crate::persistence::SqlitePersistence;
    use crate::registry::FileSystemRegistry;
    use crate::scheduler::InMemoryScheduler;
    use crate::storage::MemoryStorage;
    use crate::types::Charset;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn handler_state(scheduler: InMemoryScheduler) -> (RunHandlerState, TaskDescription, tempfile::TempDir) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrations::run_sqlite(&pool).await.unwrap();
        let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::new(pool));
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let registry_dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FileSystemRegistry::new(registry_dir.path()));
        let types = TypeRegistry::new(persistence.clone(), Charset::Utf8);
        let catalog = TaskCatalog::new(
            persistence.clone(),
            storage.clone(),
            registry,
            types.clone(),
            1 << 20,
        );
        let task = catalog
            .upload(&bundle(SUM_DESCRIPTOR, Some("image.tar")))
            .await
            .unwrap();
        let state = RunHandlerState::new(persistence, storage, Arc::new(scheduler), catalog, types);
        (state, task, registry_dir)
    }

    #[tokio::test]
    async fn test_create_run_by_version() {
        let (state, task, _dir) = handler_state(InMemoryScheduler::new()).await;
        let run = create_run(
            &state,
            TaskSelector::Version {
                namespace: "com.example.sum".to_string(),
                version: "1.0.0".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(run.task.id, task.id);
        assert_eq!(run.state, TaskRunState::Created);
        assert!(!run.secret.is_empty());
        assert!(state.storage.exists(&inputs_bucket(&run.run_id)).await.unwrap());
        assert!(state.storage.exists(&outputs_bucket(&run.run_id)).await.unwrap());

        let response = retrieve_run(&state, &run.run_id).await.unwrap();
        assert_eq!(response.state, TaskRunState::Created);
        assert_eq!(response.task.namespace, "com.example.sum");
    }

    #[tokio::test]
    async fn test_create_run_for_missing_task() {
        let (state, _, _dir) = handler_state(InMemoryScheduler::new()).await;
        let err = create_run(&state, TaskSelector::Id(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_target_state() {
        let (state, task, _dir) = handler_state(InMemoryScheduler::new()).await;
        let run = create_run(&state, TaskSelector::Id(task.id)).await.unwrap();

        for desired in ["PAUSED", "FINISHED", "queued", ""] {
            let err = update_run_state(&state, &run.run_id, desired)
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "UNKNOWN_STATE", "{}", desired);
        }
        // Rejected before the run is even looked up.
        let err = update_run_state(&state, &Uuid::new_v4(), "PAUSED")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_STATE");
    }

    #[tokio::test]
    async fn test_running_requires_provisioned() {
        let scheduler = InMemoryScheduler::new();
        let (state, task, _dir) = handler_state(scheduler.clone()).await;
        let run = create_run(&state, TaskSelector::Id(task.id)).await.unwrap();

        let err = update_run_state(&state, &run.run_id, "RUNNING")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RUN_NOT_PROVISIONED");
        assert_eq!(
            retrieve_run(&state, &run.run_id).await.unwrap().state,
            TaskRunState::Created
        );
        assert!(scheduler.requests().await.is_empty());

        let err = update_run_state(&state, &run.run_id, "PROVISIONED")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RUN_NOT_PROVISIONED");
    }

    #[tokio::test]
    async fn test_read_back_rejected_while_created() {
        let (state, task, _dir) = handler_state(InMemoryScheduler::new()).await;
        let run = create_run(&state, TaskSelector::Id(task.id)).await.unwrap();

        let err = retrieve_run_inputs(&state, &run.run_id).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RUN_STATE");
        let err = retrieve_inputs_archive(&state, &run.run_id).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RUN_STATE");
        let err = retrieve_run_outputs(&state, &run.run_id).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RUN_STATE");
        let err = retrieve_outputs_archive(&state, &run.run_id).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RUN_STATE");
    }

    #[tokio::test]
    async fn test_single_io_for_undeclared_parameter() {
        let (state, task, _dir) = handler_state(InMemoryScheduler::new()).await;
        let run = create_run(&state, TaskSelector::Id(task.id)).await.unwrap();

        let err = retrieve_single_io(&state, &run.run_id, "c", ParameterDirection::Input)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PARAMETER_NOT_FOUND");

        let err = retrieve_single_io(&state, &run.run_id, "a", ParameterDirection::Input)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_FAILURE");
        assert_eq!(err.param_name(), Some("a"));
    }
}
