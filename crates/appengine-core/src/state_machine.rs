// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle states and guarded transitions.
//!
//! Every state change is a compare-and-swap on the run row: the write applies
//! only while the run is still in one of the expected source states. FINISHED
//! and FAILED never appear as a source, which keeps them sticky.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::CoreError;
use crate::persistence::Persistence;
use crate::scheduler::ContainerPhase;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskRunState {
    /// Created, waiting for inputs.
    Created,
    /// Every input provisioned.
    Provisioned,
    /// Being handed to the scheduler.
    Queuing,
    /// Accepted by the scheduler.
    Queued,
    /// Container waiting to start.
    Pending,
    /// Container running.
    Running,
    /// Outputs reconciled.
    Finished,
    /// Run failed.
    Failed,
}

impl TaskRunState {
    /// States that accept an output archive.
    pub const SCHEDULER_MANAGED: [TaskRunState; 4] = [
        TaskRunState::Queuing,
        TaskRunState::Queued,
        TaskRunState::Pending,
        TaskRunState::Running,
    ];

    /// Every state with outgoing transitions.
    pub const NON_TERMINAL: [TaskRunState; 6] = [
        TaskRunState::Created,
        TaskRunState::Provisioned,
        TaskRunState::Queuing,
        TaskRunState::Queued,
        TaskRunState::Pending,
        TaskRunState::Running,
    ];

    /// Persisted form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunState::Created => "CREATED",
            TaskRunState::Provisioned => "PROVISIONED",
            TaskRunState::Queuing => "QUEUING",
            TaskRunState::Queued => "QUEUED",
            TaskRunState::Pending => "PENDING",
            TaskRunState::Running => "RUNNING",
            TaskRunState::Finished => "FINISHED",
            TaskRunState::Failed => "FAILED",
        }
    }

    /// FINISHED or FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskRunState::Finished | TaskRunState::Failed)
    }

    /// QUEUING, QUEUED, PENDING or RUNNING.
    pub fn is_scheduler_managed(&self) -> bool {
        Self::SCHEDULER_MANAGED.contains(self)
    }

    /// Position among the scheduler-managed states.
    pub fn rank(&self) -> Option<u8> {
        match self {
            TaskRunState::Queuing => Some(0),
            TaskRunState::Queued => Some(1),
            TaskRunState::Pending => Some(2),
            TaskRunState::Running => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for TaskRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskRunState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "CREATED" => TaskRunState::Created,
            "PROVISIONED" => TaskRunState::Provisioned,
            "QUEUING" => TaskRunState::Queuing,
            "QUEUED" => TaskRunState::Queued,
            "PENDING" => TaskRunState::Pending,
            "RUNNING" => TaskRunState::Running,
            "FINISHED" => TaskRunState::Finished,
            "FAILED" => TaskRunState::Failed,
            other => {
                return Err(CoreError::UnknownState {
                    desired: other.to_string(),
                });
            }
        };
        Ok(state)
    }
}

/// Target state of a container phase and the states it may be applied from.
///
/// Sources only ever rank below the target, so phases cannot move a run backwards.
fn phase_rule(phase: ContainerPhase) -> (TaskRunState, &'static [TaskRunState]) {
    use TaskRunState::*;
    match phase {
        ContainerPhase::Queued => (Queued, &[Queuing]),
        ContainerPhase::Pending => (Pending, &[Queuing, Queued]),
        ContainerPhase::Running | ContainerPhase::Succeeded => {
            (Running, &[Queuing, Queued, Pending])
        }
        ContainerPhase::Failed => (Failed, &TaskRunState::NON_TERMINAL),
    }
}

/// Result of applying a container phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The run moved to this state.
    Applied(TaskRunState),
    /// The phase did not apply to the run's current state.
    Ignored(TaskRunState),
}

/// Guarded state changes over the run rows.
#[derive(Clone)]
pub struct RunStateMachine {
    persistence: Arc<dyn Persistence>,
}

impl RunStateMachine {
    /// Create a state machine writing through `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Current state of a run.
    pub async fn current(&self, run_id: &Uuid) -> Result<TaskRunState, CoreError> {
        let run = self
            .persistence
            .get_run(&run_id.to_string())
            .await?
            .ok_or_else(|| CoreError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        run.state.parse().map_err(|_| CoreError::DatabaseError {
            operation: "read_state".to_string(),
            details: format!("run '{}' has unrecognized state '{}'", run_id, run.state),
        })
    }

    /// Move the run to `to` if it is currently in one of `from`.
    ///
    /// Returns whether the run moved.
    pub async fn transition(
        &self,
        run_id: &Uuid,
        from: &[TaskRunState],
        to: TaskRunState,
    ) -> Result<bool, CoreError> {
        let sources: Vec<&str> = from
            .iter()
            .filter(|state| !state.is_terminal())
            .map(TaskRunState::as_str)
            .collect();
        let moved = self
            .persistence
            .transition_run_state(&run_id.to_string(), &sources, to.as_str())
            .await?;

        if moved {
            info!(run_id = %run_id, state = %to, "Run state changed");
        } else {
            debug!(run_id = %run_id, target = %to, "Run state unchanged, guard not met");
        }
        Ok(moved)
    }

    /// Mark a non-terminal run as FAILED.
    pub async fn fail(&self, run_id: &Uuid) -> Result<bool, CoreError> {
        self.transition(run_id, &TaskRunState::NON_TERMINAL, TaskRunState::Failed)
            .await
    }

    /// CREATED → PROVISIONED once `declared_inputs` INPUT rows exist.
    pub async fn promote_if_provisioned(
        &self,
        run_id: &Uuid,
        declared_inputs: usize,
    ) -> Result<bool, CoreError> {
        let promoted = self
            .persistence
            .promote_run_if_inputs_complete(
                &run_id.to_string(),
                TaskRunState::Created.as_str(),
                TaskRunState::Provisioned.as_str(),
                declared_inputs as i64,
            )
            .await?;
        if promoted {
            info!(run_id = %run_id, state = %TaskRunState::Provisioned, "Run state changed");
        }
        Ok(promoted)
    }

    /// Apply a container phase reported by the scheduler.
    ///
    /// Phases arriving for terminal runs, or that would move a run backwards,
    /// are ignored.
    pub async fn apply_phase(
        &self,
        run_id: &Uuid,
        phase: ContainerPhase,
    ) -> Result<PhaseOutcome, CoreError> {
        let (target, sources) = phase_rule(phase);
        if self.transition(run_id, sources, target).await? {
            return Ok(PhaseOutcome::Applied(target));
        }

        let current = self.current(run_id).await?;
        debug!(run_id = %run_id, phase = %phase, state = %current, "Phase ignored");
        Ok(PhaseOutcome::Ignored(current))
    }
}
