// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster scheduler boundary.
//!
//! The scheduler runs a run's container and reports container phases back.
//! Phases travel through the bounded [`PhaseInbox`] so every state change,
//! user- or cluster-originated, goes through the same
//! [`RunStateMachine`](crate::state_machine::RunStateMachine).

pub mod inbox;
pub mod memory;

pub use self::inbox::{PhaseInbox, PhaseSender, phase_channel};
pub use self::memory::InMemoryScheduler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::bundle::Resources;

/// Everything the scheduler needs to start a run's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Run to execute.
    pub run_id: Uuid,
    /// Secret the container presents when posting its outputs.
    pub secret: String,
    /// Qualified image name.
    pub image_name: String,
    /// Folder inputs are mounted at.
    pub input_folder: String,
    /// Folder outputs are collected from.
    pub output_folder: String,
    /// Resource request.
    pub resources: Resources,
    /// Bucket holding the run's inputs.
    pub inputs_bucket: String,
    /// Bucket receiving the run's outputs.
    pub outputs_bucket: String,
}

/// Scheduler acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAck {
    /// Scheduled run.
    pub run_id: Uuid,
    /// Scheduler-side reference (job name, pod name, ...).
    pub reference: String,
}

/// Container phase reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPhase {
    /// Accepted by the cluster.
    Queued,
    /// Waiting for resources or image pull.
    Pending,
    /// Container running.
    Running,
    /// Container exited successfully.
    Succeeded,
    /// Container failed.
    Failed,
}

impl fmt::Display for ContainerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerPhase::Queued => "queued",
            ContainerPhase::Pending => "pending",
            ContainerPhase::Running => "running",
            ContainerPhase::Succeeded => "succeeded",
            ContainerPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A phase notification for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    /// Run the container belongs to.
    pub run_id: Uuid,
    /// Reported phase.
    pub phase: ContainerPhase,
}

/// Errors raised by a [`Scheduler`] or the phase inbox.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler could not be reached.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    /// The scheduler refused the run.
    #[error("scheduler rejected run {run_id}: {reason}")]
    Rejected {
        /// Rejected run.
        run_id: String,
        /// Reason given by the scheduler.
        reason: String,
    },

    /// The phase inbox is no longer accepting events.
    #[error("phase inbox closed")]
    InboxClosed,
}

impl SchedulerError {
    /// The run this error concerns, when known.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            SchedulerError::Rejected { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}

/// Cluster scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Backend identifier for logging.
    fn scheduler_type(&self) -> &'static str;

    /// Attach the inbox container phases are reported to.
    ///
    /// Called once when the runtime starts. Schedulers that never report
    /// phases keep the default.
    fn subscribe(&self, phases: PhaseSender) {
        let _ = phases;
    }

    /// Hand a run to the cluster.
    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduleAck, SchedulerError>;
}
