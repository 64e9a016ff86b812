// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process scheduler for tests and single-node embedding.
//!
//! Records every request. Phases are reported by calling [`InMemoryScheduler::emit`]
//! once a [`PhaseSender`] is attached.

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ContainerPhase, PhaseEvent, PhaseSender, ScheduleAck, ScheduleRequest, Scheduler,
    SchedulerError,
};

/// Scheduler that accepts (or refuses) runs without starting anything.
#[derive(Clone, Default)]
pub struct InMemoryScheduler {
    requests: Arc<Mutex<Vec<ScheduleRequest>>>,
    phases: Arc<OnceLock<PhaseSender>>,
    failing: bool,
}

impl InMemoryScheduler {
    /// Scheduler accepting every run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler refusing every run.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Attach the inbox phases are reported to.
    pub fn with_phases(self, sender: PhaseSender) -> Self {
        self.subscribe(sender);
        self
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<ScheduleRequest> {
        self.requests.lock().await.clone()
    }

    /// Report a container phase for a run.
    pub async fn emit(&self, run_id: Uuid, phase: ContainerPhase) -> Result<(), SchedulerError> {
        let sender = self.phases.get().ok_or(SchedulerError::InboxClosed)?;
        sender.send(PhaseEvent { run_id, phase }).await
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    fn scheduler_type(&self) -> &'static str {
        "memory"
    }

    fn subscribe(&self, phases: PhaseSender) {
        if self.phases.set(phases).is_err() {
            debug!("Phase inbox already attached");
        }
    }

    async fn schedule(&self, request: &ScheduleRequest) -> Result<ScheduleAck, SchedulerError> {
        if self.failing {
            return Err(SchedulerError::Rejected {
                run_id: request.run_id.to_string(),
                reason: "scheduler configured to refuse runs".to_string(),
            });
        }

        self.requests.lock().await.push(request.clone());
        info!(run_id = %request.run_id, image = %request.image_name, "Run scheduled in memory");

        Ok(ScheduleAck {
            run_id: request.run_id,
            reference: format!("memory-{}", request.run_id),
        })
    }
}
