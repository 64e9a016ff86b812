// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded mailbox carrying scheduler phase events to the state machine.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{PhaseEvent, SchedulerError};
use crate::error::CoreError;
use crate::state_machine::{PhaseOutcome, RunStateMachine};

/// Sending half of the phase inbox, held by scheduler watchers.
#[derive(Clone, Debug)]
pub struct PhaseSender {
    tx: mpsc::Sender<PhaseEvent>,
}

impl PhaseSender {
    /// Queue an event, waiting while the inbox is full.
    pub async fn send(&self, event: PhaseEvent) -> Result<(), SchedulerError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| SchedulerError::InboxClosed)
    }
}

/// Receiving half of the phase inbox.
pub struct PhaseInbox {
    rx: mpsc::Receiver<PhaseEvent>,
    machine: RunStateMachine,
}

/// Create an inbox holding at most `capacity` pending events.
pub fn phase_channel(capacity: usize, machine: RunStateMachine) -> (PhaseSender, PhaseInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PhaseSender { tx }, PhaseInbox { rx, machine })
}

impl PhaseInbox {
    /// Apply one event.
    pub async fn apply(&self, event: PhaseEvent) -> Result<PhaseOutcome, CoreError> {
        self.machine.apply_phase(&event.run_id, event.phase).await
    }

    /// Apply events until shutdown is signalled or every sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Phase inbox started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        debug!("All phase senders dropped");
                        break;
                    };
                    match self.apply(event).await {
                        Ok(outcome) => {
                            debug!(run_id = %event.run_id, phase = %event.phase, ?outcome, "Phase processed");
                        }
                        Err(e) => {
                            warn!(run_id = %event.run_id, phase = %event.phase, error = %e, "Phase event dropped");
                        }
                    }
                }
            }
        }

        info!("Phase inbox stopped");
    }
}
