// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Output reconciliation.
//!
//! A finished container posts a zip of its output folder together with the
//! run secret. Every archive entry must belong to a declared output and every
//! declared output must be present. Directory outputs arrive as a flat
//! sequence of entries and are rebuilt into one tree per output before they
//! are parsed, persisted and stored.
//!
//! Once the archive has been accepted for processing, any failure leaves the
//! run FAILED before the error is returned.

use std::collections::BTreeMap;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::archive;
use crate::error::CoreError;
use crate::run_handlers::{LoadedRun, RunHandlerState, load_run};
use crate::state_machine::TaskRunState;
use crate::storage::{StorageData, StorageDataEntry, outputs_bucket};
use crate::task_catalog::Parameter;
use crate::types::TypedValue;

fn root_component(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Declared outputs an archive's entries resolve to.
struct OutputMatcher<'a> {
    remaining: Vec<&'a Parameter>,
    directories: Vec<&'a str>,
}

impl<'a> OutputMatcher<'a> {
    fn new(outputs: &'a [Parameter]) -> Self {
        Self {
            remaining: outputs.iter().collect(),
            directories: Vec::new(),
        }
    }

    fn take(&mut self, name: &str) -> Option<&'a Parameter> {
        let index = self.remaining.iter().position(|p| p.name == name)?;
        Some(self.remaining.remove(index))
    }

    /// Resolve an entry to the output it belongs to.
    fn resolve(&mut self, entry: &StorageDataEntry) -> Option<&'a str> {
        // file output
        if let Some(output) = self.take(&entry.name) {
            return Some(output.name.as_str());
        }

        // directory marker of a directory output
        let trimmed = entry.name.trim_end_matches('/');
        if trimmed != entry.name
            && let Some(output) = self.take(trimmed)
        {
            self.directories.push(output.name.as_str());
            return Some(output.name.as_str());
        }

        // content of a directory output, with or without a preceding marker
        let root = root_component(trimmed);
        if root == trimmed {
            return None;
        }
        if let Some(name) = self.directories.iter().find(|d| **d == root) {
            return Some(*name);
        }
        let output = self.take(root)?;
        self.directories.push(output.name.as_str());
        Some(output.name.as_str())
    }

    fn missing(&self) -> Vec<String> {
        self.remaining.iter().map(|p| p.name.clone()).collect()
    }
}

/// Rebuild nested entries into one tree per top-level entry.
///
/// Walks a deepest-first snapshot once. Each entry becomes a tree that adopts
/// every already built tree lying beneath it.
fn compact(entries: Vec<StorageDataEntry>) -> Vec<StorageData> {
    let mut snapshot = StorageData::new();
    for entry in entries {
        snapshot.add(entry);
    }
    snapshot.sort_deep_to_shallow();

    let mut built: Vec<StorageData> = Vec::new();
    for entry in snapshot.entries() {
        let mut tree = StorageData::new();
        tree.add(entry.clone());

        if entry.is_dir() {
            let (children, rest): (Vec<_>, Vec<_>) = built.into_iter().partition(|child| {
                child
                    .peek()
                    .is_some_and(|root| root.name.starts_with(&entry.name))
            });
            for child in children {
                tree.merge(child);
            }
            built = rest;
        }
        built.push(tree);
    }

    for tree in &mut built {
        tree.sort_shallow_to_deep();
    }
    built
}

/// Group compacted trees under the output each belongs to.
fn trees_by_output(trees: Vec<StorageData>) -> BTreeMap<String, StorageData> {
    let mut outputs: BTreeMap<String, StorageData> = BTreeMap::new();
    for tree in trees {
        let Some(root) = tree.peek() else {
            continue;
        };
        let name = root_component(&root.name).to_string();
        let is_root = root.name.trim_end_matches('/') == name;
        match outputs.get_mut(&name) {
            Some(existing) => {
                existing.merge(tree);
                existing.sort_shallow_to_deep();
            }
            None if !is_root => {
                // Content without its directory marker.
                let mut directory = StorageData::directory(name.clone());
                directory.merge(tree);
                directory.sort_shallow_to_deep();
                outputs.insert(name, directory);
            }
            None => {
                outputs.insert(name, tree);
            }
        }
    }
    outputs
}

async fn fail_run(state: &RunHandlerState, run_id: &Uuid, err: CoreError) -> CoreError {
    error!(run_id = %run_id, error = %err, "Output reconciliation failed");
    match state.machine.fail(run_id).await {
        Ok(true) => info!(run_id = %run_id, "Run marked FAILED"),
        Ok(false) => debug!(run_id = %run_id, "Run already terminal"),
        Err(e) => warn!(run_id = %run_id, error = %e, "Failed to mark run FAILED"),
    }
    err
}

async fn store_output(
    state: &RunHandlerState,
    run: &LoadedRun,
    output: &Parameter,
    data: &StorageData,
) -> Result<TypedValue, CoreError> {
    let bound = state.types.bind(&output.ty);
    let value = bound.persist_result(&run.id, &output.name, data).await?;

    state
        .storage
        .put(&outputs_bucket(&run.id), data)
        .await
        .map_err(|e| CoreError::storage(&output.name, e))?;
    debug!(run_id = %run.id, param_name = %output.name, "Output stored");

    Ok(bound.typed_value(&run.id, &output.name, value))
}

/// Accept the output archive of a run.
///
/// On success the run is FINISHED and one DTO per declared output is returned.
///
/// # Errors
///
/// Without any state change:
/// - `Unauthenticated` if `secret` is not the run's secret
/// - `InvalidRunState` unless the run is QUEUING, QUEUED, PENDING or RUNNING
///
/// After marking the run FAILED:
/// - `InvalidArchive` if the archive cannot be read
/// - `UnknownOutput` for the first entry matching no declared output
/// - `MissingOutputs` listing every declared output the archive lacks
/// - `Validation` if an output's content does not parse as its type
/// - `StorageFailure` if an output could not be stored
#[instrument(skip(state, secret, archive_bytes), fields(run_id = %run_id, size = archive_bytes.len()))]
pub async fn reconcile_outputs(
    state: &RunHandlerState,
    run_id: &Uuid,
    secret: &str,
    archive_bytes: &[u8],
) -> Result<Vec<TypedValue>, CoreError> {
    // 1. Authenticate and check the state
    let run = load_run(state, run_id).await?;
    if run.record.secret != secret {
        warn!(run_id = %run_id, "Output archive posted with a wrong secret");
        return Err(CoreError::Unauthenticated {
            run_id: run_id.to_string(),
        });
    }
    if !run.state.is_scheduler_managed() {
        return Err(CoreError::InvalidRunState {
            run_id: run_id.to_string(),
            expected: TaskRunState::Running.to_string(),
            actual: run.state.to_string(),
        });
    }

    // 2. Read and match entries in archive order
    let entries = match archive::read_entries(archive_bytes) {
        Ok(entries) => entries,
        Err(e) => {
            let err = CoreError::InvalidArchive {
                details: e.to_string(),
            };
            return Err(fail_run(state, run_id, err).await);
        }
    };

    let mut matcher = OutputMatcher::new(&run.task.outputs);
    for entry in &entries {
        if matcher.resolve(entry).is_none() {
            let err = CoreError::UnknownOutput {
                entry: entry.name.clone(),
            };
            return Err(fail_run(state, run_id, err).await);
        }
    }

    let missing = matcher.missing();
    if !missing.is_empty() {
        return Err(fail_run(state, run_id, CoreError::MissingOutputs { missing }).await);
    }

    // 3. Rebuild directory outputs
    let mut trees = trees_by_output(compact(entries));

    // 4. Persist and store every declared output
    let mut values = Vec::with_capacity(run.task.outputs.len());
    for output in &run.task.outputs {
        let Some(data) = trees.remove(&output.name) else {
            let err = CoreError::MissingOutputs {
                missing: vec![output.name.clone()],
            };
            return Err(fail_run(state, run_id, err).await);
        };
        match store_output(state, &run, output, &data).await {
            Ok(value) => values.push(value),
            Err(e) => return Err(fail_run(state, run_id, e).await),
        }
    }

    // 5. Finish
    if !state
        .machine
        .transition(run_id, &TaskRunState::SCHEDULER_MANAGED, TaskRunState::Finished)
        .await?
    {
        let actual = state.machine.current(run_id).await?;
        return Err(CoreError::InvalidRunState {
            run_id: run_id.to_string(),
            expected: TaskRunState::Running.to_string(),
            actual: actual.to_string(),
        });
    }

    info!(run_id = %run_id, outputs = values.len(), "Outputs reconciled");
    Ok(values)
}
