// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for appengine-core.
//!
//! This module provides [`AppEngineRuntime`] which wires the catalog, run
//! handlers and the scheduler phase inbox into an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use appengine_core::persistence::SqlitePersistence;
//! use appengine_core::registry::FileSystemRegistry;
//! use appengine_core::runtime::AppEngineRuntime;
//! use appengine_core::scheduler::InMemoryScheduler;
//! use appengine_core::storage::FileSystemStorage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path("appengine.db").await?);
//!
//!     let runtime = AppEngineRuntime::builder()
//!         .persistence(persistence)
//!         .storage(Arc::new(FileSystemStorage::new(".data/storage")))
//!         .registry(Arc::new(FileSystemRegistry::new(".data/registry")))
//!         .scheduler(Arc::new(InMemoryScheduler::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let tasks = runtime.state().catalog.list().await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::persistence::Persistence;
use crate::registry::Registry;
use crate::run_handlers::RunHandlerState;
use crate::scheduler::{PhaseSender, Scheduler, phase_channel};
use crate::storage::Storage;
use crate::task_catalog::TaskCatalog;
use crate::types::{Charset, TypeRegistry};

/// Default capacity of the phase inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Default maximum size of an uploaded task bundle (2 GiB).
pub const DEFAULT_MAX_BUNDLE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Builder for creating an [`AppEngineRuntime`].
pub struct AppEngineRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    storage: Option<Arc<dyn Storage>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    registry: Option<Arc<dyn Registry>>,
    charset: Charset,
    inbox_capacity: usize,
    max_bundle_size: u64,
}

impl std::fmt::Debug for AppEngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppEngineRuntimeBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("storage", &self.storage.as_ref().map(|s| s.storage_type()))
            .field(
                "scheduler",
                &self.scheduler.as_ref().map(|s| s.scheduler_type()),
            )
            .field("registry", &self.registry.as_ref().map(|_| "..."))
            .field("charset", &self.charset)
            .field("inbox_capacity", &self.inbox_capacity)
            .field("max_bundle_size", &self.max_bundle_size)
            .finish()
    }
}

impl Default for AppEngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            storage: None,
            scheduler: None,
            registry: None,
            charset: Charset::default(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            max_bundle_size: DEFAULT_MAX_BUNDLE_SIZE,
        }
    }
}

impl AppEngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the storage facade (required).
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the cluster scheduler (required).
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the image registry (required).
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the charset of textual values in storage.
    ///
    /// Default: UTF-8
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Set the capacity of the phase inbox.
    ///
    /// Default: 256
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Set the maximum accepted bundle size in bytes.
    ///
    /// Default: 2 GiB
    pub fn max_bundle_size(mut self, bytes: u64) -> Self {
        self.max_bundle_size = bytes;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<AppEngineRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let storage = self
            .storage
            .ok_or_else(|| anyhow::anyhow!("storage is required"))?;
        let scheduler = self
            .scheduler
            .ok_or_else(|| anyhow::anyhow!("scheduler is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        if self.inbox_capacity == 0 {
            return Err(anyhow::anyhow!("inbox capacity must be positive"));
        }

        Ok(AppEngineRuntimeConfig {
            persistence,
            storage,
            scheduler,
            registry,
            charset: self.charset,
            inbox_capacity: self.inbox_capacity,
            max_bundle_size: self.max_bundle_size,
        })
    }
}

/// Configuration for an [`AppEngineRuntime`].
pub struct AppEngineRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    storage: Arc<dyn Storage>,
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<dyn Registry>,
    charset: Charset,
    inbox_capacity: usize,
    max_bundle_size: u64,
}

impl std::fmt::Debug for AppEngineRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppEngineRuntimeConfig")
            .field("persistence", &"...")
            .field("storage", &self.storage.storage_type())
            .field("scheduler", &self.scheduler.scheduler_type())
            .field("charset", &self.charset)
            .field("inbox_capacity", &self.inbox_capacity)
            .field("max_bundle_size", &self.max_bundle_size)
            .finish()
    }
}

impl AppEngineRuntimeConfig {
    /// Start the runtime, spawning the phase inbox worker.
    pub async fn start(self) -> Result<AppEngineRuntime> {
        let types = TypeRegistry::new(self.persistence.clone(), self.charset);
        let catalog = TaskCatalog::new(
            self.persistence.clone(),
            self.storage.clone(),
            self.registry,
            types.clone(),
            self.max_bundle_size,
        );
        let state = RunHandlerState::new(
            self.persistence,
            self.storage,
            self.scheduler,
            catalog,
            types,
        );

        let (phase_sender, inbox) = phase_channel(self.inbox_capacity, state.machine.clone());
        state.scheduler.subscribe(phase_sender.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inbox_handle = tokio::spawn(inbox.run(shutdown_rx));

        info!(
            scheduler = state.scheduler.scheduler_type(),
            storage = state.storage.storage_type(),
            inbox_capacity = self.inbox_capacity,
            "AppEngineRuntime started"
        );

        Ok(AppEngineRuntime {
            inbox_handle,
            shutdown_tx,
            state: Arc::new(state),
            phase_sender,
        })
    }
}

/// A running appengine-core instance that can be embedded in an application.
///
/// The runtime manages:
/// - the shared handler state (catalog, run handlers, state machine)
/// - the phase inbox worker applying scheduler-reported container phases
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct AppEngineRuntime {
    inbox_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<RunHandlerState>,
    phase_sender: PhaseSender,
}

impl AppEngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AppEngineRuntimeBuilder {
        AppEngineRuntimeBuilder::new()
    }

    /// Get a reference to the shared run handler state.
    pub fn state(&self) -> &Arc<RunHandlerState> {
        &self.state
    }

    /// Get a reference to the persistence layer.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.state.persistence
    }

    /// Sender for reporting container phases.
    pub fn phase_sender(&self) -> PhaseSender {
        self.phase_sender.clone()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the phase inbox worker to stop and waits for it to complete.
    pub async fn shutdown(self) -> Result<()> {
        info!("AppEngineRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);

        match self.inbox_handle.await {
            Ok(()) => {
                info!("AppEngineRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Phase inbox task panicked: {}", e);
                Err(anyhow::anyhow!("phase inbox task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.inbox_handle.is_finished()
    }
}
