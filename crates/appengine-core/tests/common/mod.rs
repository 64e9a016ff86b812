// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for appengine-core integration tests.
//!
//! Provides TestContext for setting up persistence, storage, registry and a
//! started runtime.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use serde_json::Value;
use uuid::Uuid;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use appengine_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use appengine_core::registry::FileSystemRegistry;
use appengine_core::provisioning::{ProvisionRequest, provision_one};
use appengine_core::run_handlers::{
    RunHandlerState, TaskRun, TaskSelector, create_run, retrieve_run, update_run_state,
};
use appengine_core::runtime::AppEngineRuntime;
use appengine_core::scheduler::{InMemoryScheduler, Scheduler};
use appengine_core::state_machine::TaskRunState;
use appengine_core::storage::FileSystemStorage;
use appengine_core::task_catalog::TaskDescription;

pub const SUM_DESCRIPTOR: &str = r#"
name: Integers addition
namespace: com.example.sum
version: 1.0.0
authors:
  - first_name: Ada
    last_name: Lovelace
    organization: Example
    email: ada@example.com
    is_contact: true
configuration:
  input_folder: /inputs
  output_folder: /outputs
inputs:
  a:
    type: integer
  b:
    type:
      id: integer
      lt: 1000
outputs:
  sum:
    type: integer
"#;

pub const SPLIT_DESCRIPTOR: &str = r#"
name: Split digits
namespace: com.example.split
version: 2.1.0
authors:
  - first_name: Grace
    last_name: Hopper
    organization: Example
    email: grace@example.com
    is_contact: true
inputs:
  number:
    type: integer
  attachment:
    optional: true
    type: file
outputs:
  digits:
    type:
      id: array
      subtype: integer
  label:
    type: string
"#;

/// Zip `(name, content)` pairs in order. Names ending in `/` become directories.
pub fn zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut writer = ZipWriter::new(Cursor::new(&mut buffer));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }
    buffer
}

/// A task bundle holding `descriptor` and an image at the default path.
pub fn bundle(descriptor: &str) -> Vec<u8> {
    zip(&[
        ("descriptor.yml", descriptor),
        ("image.tar", "layers"),
    ])
}

/// Test context holding a started runtime over temporary directories.
pub struct TestContext {
    pub runtime: AppEngineRuntime,
    pub scheduler: InMemoryScheduler,
    pub storage_dir: TempDir,
    pub registry_dir: TempDir,
}

impl TestContext {
    /// Runtime over in-memory SQLite.
    pub async fn new() -> Self {
        Self::with_scheduler(InMemoryScheduler::new()).await
    }

    /// Runtime over in-memory SQLite with the given scheduler.
    pub async fn with_scheduler(scheduler: InMemoryScheduler) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open SQLite");
        appengine_core::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to migrate SQLite");
        Self::launch(Arc::new(SqlitePersistence::new(pool)), scheduler).await
    }

    /// Runtime over the PostgreSQL database at TEST_DATABASE_URL.
    pub async fn postgres() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = sqlx::PgPool::connect(&database_url).await.ok()?;
        appengine_core::migrations::run_postgres(&pool).await.ok()?;
        Some(Self::launch(Arc::new(PostgresPersistence::new(pool)), InMemoryScheduler::new()).await)
    }

    async fn launch(persistence: Arc<dyn Persistence>, scheduler: InMemoryScheduler) -> Self {
        let storage_dir = tempfile::tempdir().expect("Failed to create storage dir");
        let registry_dir = tempfile::tempdir().expect("Failed to create registry dir");
        let shared: Arc<dyn Scheduler> = Arc::new(scheduler.clone());

        let runtime = AppEngineRuntime::builder()
            .persistence(persistence)
            .storage(Arc::new(FileSystemStorage::new(storage_dir.path())))
            .registry(Arc::new(FileSystemRegistry::new(registry_dir.path())))
            .scheduler(shared)
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        Self {
            runtime,
            scheduler,
            storage_dir,
            registry_dir,
        }
    }

    pub fn state(&self) -> &RunHandlerState {
        self.runtime.state()
    }

    /// Upload a descriptor, making the version unique per call.
    pub async fn upload(&self, descriptor: &str) -> TaskDescription {
        let unique = format!("version: \"1.0.0-{}\"", Uuid::new_v4().simple());
        let descriptor = descriptor
            .lines()
            .map(|line| if line.starts_with("version:") { unique.as_str() } else { line })
            .collect::<Vec<_>>()
            .join("\n");
        self.state()
            .catalog
            .upload(&bundle(&descriptor))
            .await
            .expect("Failed to upload task")
    }

    /// Upload a descriptor and create a run of it.
    pub async fn run_of(&self, descriptor: &str) -> TaskRun {
        let task = self.upload(descriptor).await;
        create_run(self.state(), TaskSelector::Id(task.id))
            .await
            .expect("Failed to create run")
    }

    /// Provision one input, panicking on failure.
    pub async fn provision(&self, run_id: &Uuid, name: &str, value: Value) {
        provision_one(self.state(), run_id, &ProvisionRequest::new(name, value))
            .await
            .expect("Failed to provision input");
    }

    /// Request RUNNING for a provisioned run.
    pub async fn start(&self, run_id: &Uuid) -> TaskRunState {
        update_run_state(self.state(), run_id, "RUNNING")
            .await
            .expect("Failed to start run")
            .resource
            .state
    }

    pub async fn run_state(&self, run_id: &Uuid) -> TaskRunState {
        retrieve_run(self.state(), run_id)
            .await
            .expect("Failed to retrieve run")
            .state
    }

    /// Poll until the run reaches `expected`.
    pub async fn wait_for_state(&self, run_id: &Uuid, expected: TaskRunState) {
        for _ in 0..100 {
            if self.run_state(run_id).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "Run {} never reached {}, still {}",
            run_id,
            expected,
            self.run_state(run_id).await
        );
    }
}

/// Skip test if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
