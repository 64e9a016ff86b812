// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App Engine Core - Task-run control plane
//!
//! This crate accepts uploaded task bundles, creates runs of those tasks,
//! validates and stores typed input values, hands provisioned runs to a cluster
//! scheduler and reconciles the output archive a finished container posts back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             API layer                                    │
//! │             (upload, provision, state change, outputs POST)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                    │                          │
//!           ▼                    ▼                          ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────────────────┐
//! │   task_catalog   │ │   provisioning   │ │        reconciliation        │
//! │ bundle, registry │ │ validate, commit │ │ match, compact, persist      │
//! └──────────────────┘ └──────────────────┘ └──────────────────────────────┘
//!           │                    │                          │
//!           └──────────┬─────────┴───────────┬──────────────┘
//!                      ▼                     ▼
//!            ┌──────────────────┐   ┌──────────────────┐     ┌────────────┐
//!            │  types registry  │   │  state_machine   │◄────│ phase inbox│◄── Scheduler
//!            └──────────────────┘   └──────────────────┘     └────────────┘
//!                      │                     │
//!                      ▼                     ▼
//!            ┌──────────────────┐   ┌──────────────────┐
//!            │ Storage facade   │   │ SQLite/PostgreSQL│
//!            └──────────────────┘   └──────────────────┘
//! ```
//!
//! # Run State Machine
//!
//! ```text
//!  CREATED ──all inputs──► PROVISIONED ──RUNNING──► QUEUING ──ack──► QUEUED
//!                                                      │               │
//!                                                      │     phases    ▼
//!                                                      │      PENDING ─► RUNNING
//!                                                      │                  │
//!                                 outputs archive ◄────┴──────────────────┘
//!                                       │
//!                           ┌───────────┴───────────┐
//!                           ▼                       ▼
//!                       FINISHED                  FAILED
//! ```
//!
//! FINISHED and FAILED are terminal. Every transition, user- or
//! scheduler-originated, is a guarded compare-and-swap on the run row.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `APPENGINE_DATABASE_URL` | Yes | - | `sqlite:` or `postgres://` connection string |
//! | `APPENGINE_STORAGE_PATH` | No | `.data/storage` | Storage facade base directory |
//! | `APPENGINE_REGISTRY_PATH` | No | `.data/registry` | Image registry base directory |
//! | `APPENGINE_STORAGE_CHARSET` | No | `UTF-8` | Charset of textual values |
//! | `APPENGINE_MAX_BUNDLE_SIZE` | No | `2147483648` | Maximum bundle size in bytes |
//! | `APPENGINE_INBOX_CAPACITY` | No | `256` | Phase inbox capacity |

#![deny(missing_docs)]

/// Zip archives to and from storage trees.
pub mod archive;

/// Task bundle and descriptor parsing.
pub mod bundle;

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types with stable API error codes.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Persistence layer for tasks, runs and typed values.
pub mod persistence;

/// Input provisioning (single, binary and batch).
pub mod provisioning;

/// Output archive reconciliation.
pub mod reconciliation;

/// Container image registry boundary.
pub mod registry;

/// Run creation, state changes and read-back.
pub mod run_handlers;

/// Embeddable runtime wiring the handlers and the phase inbox.
pub mod runtime;

/// Cluster scheduler boundary and phase inbox.
pub mod scheduler;

/// Run lifecycle states and guarded transitions.
pub mod state_machine;

/// Storage facade and storage trees.
pub mod storage;

/// Task upload and lookup.
pub mod task_catalog;

/// Parameter types: validation, storage mapping and persistence.
pub mod types;

pub use error::CoreError;
pub use runtime::AppEngineRuntime;
