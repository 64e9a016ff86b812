// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for appengine-core.
//!
//! Provides a unified error type with stable codes that map to API error responses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scheduler::SchedulerError;
use crate::storage::StorageError;
use crate::types::TypeValidationError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during request processing.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Run was not found.
    RunNotFound {
        /// The run ID that was not found.
        run_id: String,
    },

    /// Task was not found.
    TaskNotFound {
        /// Task reference (id or `namespace:version`).
        task: String,
    },

    /// A task with the same namespace and version already exists.
    TaskAlreadyExists {
        /// Task namespace.
        namespace: String,
        /// Task version.
        version: String,
    },

    /// No declared parameter matches the given name.
    ParameterNotFound {
        /// Parameter name that was looked up.
        param_name: String,
    },

    /// Run is in a state that does not allow the requested operation.
    InvalidRunState {
        /// The run ID.
        run_id: String,
        /// The state the operation requires.
        expected: String,
        /// The state the run is in.
        actual: String,
    },

    /// Run was asked to start (or promote) before all inputs were provisioned.
    RunNotProvisioned {
        /// The run ID.
        run_id: String,
    },

    /// The requested transition target is not a known state.
    UnknownState {
        /// The value that was requested.
        desired: String,
    },

    /// A value was rejected by its parameter type.
    Validation {
        /// The parameter whose value was rejected.
        param_name: String,
        /// The type-level reason.
        error: TypeValidationError,
    },

    /// The secret supplied with an output archive does not match the run.
    Unauthenticated {
        /// The run ID.
        run_id: String,
    },

    /// An archive entry did not match any declared output.
    UnknownOutput {
        /// Name of the offending archive entry.
        entry: String,
    },

    /// The archive did not provide every declared output.
    MissingOutputs {
        /// Outputs that were not found.
        missing: Vec<String>,
    },

    /// Storage facade failed to read or write.
    StorageFailure {
        /// Parameter involved, if any.
        param_name: Option<String>,
        /// Error details.
        details: String,
    },

    /// An output archive could not be read.
    InvalidArchive {
        /// Error details.
        details: String,
    },

    /// Aggregate of several per-item failures.
    Batch {
        /// The individual failures, each keeping its parameter name.
        errors: Vec<CoreError>,
    },

    /// An uploaded task bundle or descriptor is not acceptable.
    BundleValidation {
        /// What is wrong with the bundle.
        message: String,
    },

    /// Pushing the task image to the registry failed.
    RegistryFailure {
        /// Error details.
        details: String,
    },

    /// The scheduler refused or failed to schedule a run.
    SchedulingFailed {
        /// The run ID.
        run_id: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

/// Serializable error payload returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Parameter name and nested errors, when applicable.
    #[serde(default, skip_serializing_if = "ErrorDetails::is_empty")]
    pub details: ErrorDetails,
}

/// Extra context attached to an [`ErrorResponse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Offending parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
    /// Type-level validation code, for validation errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_code: Option<String>,
    /// Individual failures of a batch request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorResponse>,
}

impl ErrorDetails {
    fn is_empty(&self) -> bool {
        self.param_name.is_none() && self.validation_code.is_none() && self.errors.is_empty()
    }
}

impl CoreError {
    /// Convert this error to the payload returned to API callers.
    pub fn to_error_response(&self) -> ErrorResponse {
        let details = match self {
            Self::Batch { errors } => ErrorDetails {
                errors: errors.iter().map(CoreError::to_error_response).collect(),
                ..Default::default()
            },
            Self::Validation { param_name, error } => ErrorDetails {
                param_name: Some(param_name.clone()),
                validation_code: Some(error.code().to_string()),
                errors: Vec::new(),
            },
            other => ErrorDetails {
                param_name: other.param_name().map(str::to_string),
                ..Default::default()
            },
        };

        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::TaskAlreadyExists { .. } => "TASK_ALREADY_EXISTS",
            Self::ParameterNotFound { .. } => "PARAMETER_NOT_FOUND",
            Self::InvalidRunState { .. } => "INVALID_RUN_STATE",
            Self::RunNotProvisioned { .. } => "RUN_NOT_PROVISIONED",
            Self::UnknownState { .. } => "UNKNOWN_STATE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Unauthenticated { .. } => "UNAUTHENTICATED",
            Self::UnknownOutput { .. } => "UNKNOWN_OUTPUT",
            Self::MissingOutputs { .. } => "MISSING_OUTPUTS",
            Self::StorageFailure { .. } => "STORAGE_FAILURE",
            Self::InvalidArchive { .. } => "INVALID_ARCHIVE",
            Self::Batch { .. } => "BATCH_ERROR",
            Self::BundleValidation { .. } => "BUNDLE_VALIDATION_ERROR",
            Self::RegistryFailure { .. } => "REGISTRY_FAILURE",
            Self::SchedulingFailed { .. } => "SCHEDULING_FAILED",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// The parameter this error relates to, if any.
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Self::ParameterNotFound { param_name } | Self::Validation { param_name, .. } => {
                Some(param_name)
            }
            Self::StorageFailure { param_name, .. } => param_name.as_deref(),
            Self::UnknownOutput { entry } => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn storage(param_name: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::StorageFailure {
            param_name: Some(param_name.into()),
            details: err.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "Run '{}' not found", run_id),
            Self::TaskNotFound { task } => write!(f, "Task '{}' not found", task),
            Self::TaskAlreadyExists { namespace, version } => {
                write!(f, "Task '{}:{}' already exists", namespace, version)
            }
            Self::ParameterNotFound { param_name } => {
                write!(f, "Parameter '{}' not found", param_name)
            }
            Self::InvalidRunState {
                run_id,
                expected,
                actual,
            } => write!(
                f,
                "Run '{}' is in invalid state: expected '{}', got '{}'",
                run_id, expected, actual
            ),
            Self::RunNotProvisioned { run_id } => {
                write!(f, "Run '{}' is not provisioned", run_id)
            }
            Self::UnknownState { desired } => {
                write!(f, "Unknown state '{}' in transition request", desired)
            }
            Self::Validation { param_name, error } => {
                write!(f, "Validation error for '{}': {}", param_name, error)
            }
            Self::Unauthenticated { run_id } => {
                write!(f, "Secret does not match run '{}'", run_id)
            }
            Self::UnknownOutput { entry } => write!(
                f,
                "Unexpected output '{}', did not match an actual task output",
                entry
            ),
            Self::MissingOutputs { missing } => write!(
                f,
                "Some outputs are missing in the archive: {}",
                missing.join(", ")
            ),
            Self::StorageFailure {
                param_name,
                details,
            } => match param_name {
                Some(name) => write!(f, "Storage failure for '{}': {}", name, details),
                None => write!(f, "Storage failure: {}", details),
            },
            Self::InvalidArchive { details } => write!(f, "Invalid output archive: {}", details),
            Self::Batch { errors } => write!(
                f,
                "{} error(s) occurred during handling of a batch request",
                errors.len()
            ),
            Self::BundleValidation { message } => {
                write!(f, "Invalid task bundle: {}", message)
            }
            Self::RegistryFailure { details } => {
                write!(f, "Pushing task image to registry failed: {}", details)
            }
            Self::SchedulingFailed { run_id, details } => {
                write!(f, "Failed to schedule run '{}': {}", run_id, details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::StorageFailure {
            param_name: None,
            details: err.to_string(),
        }
    }
}

impl From<SchedulerError> for CoreError {
    fn from(err: SchedulerError) -> Self {
        CoreError::SchedulingFailed {
            run_id: err.run_id().unwrap_or_default().to_string(),
            details: err.to_string(),
        }
    }
}
