// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;

use crate::runtime::{DEFAULT_INBOX_CAPACITY, DEFAULT_MAX_BUNDLE_SIZE};
use crate::types::Charset;

/// App engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Base directory of the filesystem storage facade
    pub storage_path: PathBuf,
    /// Base directory of the filesystem image registry
    pub registry_path: PathBuf,
    /// Charset of textual values in storage
    pub storage_charset: Charset,
    /// Maximum accepted task bundle size in bytes
    pub max_bundle_size: u64,
    /// Capacity of the scheduler phase inbox
    pub inbox_capacity: usize,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `APPENGINE_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `APPENGINE_STORAGE_PATH`: storage base directory (default: .data/storage)
    /// - `APPENGINE_REGISTRY_PATH`: registry base directory (default: .data/registry)
    /// - `APPENGINE_STORAGE_CHARSET`: text charset (default: UTF-8)
    /// - `APPENGINE_MAX_BUNDLE_SIZE`: max bundle bytes (default: 2147483648)
    /// - `APPENGINE_INBOX_CAPACITY`: phase inbox capacity (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("APPENGINE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("APPENGINE_DATABASE_URL"))?;

        let storage_charset: Charset = var_or("APPENGINE_STORAGE_CHARSET", "UTF-8")
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("APPENGINE_STORAGE_CHARSET", "must be a supported charset")
            })?;

        let max_bundle_size: u64 = var_or(
            "APPENGINE_MAX_BUNDLE_SIZE",
            &DEFAULT_MAX_BUNDLE_SIZE.to_string(),
        )
        .parse()
        .map_err(|_| ConfigError::Invalid("APPENGINE_MAX_BUNDLE_SIZE", "must be a byte count"))?;

        let inbox_capacity: usize = var_or(
            "APPENGINE_INBOX_CAPACITY",
            &DEFAULT_INBOX_CAPACITY.to_string(),
        )
        .parse()
        .ok()
        .filter(|capacity| *capacity > 0)
        .ok_or(ConfigError::Invalid(
            "APPENGINE_INBOX_CAPACITY",
            "must be a positive integer",
        ))?;

        Ok(Self {
            database_url,
            storage_path: var_or("APPENGINE_STORAGE_PATH", ".data/storage").into(),
            registry_path: var_or("APPENGINE_REGISTRY_PATH", ".data/registry").into(),
            storage_charset,
            max_bundle_size,
            inbox_capacity,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
