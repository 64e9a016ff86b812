// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task bundle parsing.
//!
//! A bundle is a zip holding `descriptor.yml` and the container image tar.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::archive;
use crate::error::CoreError;

/// Name of the descriptor inside a bundle and a task's storage bucket.
pub const DESCRIPTOR_NAME: &str = "descriptor.yml";

/// Image location used when the descriptor does not configure one.
pub const DEFAULT_IMAGE_NAME: &str = "image.tar";

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::BundleValidation {
        message: message.into(),
    }
}

/// Author entry of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Organization.
    #[serde(default)]
    pub organization: Option<String>,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether this author is the task's contact.
    #[serde(default)]
    pub is_contact: bool,
}

/// Compute resources requested by a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// RAM, e.g. `2Gi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<String>,
    /// CPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<i64>,
    /// GPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<i64>,
}

/// `configuration.image` section of a descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfiguration {
    /// Path of the image tar inside the bundle.
    #[serde(default)]
    pub file: Option<String>,
}

/// `configuration` section of a descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Folder inputs are mounted at.
    #[serde(default = "default_input_folder")]
    pub input_folder: String,
    /// Folder outputs are collected from.
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    /// Custom image location inside the bundle.
    #[serde(default)]
    pub image: Option<ImageConfiguration>,
    /// Resource request.
    #[serde(default)]
    pub resources: Resources,
}

fn default_input_folder() -> String {
    "/inputs".to_string()
}

fn default_output_folder() -> String {
    "/outputs".to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            input_folder: default_input_folder(),
            output_folder: default_output_folder(),
            image: None,
            resources: Resources::default(),
        }
    }
}

/// The descriptor fields read by the catalog.
///
/// Parameter nodes are kept as JSON and handed to the type registry.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    /// Display name.
    pub name: String,
    /// Short name.
    #[serde(default)]
    pub name_short: Option<String>,
    /// Namespace, e.g. `com.example.sum`.
    pub namespace: String,
    /// Version string.
    pub version: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Authors.
    #[serde(default)]
    pub authors: Vec<Author>,
    /// Container configuration.
    #[serde(default)]
    pub configuration: Configuration,
    /// Declared inputs keyed by name.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Declared outputs keyed by name.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Descriptor {
    /// Parse `descriptor.yml` content.
    pub fn parse(bytes: &[u8]) -> Result<Self, CoreError> {
        let descriptor: Descriptor = serde_yaml::from_slice(bytes)
            .map_err(|e| invalid(format!("invalid {}: {}", DESCRIPTOR_NAME, e)))?;

        if descriptor.namespace.trim().is_empty() || descriptor.version.trim().is_empty() {
            return Err(invalid("namespace and version must not be empty"));
        }
        Ok(descriptor)
    }

    /// Path of the image tar inside the bundle.
    pub fn image_path(&self) -> &str {
        self.configuration
            .image
            .as_ref()
            .and_then(|image| image.file.as_deref())
            .map(|file| file.trim_start_matches('/'))
            .filter(|file| !file.is_empty())
            .unwrap_or(DEFAULT_IMAGE_NAME)
    }
}

/// A validated task bundle.
#[derive(Debug, Clone)]
pub struct TaskBundle {
    /// Raw descriptor bytes, stored as uploaded.
    pub descriptor_bytes: Vec<u8>,
    /// Parsed descriptor.
    pub descriptor: Descriptor,
    /// Container image tar.
    pub image: Vec<u8>,
}

impl TaskBundle {
    /// Read and check a bundle of at most `max_size` bytes.
    pub fn read(bytes: &[u8], max_size: u64) -> Result<Self, CoreError> {
        if bytes.len() as u64 > max_size {
            return Err(invalid(format!(
                "bundle exceeds the maximum size of {} bytes",
                max_size
            )));
        }
        if !archive::is_zip(bytes) {
            return Err(invalid("bundle is not a zip archive"));
        }

        let entries = archive::read_entries(bytes).map_err(|e| invalid(e.to_string()))?;

        let descriptor_bytes = entries
            .iter()
            .find(|e| !e.is_dir() && e.name.eq_ignore_ascii_case(DESCRIPTOR_NAME))
            .map(|e| e.data.clone())
            .ok_or_else(|| invalid(format!("{} not found in bundle", DESCRIPTOR_NAME)))?;
        let descriptor = Descriptor::parse(&descriptor_bytes)?;

        let image_path = descriptor.image_path();
        let image = entries
            .into_iter()
            .find(|e| !e.is_dir() && e.name == image_path)
            .map(|e| e.data)
            .ok_or_else(|| invalid(format!("image '{}' not found in bundle", image_path)))?;

        Ok(Self {
            descriptor_bytes,
            descriptor,
            image,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::archive;
    use crate::storage::{StorageData, StorageDataEntry};

    /// Descriptor of a task summing two integers.
    pub const SUM_DESCRIPTOR: &str = r#"
name: Integers addition
name_short: add_int
namespace: com.example.sum
version: 1.0.0
description: Sums two integers
authors:
  - first_name: Ada
    last_name: Lovelace
    organization: Example
    email: ada@example.com
    is_contact: true
configuration:
  input_folder: /inputs
  output_folder: /outputs
  resources:
    ram: 1Gi
    cpus: 1
inputs:
  a:
    display_name: Operand A
    description: First operand
    type: integer
  b:
    display_name: Operand B
    description: Second operand
    type:
      id: integer
      lt: 1000
outputs:
  sum:
    display_name: Sum
    description: a + b
    type: integer
"#;

    /// Zip a descriptor plus an image at `image_path`.
    pub fn bundle(descriptor: &str, image_path: Option<&str>) -> Vec<u8> {
        let mut data = StorageData::file("descriptor.yml", descriptor.as_bytes().to_vec());
        if let Some(path) = image_path {
            data.add(StorageDataEntry::file(path, b"image-layers".to_vec()));
        }
        archive::write(&data).expect("bundle archive")
    }
}
