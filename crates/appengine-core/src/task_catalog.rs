// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task catalog: upload, lookup and declared parameters.
//!
//! Upload order is bundle checks, duplicate check, descriptor storage, image
//! push, then persistence. A failed push removes the task's storage bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub use crate::bundle::{Author, Resources};

use crate::bundle::{DESCRIPTOR_NAME, Descriptor, TaskBundle};
use crate::error::CoreError;
use crate::persistence::{ParameterRecord, Persistence, TaskRecord};
use crate::registry::{self, Registry};
use crate::storage::{Storage, StorageData, task_bucket};
use crate::types::{Type, TypeRegistry};

/// Whether a parameter is consumed or produced by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterDirection {
    /// Task input.
    Input,
    /// Task output.
    Output,
}

impl ParameterDirection {
    /// Persisted form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterDirection::Input => "INPUT",
            ParameterDirection::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for ParameterDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INPUT" => Ok(ParameterDirection::Input),
            "OUTPUT" => Ok(ParameterDirection::Output),
            other => Err(format!("unknown parameter direction '{}'", other)),
        }
    }
}

/// A declared input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name, unique within its direction.
    pub name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether a value may be omitted.
    #[serde(default)]
    pub optional: bool,
    /// Bound type and constraints.
    #[serde(rename = "type")]
    pub ty: Type,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Input this output is derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
}

impl Parameter {
    fn from_descriptor(
        types: &TypeRegistry,
        name: &str,
        direction: ParameterDirection,
        node: &Value,
    ) -> Result<Self, CoreError> {
        let ty = types.create_type(node).map_err(|e| CoreError::BundleValidation {
            message: format!("{} '{}': {}", direction.as_str().to_lowercase(), name, e),
        })?;
        let text = |key: &str| node.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            name: name.to_string(),
            display_name: text("display_name"),
            description: text("description"),
            optional: node.get("optional").and_then(Value::as_bool).unwrap_or(false),
            ty,
            default: node.get("default").filter(|v| !v.is_null()).cloned(),
            derived_from: text("derived_from"),
        })
    }

    fn to_record(&self, task_id: &Uuid, direction: ParameterDirection) -> Result<ParameterRecord, CoreError> {
        Ok(ParameterRecord {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            name: self.name.clone(),
            direction: direction.as_str().to_string(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            optional: self.optional,
            type_definition: serde_json::to_string(&self.ty)?,
            default_value: self.default.as_ref().map(Value::to_string),
            derived_from: self.derived_from.clone(),
        })
    }

    fn from_record(record: &ParameterRecord) -> Result<Self, CoreError> {
        let definition: Value = serde_json::from_str(&record.type_definition)?;
        let ty = Type::from_definition(&definition).map_err(|e| CoreError::DatabaseError {
            operation: "load_parameter".to_string(),
            details: format!("parameter '{}': {}", record.name, e),
        })?;
        let default = record
            .default_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Self {
            name: record.name.clone(),
            display_name: record.display_name.clone(),
            description: record.description.clone(),
            optional: record.optional,
            ty,
            default,
            derived_from: record.derived_from.clone(),
        })
    }
}

/// Summary of a task returned by catalog operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Task UUID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Version.
    pub version: String,
    /// Description.
    pub description: Option<String>,
    /// Authors.
    pub authors: Vec<Author>,
}

/// A task loaded from the catalog.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task UUID.
    pub id: Uuid,
    /// Namespace.
    pub namespace: String,
    /// Version.
    pub version: String,
    /// Display name.
    pub name: String,
    /// Short name.
    pub name_short: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Authors.
    pub authors: Vec<Author>,
    /// Bucket holding the descriptor.
    pub storage_reference: String,
    /// Qualified image name.
    pub image_name: String,
    /// Folder inputs are mounted at.
    pub input_folder: String,
    /// Folder outputs are collected from.
    pub output_folder: String,
    /// Resource request.
    pub resources: Resources,
    /// Declared inputs.
    pub inputs: Vec<Parameter>,
    /// Declared outputs.
    pub outputs: Vec<Parameter>,
    /// Upload time.
    pub created_at: DateTime<Utc>,
}

impl Task {
    fn from_records(task: TaskRecord, parameters: &[ParameterRecord]) -> Result<Self, CoreError> {
        let id = Uuid::parse_str(&task.id).map_err(|e| CoreError::DatabaseError {
            operation: "load_task".to_string(),
            details: format!("invalid task id '{}': {}", task.id, e),
        })?;

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for record in parameters {
            let parameter = Parameter::from_record(record)?;
            if record.direction == ParameterDirection::Input.as_str() {
                inputs.push(parameter);
            } else {
                outputs.push(parameter);
            }
        }

        Ok(Self {
            id,
            namespace: task.namespace,
            version: task.version,
            name: task.name,
            name_short: task.name_short,
            description: task.description,
            authors: serde_json::from_str(&task.authors)?,
            storage_reference: task.storage_reference,
            image_name: task.image_name,
            input_folder: task.input_folder,
            output_folder: task.output_folder,
            resources: Resources {
                ram: task.ram,
                cpus: task.cpus,
                gpus: task.gpus,
            },
            inputs,
            outputs,
            created_at: task.created_at,
        })
    }

    /// Declared input by name.
    pub fn input(&self, name: &str) -> Option<&Parameter> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Declared output by name.
    pub fn output(&self, name: &str) -> Option<&Parameter> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Declared parameter in a direction.
    pub fn parameter(&self, name: &str, direction: ParameterDirection) -> Option<&Parameter> {
        match direction {
            ParameterDirection::Input => self.input(name),
            ParameterDirection::Output => self.output(name),
        }
    }

    /// Summary view.
    pub fn description(&self) -> TaskDescription {
        TaskDescription {
            id: self.id,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            authors: self.authors.clone(),
        }
    }
}

/// Upload and lookup of tasks.
#[derive(Clone)]
pub struct TaskCatalog {
    persistence: Arc<dyn Persistence>,
    storage: Arc<dyn Storage>,
    registry: Arc<dyn Registry>,
    types: TypeRegistry,
    max_bundle_size: u64,
}

impl TaskCatalog {
    /// Create a catalog.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        storage: Arc<dyn Storage>,
        registry: Arc<dyn Registry>,
        types: TypeRegistry,
        max_bundle_size: u64,
    ) -> Self {
        Self {
            persistence,
            storage,
            registry,
            types,
            max_bundle_size,
        }
    }

    fn parameters(
        &self,
        descriptor: &Descriptor,
    ) -> Result<(Vec<Parameter>, Vec<Parameter>), CoreError> {
        let inputs = descriptor
            .inputs
            .iter()
            .map(|(name, node)| {
                Parameter::from_descriptor(&self.types, name, ParameterDirection::Input, node)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = descriptor
            .outputs
            .iter()
            .map(|(name, node)| {
                Parameter::from_descriptor(&self.types, name, ParameterDirection::Output, node)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for output in &outputs {
            if let Some(source) = &output.derived_from
                && !inputs.iter().any(|input| &input.name == source)
            {
                return Err(CoreError::BundleValidation {
                    message: format!(
                        "output '{}' is derived from unknown input '{}'",
                        output.name, source
                    ),
                });
            }
        }
        Ok((inputs, outputs))
    }

    /// Upload a task bundle.
    #[instrument(skip(self, bundle), fields(size = bundle.len()))]
    pub async fn upload(&self, bundle: &[u8]) -> Result<TaskDescription, CoreError> {
        let bundle = TaskBundle::read(bundle, self.max_bundle_size)?;
        let descriptor = &bundle.descriptor;
        let (inputs, outputs) = self.parameters(descriptor)?;

        if self
            .persistence
            .get_task_by_namespace_version(&descriptor.namespace, &descriptor.version)
            .await?
            .is_some()
        {
            return Err(CoreError::TaskAlreadyExists {
                namespace: descriptor.namespace.clone(),
                version: descriptor.version.clone(),
            });
        }

        let task_id = Uuid::new_v4();
        let bucket = task_bucket(&task_id);
        self.storage.create_bucket(&bucket).await?;
        if let Err(e) = self
            .storage
            .put(
                &bucket,
                &StorageData::file(DESCRIPTOR_NAME, bundle.descriptor_bytes.clone()),
            )
            .await
        {
            self.discard_bucket(&bucket).await;
            return Err(e.into());
        }
        info!(task_id = %task_id, bucket = %bucket, "Descriptor stored");

        let image_name = registry::image_name(&descriptor.namespace, &descriptor.version);
        if let Err(e) = self.registry.push_image(&bundle.image, &image_name).await {
            error!(task_id = %task_id, image = %image_name, error = %e, "Image push failed");
            self.discard_bucket(&bucket).await;
            return Err(CoreError::RegistryFailure {
                details: e.to_string(),
            });
        }

        let record = TaskRecord {
            id: task_id.to_string(),
            namespace: descriptor.namespace.clone(),
            version: descriptor.version.clone(),
            name: descriptor.name.clone(),
            name_short: descriptor.name_short.clone(),
            description: descriptor.description.clone(),
            authors: serde_json::to_string(&descriptor.authors)?,
            descriptor: bundle.descriptor_bytes.clone(),
            storage_reference: bucket.clone(),
            image_name,
            input_folder: descriptor.configuration.input_folder.clone(),
            output_folder: descriptor.configuration.output_folder.clone(),
            ram: descriptor.configuration.resources.ram.clone(),
            cpus: descriptor.configuration.resources.cpus,
            gpus: descriptor.configuration.resources.gpus,
            created_at: Utc::now(),
        };

        let mut records = Vec::with_capacity(inputs.len() + outputs.len());
        for input in &inputs {
            records.push(input.to_record(&task_id, ParameterDirection::Input)?);
        }
        for output in &outputs {
            records.push(output.to_record(&task_id, ParameterDirection::Output)?);
        }

        if let Err(e) = self.persistence.insert_task(&record, &records).await {
            self.discard_bucket(&bucket).await;
            return Err(e);
        }

        info!(
            task_id = %task_id,
            namespace = %descriptor.namespace,
            version = %descriptor.version,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "Task uploaded"
        );

        let task = Task::from_records(record, &records)?;
        Ok(task.description())
    }

    async fn discard_bucket(&self, bucket: &str) {
        if let Err(e) = self.storage.delete_bucket(bucket).await {
            warn!(bucket = %bucket, error = %e, "Failed to delete task bucket");
        }
    }

    async fn load(&self, record: TaskRecord) -> Result<Task, CoreError> {
        let parameters = self.persistence.get_task_parameters(&record.id).await?;
        Task::from_records(record, &parameters)
    }

    /// Task by id.
    pub async fn get(&self, task_id: &Uuid) -> Result<Task, CoreError> {
        let record = self
            .persistence
            .get_task(&task_id.to_string())
            .await?
            .ok_or_else(|| CoreError::TaskNotFound {
                task: task_id.to_string(),
            })?;
        self.load(record).await
    }

    /// Task by namespace and version.
    pub async fn find(&self, namespace: &str, version: &str) -> Result<Task, CoreError> {
        let record = self
            .persistence
            .get_task_by_namespace_version(namespace, version)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound {
                task: format!("{}:{}", namespace, version),
            })?;
        self.load(record).await
    }

    /// All tasks.
    pub async fn list(&self) -> Result<Vec<TaskDescription>, CoreError> {
        let mut descriptions = Vec::new();
        for record in self.persistence.list_tasks().await? {
            descriptions.push(self.load(record).await?.description());
        }
        Ok(descriptions)
    }

    async fn stored_descriptor(&self, task: &Task) -> Result<Vec<u8>, CoreError> {
        let data = self
            .storage
            .get(&task.storage_reference, DESCRIPTOR_NAME)
            .await?;
        Ok(data.file_bytes())
    }

    /// Stored `descriptor.yml` of a task.
    pub async fn descriptor(&self, task_id: &Uuid) -> Result<Vec<u8>, CoreError> {
        let task = self.get(task_id).await?;
        self.stored_descriptor(&task).await
    }

    /// Stored `descriptor.yml` by namespace and version.
    pub async fn descriptor_by_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Vec<u8>, CoreError> {
        let task = self.find(namespace, version).await?;
        self.stored_descriptor(&task).await
    }

    /// Declared inputs.
    pub async fn inputs(&self, task_id: &Uuid) -> Result<Vec<Parameter>, CoreError> {
        Ok(self.get(task_id).await?.inputs)
    }

    /// Declared outputs.
    pub async fn outputs(&self, task_id: &Uuid) -> Result<Vec<Parameter>, CoreError> {
        Ok(self.get(task_id).await?.outputs)
    }
}
