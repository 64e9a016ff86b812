// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed-value engine.
//!
//! Every parameter is bound to a [`Type`]. A `Type` is a closed enum with one
//! variant per value kind; each variant carries its own constraints and
//! implements [`ValueKind`], the uniform contract used by provisioning and
//! reconciliation:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `validate` | enforce the kind's constraints on a provision value |
//! | `stored_value` | map a value onto the typed-value row columns |
//! | `to_storage` | serialize a value into [`StorageData`] |
//! | `from_storage` | parse [`StorageData`] read back from storage or an archive |
//!
//! No other module branches on the kind: [`Type::kind`] is the single dispatch
//! point. Persistence access is injected through [`TypeRegistry`], which binds
//! a `Type` to the persistence port and the storage charset.

pub mod boolean;
pub mod charset;
pub mod collection;
pub mod datetime;
pub mod enumeration;
pub mod file;
pub mod formats;
pub mod geometry;
pub mod image;
pub mod integer;
pub mod number;
pub mod size;
pub mod string;

mod bound;

pub use self::bound::{BoundType, TypeRegistry};
pub use self::charset::Charset;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StorageData;

use self::boolean::BooleanType;
use self::collection::CollectionType;
use self::datetime::DateTimeType;
use self::enumeration::EnumerationType;
use self::file::FileType;
use self::geometry::GeometryType;
use self::image::{ImageType, WsiType};
use self::integer::IntegerType;
use self::number::NumberType;
use self::string::StringType;

/// Value kind tag, as reported in read-back DTOs and persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    /// 64-bit signed integer.
    Integer,
    /// IEEE double.
    Number,
    /// Free text.
    String,
    /// `true` / `false`.
    Boolean,
    /// One of a fixed set of strings.
    Enumeration,
    /// RFC 3339 instant.
    Datetime,
    /// GeoJSON geometry.
    Geometry,
    /// Raster image.
    Image,
    /// Whole-slide image.
    Wsi,
    /// Arbitrary binary file.
    File,
    /// Collection of values of one subtype.
    Array,
}

impl ValueType {
    /// Tag as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "INTEGER",
            ValueType::Number => "NUMBER",
            ValueType::String => "STRING",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Enumeration => "ENUMERATION",
            ValueType::Datetime => "DATETIME",
            ValueType::Geometry => "GEOMETRY",
            ValueType::Image => "IMAGE",
            ValueType::Wsi => "WSI",
            ValueType::File => "FILE",
            ValueType::Array => "ARRAY",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INTEGER" => Ok(ValueType::Integer),
            "NUMBER" => Ok(ValueType::Number),
            "STRING" => Ok(ValueType::String),
            "BOOLEAN" => Ok(ValueType::Boolean),
            "ENUMERATION" => Ok(ValueType::Enumeration),
            "DATETIME" => Ok(ValueType::Datetime),
            "GEOMETRY" => Ok(ValueType::Geometry),
            "IMAGE" => Ok(ValueType::Image),
            "WSI" => Ok(ValueType::Wsi),
            "FILE" => Ok(ValueType::File),
            "ARRAY" => Ok(ValueType::Array),
            other => Err(format!("Unknown value type: {}", other)),
        }
    }
}

/// Reason a value was rejected by its type.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TypeValidationError {
    /// The JSON shape does not match the kind.
    #[error("Value is not a valid {0}")]
    TypeMismatch(ValueType),

    /// A required parameter received `null`.
    #[error("A value is required")]
    ValueRequired,

    /// Text content is empty after trimming.
    #[error("Value is blank")]
    BlankValue,

    /// Value is not strictly greater than `gt`.
    #[error("Value must be greater than the 'gt' bound")]
    GreaterThan,

    /// Value is below `geq`.
    #[error("Value must be greater than or equal to the 'geq' bound")]
    GreaterOrEqual,

    /// Value is not strictly less than `lt`.
    #[error("Value must be less than the 'lt' bound")]
    LessThan,

    /// Value is above `leq`.
    #[error("Value must be less than or equal to the 'leq' bound")]
    LessOrEqual,

    /// String shorter than `min_length`.
    #[error("Value is shorter than the minimum length")]
    MinLength,

    /// String longer than `max_length`.
    #[error("Value is longer than the maximum length")]
    MaxLength,

    /// NaN given while `nan_allowed` is false.
    #[error("NaN is not allowed")]
    NanNotAllowed,

    /// Infinity given while `infinity_allowed` is false.
    #[error("Infinity is not allowed")]
    InfinityNotAllowed,

    /// Value is not one of the declared enumeration values.
    #[error("Value is not part of the enumeration")]
    NotInEnumeration,

    /// Instant earlier than `before`.
    #[error("Value is before the 'before' bound")]
    Before,

    /// Instant later than `after`.
    #[error("Value is after the 'after' bound")]
    After,

    /// GeoJSON text is not valid JSON.
    #[error("GeoJSON could not be parsed: {0}")]
    GeoJsonParse(String),

    /// JSON is not a valid GeoJSON geometry.
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// Geometry type outside the supported set.
    #[error("Unsupported geometry type '{0}'")]
    UnsupportedGeometryType(String),

    /// Properties are present but `subType` is missing.
    #[error("Geometry properties must declare a subType")]
    MissingGeometrySubtype,

    /// `subType` is neither `Circle` nor `Rectangle`.
    #[error("Unsupported geometry subType '{0}'")]
    UnsupportedGeometrySubtype(String),

    /// Circle without a `radius` property.
    #[error("Circle geometry requires a radius")]
    MissingRadius,

    /// Binary value is not valid base64.
    #[error("Binary value is not valid base64")]
    InvalidEncoding,

    /// File signature does not match any accepted format.
    #[error("File format is not accepted")]
    InvalidFileFormat,

    /// File exceeds `max_file_size`.
    #[error("File exceeds the maximum size")]
    InvalidFileSize,

    /// `max_file_size` constraint cannot be parsed.
    #[error("Invalid file size constraint '{0}'")]
    InvalidFileSizeFormat(String),

    /// Dimensions cannot be read while a width/height bound is set.
    #[error("Image dimensions could not be determined")]
    InvalidImageDimension,

    /// Image wider than `max_width`.
    #[error("Image exceeds the maximum width")]
    InvalidImageWidth,

    /// Image taller than `max_height`.
    #[error("Image exceeds the maximum height")]
    InvalidImageHeight,

    /// Collection size outside `min_size..=max_size`.
    #[error("Collection size is out of bounds")]
    InvalidCollectionSize,

    /// Collection shape does not match its declared nesting.
    #[error("Invalid collection structure: {0}")]
    InvalidCollectionStructure(String),

    /// One item of a collection was rejected.
    #[error("Invalid collection item at index {index}: {reason}")]
    InvalidCollectionItem {
        /// Position of the item.
        index: usize,
        /// Why the item was rejected.
        reason: Box<TypeValidationError>,
    },

    /// Stored or archived content cannot be parsed into the kind.
    #[error("Malformed value: {0}")]
    Malformed(String),
}

impl TypeValidationError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TypeMismatch(_) => "TYPE_MISMATCH",
            Self::ValueRequired => "VALUE_REQUIRED",
            Self::BlankValue => "BLANK_VALUE",
            Self::GreaterThan => "GT_VIOLATION",
            Self::GreaterOrEqual => "GEQ_VIOLATION",
            Self::LessThan => "LT_VIOLATION",
            Self::LessOrEqual => "LEQ_VIOLATION",
            Self::MinLength => "MIN_LENGTH_VIOLATION",
            Self::MaxLength => "MAX_LENGTH_VIOLATION",
            Self::NanNotAllowed => "NAN_NOT_ALLOWED",
            Self::InfinityNotAllowed => "INFINITY_NOT_ALLOWED",
            Self::NotInEnumeration => "NOT_IN_ENUMERATION",
            Self::Before => "BEFORE_VIOLATION",
            Self::After => "AFTER_VIOLATION",
            Self::GeoJsonParse(_) => "GEOJSON_PARSE_ERROR",
            Self::InvalidGeoJson(_) => "INVALID_GEOJSON",
            Self::UnsupportedGeometryType(_) => "UNSUPPORTED_GEOMETRY_TYPE",
            Self::MissingGeometrySubtype => "MISSING_GEOMETRY_SUBTYPE",
            Self::UnsupportedGeometrySubtype(_) => "UNSUPPORTED_GEOMETRY_SUBTYPE",
            Self::MissingRadius => "MISSING_RADIUS",
            Self::InvalidEncoding => "INVALID_ENCODING",
            Self::InvalidFileFormat => "INVALID_FILE_FORMAT",
            Self::InvalidFileSize => "INVALID_FILE_SIZE",
            Self::InvalidFileSizeFormat(_) => "INVALID_FILE_SIZE_FORMAT",
            Self::InvalidImageDimension => "INVALID_IMAGE_DIMENSION",
            Self::InvalidImageWidth => "INVALID_IMAGE_WIDTH",
            Self::InvalidImageHeight => "INVALID_IMAGE_HEIGHT",
            Self::InvalidCollectionSize => "INVALID_COLLECTION_SIZE",
            Self::InvalidCollectionStructure(_) => "INVALID_COLLECTION_STRUCTURE",
            Self::InvalidCollectionItem { .. } => "INVALID_COLLECTION_ITEM",
            Self::Malformed(_) => "MALFORMED_VALUE",
        }
    }
}

/// Errors raised while turning a descriptor fragment into a [`Type`].
#[derive(Debug, Error)]
pub enum TypeDefinitionError {
    /// The parameter node has no usable `type` entry.
    #[error("Parameter has no type definition")]
    MissingType,

    /// The type id is not one of the known kinds.
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    /// A constraint has the wrong shape.
    #[error("Invalid type constraint: {0}")]
    InvalidConstraint(String),
}

/// Type ids accepted in descriptors.
pub const KNOWN_TYPE_IDS: [&str; 11] = [
    "integer",
    "number",
    "string",
    "boolean",
    "enumeration",
    "datetime",
    "geometry",
    "image",
    "wsi",
    "file",
    "array",
];

/// Value as mapped onto the kind-specific columns of a typed-value row.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// No value column (binary kinds, absent optional values).
    None,
    /// `integer_value`.
    Integer(i64),
    /// `number_value`.
    Number(f64),
    /// `string_value`.
    String(String),
    /// `boolean_value`.
    Boolean(bool),
    /// `datetime_value`.
    DateTime(DateTime<Utc>),
    /// `json_value`.
    Json(Value),
}

impl StoredValue {
    /// JSON form used in read-back DTOs.
    pub fn to_json(&self) -> Value {
        match self {
            StoredValue::None => Value::Null,
            StoredValue::Integer(v) => Value::from(*v),
            StoredValue::Number(v) => number_to_json(*v),
            StoredValue::String(v) => Value::String(v.clone()),
            StoredValue::Boolean(v) => Value::Bool(*v),
            StoredValue::DateTime(v) => {
                Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            StoredValue::Json(v) => v.clone(),
        }
    }
}

/// Doubles JSON cannot express (NaN, ±Infinity) become strings.
pub(crate) fn number_to_json(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(number::render(value)))
}

/// Read-back DTO for one provisioned input or reconciled output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    /// Parameter name.
    pub param_name: String,
    /// Owning run.
    pub task_run_id: Uuid,
    /// Value kind.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Kind-specific JSON value.
    pub value: Value,
}

/// Per-kind contract implemented by every [`Type`] variant.
pub trait ValueKind: Send + Sync {
    /// Kind tag.
    fn value_type(&self) -> ValueType;

    /// Check a non-null value against the kind and its constraints.
    fn validate(&self, value: &Value) -> Result<(), TypeValidationError>;

    /// Map a value onto the typed-value row columns.
    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError>;

    /// Parse trimmed storage text into the kind's JSON form.
    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        let _ = text;
        Err(TypeValidationError::TypeMismatch(self.value_type()))
    }

    /// Text written to storage for a value.
    fn render_text(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Serialize a value into a storage tree rooted at `name`.
    fn to_storage(
        &self,
        name: &str,
        value: &Value,
        charset: Charset,
    ) -> Result<StorageData, TypeValidationError> {
        Ok(StorageData::file(
            name,
            charset.encode(&self.render_text(value)),
        ))
    }

    /// Parse a storage tree back into the kind's JSON form.
    fn from_storage(
        &self,
        data: &StorageData,
        charset: Charset,
    ) -> Result<Value, TypeValidationError> {
        let text = charset.decode(&data.file_bytes());
        self.parse_text(text.trim())
    }
}

/// A parameter type with its constraints, tagged by `id` in descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum Type {
    /// `integer`
    Integer(IntegerType),
    /// `number`
    Number(NumberType),
    /// `string`
    String(StringType),
    /// `boolean`
    Boolean(BooleanType),
    /// `enumeration`
    Enumeration(EnumerationType),
    /// `datetime`
    #[serde(rename = "datetime")]
    DateTime(DateTimeType),
    /// `geometry`
    Geometry(GeometryType),
    /// `image`
    Image(ImageType),
    /// `wsi`
    Wsi(WsiType),
    /// `file`
    File(FileType),
    /// `array`
    #[serde(rename = "array")]
    Collection(CollectionType),
}

impl Type {
    /// Build a type from a descriptor parameter node.
    ///
    /// The node's `type` is either an id string or an object `{id, ...constraints}`.
    pub fn from_descriptor(fragment: &Value) -> Result<Self, TypeDefinitionError> {
        let node = fragment
            .get("type")
            .ok_or(TypeDefinitionError::MissingType)?;
        Self::from_definition(node)
    }

    /// Build a type from a bare definition (`"integer"` or `{"id": "integer", ...}`).
    pub fn from_definition(node: &Value) -> Result<Self, TypeDefinitionError> {
        let definition = match node {
            Value::String(id) => serde_json::json!({ "id": id }),
            Value::Object(map) if map.contains_key("id") => node.clone(),
            _ => return Err(TypeDefinitionError::MissingType),
        };

        let id = definition
            .get("id")
            .and_then(Value::as_str)
            .ok_or(TypeDefinitionError::MissingType)?;
        if !KNOWN_TYPE_IDS.contains(&id) {
            return Err(TypeDefinitionError::UnknownType(id.to_string()));
        }

        serde_json::from_value(definition)
            .map_err(|e| TypeDefinitionError::InvalidConstraint(e.to_string()))
    }

    /// The variant's implementation of the value contract.
    pub fn kind(&self) -> &dyn ValueKind {
        match self {
            Type::Integer(t) => t,
            Type::Number(t) => t,
            Type::String(t) => t,
            Type::Boolean(t) => t,
            Type::Enumeration(t) => t,
            Type::DateTime(t) => t,
            Type::Geometry(t) => t,
            Type::Image(t) => t,
            Type::Wsi(t) => t,
            Type::File(t) => t,
            Type::Collection(t) => t,
        }
    }

    /// Kind tag.
    pub fn value_type(&self) -> ValueType {
        self.kind().value_type()
    }

    /// Validate a provision value. `null` is accepted only for optional parameters.
    pub fn validate(&self, value: &Value, optional: bool) -> Result<(), TypeValidationError> {
        if value.is_null() {
            return if optional {
                Ok(())
            } else {
                Err(TypeValidationError::ValueRequired)
            };
        }
        self.kind().validate(value)
    }
}
