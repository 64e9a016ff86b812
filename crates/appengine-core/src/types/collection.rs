// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `array` kind: homogeneous collections, possibly nested.
//!
//! # Provision forms
//!
//! - a JSON list of raw items: `[1, 2, 3]`
//! - a JSON list of indexed items: `[{"index": 0, "value": 1}, ...]`
//! - for geometry subtypes, a GeoJSON `FeatureCollection` or
//!   `GeometryCollection` string
//!
//! # Storage layout
//!
//! ```text
//! <name>/
//! <name>/array.yml        size: N
//! <name>/0                leaf item (geometry items end with .geojson)
//! <name>/1/               nested collection, same layout
//! ```
//!
//! Read-back values are lists of `{index, value}` objects.

use std::collections::BTreeSet;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Charset, StoredValue, Type, TypeValidationError, ValueKind, ValueType};
use crate::storage::{StorageData, StorageDataEntry};

/// Name of the size manifest written into every collection directory.
pub const MANIFEST_NAME: &str = "array.yml";

const GEOJSON_SUFFIX: &str = ".geojson";

#[derive(Debug, Serialize, Deserialize)]
struct ArrayManifest {
    size: usize,
}

/// Collection of items of one subtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionType {
    /// Item type; may itself be an `array`.
    #[serde(deserialize_with = "deserialize_subtype")]
    pub subtype: Box<Type>,
    /// Minimum number of items.
    #[serde(default)]
    pub min_size: usize,
    /// Maximum number of items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
}

fn deserialize_subtype<'de, D>(deserializer: D) -> Result<Box<Type>, D::Error>
where
    D: Deserializer<'de>,
{
    let node = Value::deserialize(deserializer)?;
    Type::from_definition(&node)
        .map(Box::new)
        .map_err(de::Error::custom)
}

fn structure(message: impl Into<String>) -> TypeValidationError {
    TypeValidationError::InvalidCollectionStructure(message.into())
}

fn item_error(index: usize) -> impl FnOnce(TypeValidationError) -> TypeValidationError {
    move |reason| TypeValidationError::InvalidCollectionItem {
        index,
        reason: Box::new(reason),
    }
}

/// Number of distinct items directly beneath `dir/`, manifest excluded.
fn item_count(data: &StorageData, dir: &str) -> usize {
    let prefix = format!("{}/", dir);
    data.entries()
        .iter()
        .filter_map(|e| e.name.strip_prefix(&prefix))
        .filter_map(|rest| rest.split('/').next())
        .filter(|item| !item.is_empty() && *item != MANIFEST_NAME)
        .collect::<BTreeSet<_>>()
        .len()
}

fn find_file<'a>(data: &'a StorageData, name: &str) -> Option<&'a StorageDataEntry> {
    data.entries()
        .iter()
        .find(|e| !e.is_dir() && e.name == name)
}

impl CollectionType {
    /// Collection of `subtype` without size bounds.
    pub fn of(subtype: Type) -> Self {
        Self {
            subtype: Box::new(subtype),
            min_size: 0,
            max_size: None,
        }
    }

    fn nested(&self) -> Option<&CollectionType> {
        match self.subtype.as_ref() {
            Type::Collection(nested) => Some(nested),
            _ => None,
        }
    }

    fn is_geometry(&self) -> bool {
        matches!(self.subtype.as_ref(), Type::Geometry(_))
    }

    fn check_size(&self, size: usize) -> Result<(), TypeValidationError> {
        if size < self.min_size || self.max_size.is_some_and(|max| size > max) {
            return Err(TypeValidationError::InvalidCollectionSize);
        }
        Ok(())
    }

    /// Items of a provision value, ordered by index.
    fn items(&self, value: &Value) -> Result<Vec<Value>, TypeValidationError> {
        match value {
            Value::Array(list) => Self::indexed_items(list),
            Value::String(text) if self.is_geometry() => Self::geojson_items(text),
            _ => Err(TypeValidationError::TypeMismatch(ValueType::Array)),
        }
    }

    fn indexed_items(list: &[Value]) -> Result<Vec<Value>, TypeValidationError> {
        let mut slots: Vec<Option<Value>> = vec![None; list.len()];

        for (position, item) in list.iter().enumerate() {
            let (index, value) = match item.as_object() {
                Some(map) if map.contains_key("index") && map.contains_key("value") => {
                    let index = map
                        .get("index")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| structure("index must be a non-negative integer"))?;
                    (index as usize, map.get("value").cloned().unwrap_or_default())
                }
                _ => (position, item.clone()),
            };

            let slot = slots
                .get_mut(index)
                .ok_or_else(|| structure(format!("index {} is out of range", index)))?;
            if slot.is_some() {
                return Err(structure(format!("index {} appears twice", index)));
            }
            *slot = Some(value);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn geojson_items(text: &str) -> Result<Vec<Value>, TypeValidationError> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| TypeValidationError::GeoJsonParse(e.to_string()))?;
        let invalid = |m: &str| TypeValidationError::InvalidGeoJson(m.to_string());

        let members = match root.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => root.get("features"),
            Some("GeometryCollection") => root.get("geometries"),
            _ => return Err(invalid("expected a FeatureCollection or GeometryCollection")),
        }
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("collection members must be an array"))?;

        Ok(members
            .iter()
            .map(|member| Value::String(member.to_string()))
            .collect())
    }

    fn validate_item(&self, item: &Value) -> Result<(), TypeValidationError> {
        match (self.nested(), item) {
            (Some(nested), Value::String(_)) if nested.is_geometry() => {}
            (Some(_), value) if !value.is_array() => {
                return Err(structure("expected a nested collection"));
            }
            (None, Value::Array(_)) => return Err(structure("unexpected nested collection")),
            _ => {}
        }
        self.subtype.validate(item, false)
    }

    /// `[{index, value}]` form, recursively.
    fn canonical(&self, value: &Value) -> Result<Value, TypeValidationError> {
        let items = self.items(value)?;
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let value = match self.nested() {
                Some(nested) => nested.canonical(item).map_err(item_error(index))?,
                None => item.clone(),
            };
            out.push(json!({ "index": index, "value": value }));
        }
        Ok(Value::Array(out))
    }

    fn item_name(&self, dir: &str, index: usize) -> String {
        if self.is_geometry() {
            format!("{}/{}{}", dir, index, GEOJSON_SUFFIX)
        } else {
            format!("{}/{}", dir, index)
        }
    }

    fn read_tree(
        &self,
        data: &StorageData,
        dir: &str,
        charset: Charset,
    ) -> Result<Value, TypeValidationError> {
        let manifest_name = format!("{}/{}", dir, MANIFEST_NAME);
        let manifest = find_file(data, &manifest_name)
            .ok_or_else(|| structure(format!("{} not found in collection {}/", MANIFEST_NAME, dir)))?;
        let manifest: ArrayManifest = serde_yaml::from_slice(&manifest.data)
            .map_err(|e| structure(format!("unreadable {}: {}", manifest_name, e)))?;
        self.check_size(manifest.size)?;

        let present = item_count(data, dir);
        if manifest.size > present {
            return Err(structure(format!(
                "{} declares {} items but {}/ holds {}",
                manifest_name, manifest.size, dir, present
            )));
        }

        let mut items = Vec::with_capacity(manifest.size);
        for index in 0..manifest.size {
            let value = match self.nested() {
                Some(nested) => nested.read_tree(data, &format!("{}/{}", dir, index), charset),
                None => {
                    let entry = find_file(data, &self.item_name(dir, index))
                        .or_else(|| find_file(data, &format!("{}/{}", dir, index)))
                        .ok_or_else(|| structure(format!("item {} missing from {}/", index, dir)))?;
                    let leaf = StorageData::file(entry.name.clone(), entry.data.clone());
                    self.subtype.kind().from_storage(&leaf, charset)
                }
            }
            .map_err(item_error(index))?;
            items.push(json!({ "index": index, "value": value }));
        }

        Ok(Value::Array(items))
    }
}

impl ValueKind for CollectionType {
    fn value_type(&self) -> ValueType {
        ValueType::Array
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        let items = self.items(value)?;
        self.check_size(items.len())?;
        for (index, item) in items.iter().enumerate() {
            self.validate_item(item).map_err(item_error(index))?;
        }
        Ok(())
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        self.canonical(value).map(StoredValue::Json)
    }

    fn to_storage(
        &self,
        name: &str,
        value: &Value,
        charset: Charset,
    ) -> Result<StorageData, TypeValidationError> {
        let items = self.items(value)?;
        let dir = name.trim_end_matches('/');

        let manifest = serde_yaml::to_string(&ArrayManifest { size: items.len() })
            .map_err(|e| TypeValidationError::Malformed(e.to_string()))?;
        let mut data = StorageData::directory(dir);
        data.add(StorageDataEntry::file(
            format!("{}/{}", dir, MANIFEST_NAME),
            manifest.into_bytes(),
        ));

        for (index, item) in items.iter().enumerate() {
            let child = self
                .subtype
                .kind()
                .to_storage(&self.item_name(dir, index), item, charset)
                .map_err(item_error(index))?;
            data.merge(child);
        }
        Ok(data)
    }

    fn from_storage(
        &self,
        data: &StorageData,
        charset: Charset,
    ) -> Result<Value, TypeValidationError> {
        let root = data
            .entries()
            .iter()
            .filter(|e| e.is_dir())
            .min_by_key(|e| e.depth())
            .ok_or_else(|| structure("collection must be stored as a directory"))?;
        self.read_tree(data, root.name.trim_end_matches('/'), charset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geometry::GeometryType;
    use crate::types::integer::IntegerType;

    fn integers() -> CollectionType {
        CollectionType::of(Type::Integer(IntegerType {
            lt: Some(10),
            ..Default::default()
        }))
    }

    fn names(data: &StorageData) -> Vec<&str> {
        data.entries().iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_subtype_as_string_or_object() {
        let ty = Type::from_definition(&json!({ "id": "array", "subtype": "integer", "max_size": 3 }))
            .unwrap();
        let Type::Collection(collection) = ty else {
            panic!("expected a collection");
        };
        assert_eq!(*collection.subtype, Type::Integer(IntegerType::default()));
        assert_eq!(collection.max_size, Some(3));

        assert!(Type::from_definition(&json!({ "id": "array", "subtype": "tensor" })).is_err());
    }

    #[test]
    fn test_size_bounds() {
        let mut ty = integers();
        ty.min_size = 1;
        ty.max_size = Some(2);
        assert_eq!(ty.validate(&json!([])), Err(TypeValidationError::InvalidCollectionSize));
        assert_eq!(ty.validate(&json!([1, 2])), Ok(()));
        assert_eq!(
            ty.validate(&json!([1, 2, 3])),
            Err(TypeValidationError::InvalidCollectionSize)
        );
    }

    #[test]
    fn test_item_errors_carry_index() {
        let ty = integers();
        assert_eq!(
            ty.validate(&json!([1, 12])),
            Err(TypeValidationError::InvalidCollectionItem {
                index: 1,
                reason: Box::new(TypeValidationError::LessThan),
            })
        );
    }

    #[test]
    fn test_indexed_items_are_reordered() {
        let ty = integers();
        let value = json!([{ "index": 1, "value": 5 }, { "index": 0, "value": 4 }]);
        assert_eq!(ty.validate(&value), Ok(()));
        assert_eq!(
            ty.stored_value(&value).unwrap(),
            StoredValue::Json(json!([{ "index": 0, "value": 4 }, { "index": 1, "value": 5 }]))
        );

        let duplicated = json!([{ "index": 0, "value": 4 }, { "index": 0, "value": 5 }]);
        assert!(matches!(
            ty.validate(&duplicated),
            Err(TypeValidationError::InvalidCollectionStructure(_))
        ));
    }

    #[test]
    fn test_nesting_must_match_declaration() {
        let nested = CollectionType::of(Type::Collection(integers()));
        assert_eq!(nested.validate(&json!([[1, 2], [3]])), Ok(()));
        assert!(matches!(
            nested.validate(&json!([1, 2])),
            Err(TypeValidationError::InvalidCollectionItem { index: 0, .. })
        ));
        assert!(matches!(
            integers().validate(&json!([[1]])),
            Err(TypeValidationError::InvalidCollectionItem { index: 0, .. })
        ));
    }

    #[test]
    fn test_storage_layout_and_read_back() {
        let nested = CollectionType::of(Type::Collection(integers()));
        let data = nested
            .to_storage("matrix", &json!([[1, 2], [3]]), Charset::Utf8)
            .unwrap();
        assert_eq!(
            names(&data),
            vec![
                "matrix/",
                "matrix/array.yml",
                "matrix/0/",
                "matrix/0/array.yml",
                "matrix/0/0",
                "matrix/0/1",
                "matrix/1/",
                "matrix/1/array.yml",
                "matrix/1/0",
            ]
        );

        let value = nested.from_storage(&data, Charset::Utf8).unwrap();
        assert_eq!(
            value,
            json!([
                { "index": 0, "value": [{ "index": 0, "value": 1 }, { "index": 1, "value": 2 }] },
                { "index": 1, "value": [{ "index": 0, "value": 3 }] }
            ])
        );
    }

    #[test]
    fn test_missing_manifest_or_item() {
        let ty = integers();
        let mut data = StorageData::directory("list");
        data.add(StorageDataEntry::file("list/0", b"1".to_vec()));
        assert!(matches!(
            ty.from_storage(&data, Charset::Utf8),
            Err(TypeValidationError::InvalidCollectionStructure(_))
        ));

        data.add(StorageDataEntry::file("list/5", b"1".to_vec()));
        data.add(StorageDataEntry::file("list/array.yml", b"size: 2".to_vec()));
        assert!(matches!(
            ty.from_storage(&data, Charset::Utf8),
            Err(TypeValidationError::InvalidCollectionItem { index: 1, .. })
        ));
    }

    #[test]
    fn test_manifest_size_beyond_items() {
        let ty = integers();
        let mut data = StorageData::directory("list");
        data.add(StorageDataEntry::file(
            "list/array.yml",
            b"size: 18446744073709551615".to_vec(),
        ));
        data.add(StorageDataEntry::file("list/0", b"1".to_vec()));
        assert!(matches!(
            ty.from_storage(&data, Charset::Utf8),
            Err(TypeValidationError::InvalidCollectionStructure(_))
        ));
    }

    #[test]
    fn test_geojson_collection_string() {
        let ty = CollectionType::of(Type::Geometry(GeometryType {}));
        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [0, 0] }, "properties": {} },
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [1, 1] }, "properties": {} }
            ]
        })
        .to_string();
        let value = Value::String(collection);
        assert_eq!(ty.validate(&value), Ok(()));

        let data = ty.to_storage("shapes", &value, Charset::Utf8).unwrap();
        assert!(names(&data).contains(&"shapes/1.geojson"));

        let bad = json!({ "type": "GeometryCollection", "geometries": [{ "type": "Circle" }] });
        assert!(matches!(
            ty.validate(&Value::String(bad.to_string())),
            Err(TypeValidationError::InvalidCollectionItem { index: 0, .. })
        ));
    }
}
