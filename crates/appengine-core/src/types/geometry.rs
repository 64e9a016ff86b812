// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `geometry` kind: GeoJSON geometries passed around as text.
//!
//! Accepts a bare geometry object or a `Feature` wrapping one. Shapes drawn as
//! circles or rectangles are flagged through `properties.subType`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{StoredValue, TypeValidationError, ValueKind, ValueType};

/// Geometry types a value may have.
pub const SUPPORTED_GEOMETRY_TYPES: [&str; 6] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
];

const SUPPORTED_SUBTYPES: [&str; 2] = ["Circle", "Rectangle"];

/// GeoJSON geometry; carries no constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryType {}

fn invalid(message: impl Into<String>) -> TypeValidationError {
    TypeValidationError::InvalidGeoJson(message.into())
}

fn check_position(node: &Value) -> Result<(), TypeValidationError> {
    match node.as_array() {
        Some(coords) if coords.len() >= 2 && coords.iter().all(Value::is_number) => Ok(()),
        _ => Err(invalid("position must hold at least two numbers")),
    }
}

fn items(node: &Value) -> Result<&Vec<Value>, TypeValidationError> {
    node.as_array()
        .ok_or_else(|| invalid("coordinates must be an array"))
}

fn check_line(node: &Value) -> Result<(), TypeValidationError> {
    let points = items(node)?;
    if points.len() < 2 {
        return Err(invalid("line string needs at least two positions"));
    }
    points.iter().try_for_each(check_position)
}

fn check_polygon(node: &Value) -> Result<(), TypeValidationError> {
    let rings = items(node)?;
    if rings.is_empty() {
        return Err(invalid("polygon needs an exterior ring"));
    }
    for ring in rings {
        let points = items(ring)?;
        points.iter().try_for_each(check_position)?;
        if points.len() < 4 {
            return Err(invalid("linear ring needs at least four positions"));
        }
        if points.first() != points.last() {
            return Err(invalid("linear ring is not closed"));
        }
    }
    Ok(())
}

fn check_coordinates(kind: &str, coordinates: &Value) -> Result<(), TypeValidationError> {
    match kind {
        "Point" => check_position(coordinates),
        "MultiPoint" => items(coordinates)?.iter().try_for_each(check_position),
        "LineString" => check_line(coordinates),
        "MultiLineString" => items(coordinates)?.iter().try_for_each(check_line),
        "Polygon" => check_polygon(coordinates),
        "MultiPolygon" => items(coordinates)?.iter().try_for_each(check_polygon),
        other => Err(TypeValidationError::UnsupportedGeometryType(
            other.to_string(),
        )),
    }
}

fn check_properties(properties: Option<&Map<String, Value>>) -> Result<(), TypeValidationError> {
    let Some(properties) = properties.filter(|p| !p.is_empty()) else {
        return Ok(());
    };

    let subtype = properties
        .get("subType")
        .ok_or(TypeValidationError::MissingGeometrySubtype)?;
    let subtype = subtype.as_str().unwrap_or_default();
    if !SUPPORTED_SUBTYPES.contains(&subtype) {
        return Err(TypeValidationError::UnsupportedGeometrySubtype(
            subtype.to_string(),
        ));
    }
    if subtype == "Circle" && !properties.contains_key("radius") {
        return Err(TypeValidationError::MissingRadius);
    }
    Ok(())
}

/// Validate an already-parsed GeoJSON geometry or feature.
pub fn validate_geojson(root: &Value) -> Result<(), TypeValidationError> {
    let object = root
        .as_object()
        .ok_or_else(|| invalid("GeoJSON must be an object"))?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing 'type'"))?;

    let (geometry, properties) = if kind == "Feature" {
        let geometry = object
            .get("geometry")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("feature without geometry"))?;
        (geometry, object.get("properties").and_then(Value::as_object))
    } else {
        (object, object.get("properties").and_then(Value::as_object))
    };

    let geometry_kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing geometry 'type'"))?;
    if !SUPPORTED_GEOMETRY_TYPES.contains(&geometry_kind) {
        return Err(TypeValidationError::UnsupportedGeometryType(
            geometry_kind.to_string(),
        ));
    }
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| invalid("missing 'coordinates'"))?;
    check_coordinates(geometry_kind, coordinates)?;

    check_properties(properties)
}

/// Parse GeoJSON text and validate it.
pub fn validate_geojson_text(text: &str) -> Result<(), TypeValidationError> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| TypeValidationError::GeoJsonParse(e.to_string()))?;
    validate_geojson(&root)
}

impl ValueKind for GeometryType {
    fn value_type(&self) -> ValueType {
        ValueType::Geometry
    }

    fn validate(&self, value: &Value) -> Result<(), TypeValidationError> {
        let text = value
            .as_str()
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Geometry))?;
        validate_geojson_text(text)
    }

    fn stored_value(&self, value: &Value) -> Result<StoredValue, TypeValidationError> {
        value
            .as_str()
            .map(|s| StoredValue::String(s.to_string()))
            .ok_or(TypeValidationError::TypeMismatch(ValueType::Geometry))
    }

    fn parse_text(&self, text: &str) -> Result<Value, TypeValidationError> {
        validate_geojson_text(text)?;
        Ok(Value::String(text.to_string()))
    }
}
