//! Schema and record flattening
//!
//! Nested objects are projected into a flat column set up to a configured
//! depth. Column names are the property path joined with `__`; arrays are
//! always terminal columns. Both walks follow the same rule so a flattened
//! record only ever carries columns of its flattened schema.

use crate::column_type::declared_types;
use crate::error::{SinkError, SinkResult};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Separator between path components of a flattened column name
pub const SEPARATOR: &str = "__";

/// Column names at or above this length get their components shortened
const MAX_COLUMN_NAME_LEN: usize = 255;

/// Flat column name → JSON schema property, in source property order
pub type FlatSchema = IndexMap<String, Value>;

/// Flat column name → scalar value (objects and arrays as JSON text)
pub type FlatRecord = IndexMap<String, Value>;

/// Flatten the `properties` of a JSON schema
pub fn flatten_schema(schema: &Value, max_level: usize) -> SinkResult<FlatSchema> {
    let mut flat = FlatSchema::new();
    walk_schema(schema, &[], 0, max_level, &mut flat)?;
    Ok(flat)
}

fn walk_schema(
    node: &Value,
    parent: &[&str],
    level: usize,
    max_level: usize,
    flat: &mut FlatSchema,
) -> SinkResult<()> {
    let Some(properties) = node.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (name, property) in properties {
        let descend = declared_types(property).contains(&"object")
            && property.get("properties").map_or(false, Value::is_object)
            && level < max_level;

        if descend {
            let mut path = parent.to_vec();
            path.push(name);
            walk_schema(property, &path, level + 1, max_level, flat)?;
            continue;
        }

        let column = flatten_key(name, parent);
        let property = if property.get("type").is_some() {
            property.clone()
        } else {
            first_alternative(property).unwrap_or_else(|| property.clone())
        };

        if flat.insert(column.clone(), property).is_some() {
            return Err(SinkError::SchemaMismatch(format!(
                "Duplicate column name produced in schema: {}",
                column
            )));
        }
    }

    Ok(())
}

/// First `anyOf`/`oneOf` alternative, made nullable
fn first_alternative(property: &Value) -> Option<Value> {
    let alternatives = property
        .get("anyOf")
        .or_else(|| property.get("oneOf"))
        .and_then(Value::as_array)?;
    let mut first = alternatives.first()?.clone();

    let mut types: Vec<Value> = declared_types(&first)
        .into_iter()
        .map(|t| Value::String(t.to_string()))
        .collect();
    if !types.iter().any(|t| t == "null") {
        types.insert(0, Value::String("null".to_string()));
    }
    if let Value::Object(map) = &mut first {
        map.insert("type".to_string(), Value::Array(types));
    }
    Some(first)
}

/// Flatten one record following the same rule as its flattened schema
pub fn flatten_record(record: &Value, schema: &FlatSchema, max_level: usize) -> FlatRecord {
    let mut flat = FlatRecord::new();
    if let Value::Object(object) = record {
        walk_record(object, &[], 0, max_level, schema, &mut flat);
    }
    flat
}

fn walk_record(
    object: &Map<String, Value>,
    parent: &[&str],
    level: usize,
    max_level: usize,
    schema: &FlatSchema,
    flat: &mut FlatRecord,
) {
    for (name, value) in object {
        let column = flatten_key(name, parent);

        if schema.contains_key(&column) {
            match value {
                Value::Null => {}
                Value::Object(_) | Value::Array(_) => {
                    flat.insert(column, Value::String(value.to_string()));
                }
                scalar => {
                    flat.insert(column, scalar.clone());
                }
            }
        } else if let Value::Object(child) = value {
            if level < max_level {
                let mut path = parent.to_vec();
                path.push(name);
                walk_record(child, &path, level + 1, max_level, schema, flat);
            }
        }
    }
}

/// Join a property path into a column name, shortening over-long names
fn flatten_key(name: &str, parent: &[&str]) -> String {
    let mut parts: Vec<String> = parent.iter().map(|p| p.to_string()).collect();
    parts.push(name.to_string());

    let mut index = 0;
    while parts.join(SEPARATOR).len() >= MAX_COLUMN_NAME_LEN && index < parts.len() {
        let initials: String = camelize(&parts[index])
            .chars()
            .filter(|c| !c.is_ascii_lowercase())
            .collect();
        parts[index] = if initials.chars().count() > 1 {
            initials.to_lowercase()
        } else {
            parts[index].chars().take(3).collect::<String>().to_lowercase()
        };
        index += 1;
    }

    parts.join(SEPARATOR)
}

/// `some_long_name` → `SomeLongName`
fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
