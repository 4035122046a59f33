//! Row/Value <-> Rhai type conversion utilities.

use rhai::{Dynamic, Map};
use sf_types::{Row, Value};

/// Converts a column value to a Rhai Dynamic.
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::String(s) => Dynamic::from(s.clone()),
    }
}

/// Converts a Rhai Dynamic to a column value.
///
/// Returns `None` for anything that is not a scalar (maps, arrays, custom
/// types, function pointers). Characters become one-character strings.
pub fn dynamic_to_value(value: &Dynamic) -> Option<Value> {
    if value.is_unit() {
        return Some(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Some(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Some(Value::Float(f));
    }
    if let Ok(c) = value.as_char() {
        return Some(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value.clone().into_string().ok().map(Value::String);
    }
    None
}

/// Converts a row to a Rhai object map.
pub fn row_to_map(row: &Row) -> Map {
    let mut map = Map::new();
    for (name, value) in row.iter() {
        map.insert(name.into(), value_to_dynamic(value));
    }
    map
}

/// Converts a Rhai object map to a row.
///
/// Columns that also appear in `template` keep the template's order and come
/// first; new columns follow in name order. Every value must be a scalar.
pub fn map_to_row(map: &Map, template: Option<&Row>) -> Result<Row, String> {
    let mut row = Row::with_capacity(map.len());

    if let Some(template) = template {
        for name in template.column_names() {
            if let Some(value) = map.get(name) {
                row.set(name, scalar(name, value)?);
            }
        }
    }

    // Map keys iterate in sorted order
    for (name, value) in map.iter() {
        let name = name.as_str();
        if row.contains(name) {
            continue;
        }
        row.set(name, scalar(name, value)?);
    }

    Ok(row)
}

fn scalar(name: &str, value: &Dynamic) -> Result<Value, String> {
    dynamic_to_value(value).ok_or_else(|| {
        format!(
            "column '{name}' holds a value of type {} which is not a scalar",
            value.type_name()
        )
    })
}
