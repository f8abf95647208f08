//! Field values and sample rows.
//!
//! Device responses are dynamically shaped JSON documents whose field sets
//! change between firmware versions. A [`Row`] models one sample as a map from
//! field name to a tagged [`Value`]; combining rows with different field sets
//! takes the union of their schemas, with absent fields reading as
//! [`Value::Null`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field map of a single row, ordered by field name.
pub type Fields = BTreeMap<String, Value>;

/// A single field value.
///
/// Serializes untagged, so a column of values renders as a plain JSON array
/// (`[1.5, null, "text"]`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or unreported.
    #[default]
    Null,
    /// Boolean flag, e.g. `obstructed`.
    Bool(bool),
    /// Any numeric measurement.
    Number(f64),
    /// Free-form text, including 64-bit integers that the device encodes as
    /// strings.
    Text(String),
    /// Arrays (and objects nested inside arrays) kept as-is.
    Structured(serde_json::Value),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as `f64` if it is a [`Value::Number`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interprets the value as a number, also accepting numeric text.
    ///
    /// The device encodes 64-bit counters (`uptimeS`, `current`) as JSON
    /// strings, so readers of those fields use this instead of [`as_f64`].
    ///
    /// [`as_f64`]: Value::as_f64
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts a scalar JSON value. Arrays and objects become
    /// [`Value::Structured`].
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Structured(other),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// One sample point.
///
/// `index` is `None` when the source does not number its samples; the store
/// assigns one on append.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// Source-assigned sample index, if any.
    pub index: Option<u64>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Field values.
    pub fields: Fields,
}

impl Row {
    /// Creates an empty row at `timestamp`.
    pub fn new(timestamp: f64) -> Self {
        Self {
            index: None,
            timestamp,
            fields: Fields::new(),
        }
    }

    /// Sets the source-assigned index.
    #[must_use]
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    /// Adds or replaces a field.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Returns a field value, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Builds a row from a JSON object, flattening nested objects into dotted
    /// field names (`{"deviceState": {"uptimeS": "5"}}` becomes
    /// `deviceState.uptimeS`).
    pub fn from_json_object(
        timestamp: f64,
        object: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut row = Self::new(timestamp);
        flatten_into(&mut row.fields, None, object);
        row
    }
}

fn flatten_into(
    fields: &mut Fields,
    prefix: Option<&str>,
    object: serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in object {
        let name = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            serde_json::Value::Object(inner) => flatten_into(fields, Some(&name), inner),
            other => {
                fields.insert(name, Value::from_json(other));
            }
        }
    }
}
