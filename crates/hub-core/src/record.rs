use std::fmt;

use orion_error::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// Record — the unit of flow
// ---------------------------------------------------------------------------

/// An unordered mapping from string keys to dynamically-typed values.
///
/// Records move between components by value; nested fields are addressed with
/// dot paths (`"net.src_ip"`). Missing fields are an absence, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any JSON value; non-object values are rejected.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(StructError::from(CoreReason::RulesetExec)
                .with_detail(format!("record must be a JSON object, got {other}"))),
        }
    }

    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| StructError::from(CoreReason::RulesetExec).with_detail(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    // -- field access -------------------------------------------------------

    /// Look up a dot-path. Returns `None` for any missing segment or when a
    /// path descends into a non-object.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Scalar coercion to string: strings as-is, numbers and booleans
    /// formatted, nested values serialized to canonical JSON. `null` is
    /// treated as absent.
    pub fn get_str(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            nested => Some(nested.to_string()),
        }
    }

    /// Numeric coercion: numbers directly, numeric strings parsed.
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    // -- mutation -----------------------------------------------------------

    /// Set a dot-path, creating intermediate objects as needed. A non-object
    /// intermediate value is replaced.
    pub fn set(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().expect("split yields at least one segment");
        let mut current = &mut self.fields;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().expect("just ensured object");
        }
        current.insert(last.to_string(), value);
    }

    /// Remove a dot-path, returning the removed value if present.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?;
        let mut current = &mut self.fields;
        for segment in segments {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(last)
    }

    /// Merge every entry of a JSON object into the record's top level.
    /// Non-object values are ignored.
    pub fn merge_object(&mut self, value: Value) {
        if let Value::Object(entries) = value {
            for (key, val) in entries {
                self.fields.insert(key, val);
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.fields.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
