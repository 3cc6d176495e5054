//! Wire serialization of execution results
//!
//! Whole-graph results cross the WebSocket as JSON with every leaf rendered
//! as a string: the browser editor displays values verbatim and must never
//! have to guess at numeric formatting or null handling. Rules:
//!
//! - `null` becomes the literal string `"None"`
//! - booleans, numbers, and strings become their display strings
//! - arrays and objects recurse (record-oriented frames are arrays of
//!   objects and need no special casing)
//! - node ids become decimal strings at the top level
//!
//! The output is always JSON-encodable and contains no nulls and no
//! non-string leaves.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Serialized whole-graph results: node-id strings to output objects.
pub type SerializedResults = Map<String, Value>;

/// Recursively serialize one value to its wire form.
pub fn serialize_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::String("None".to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        Value::String(s) => Value::String(s.clone()),
        Value::Array(items) => Value::Array(items.iter().map(serialize_value).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), serialize_value(v)))
                .collect(),
        ),
    }
}

/// Serialize whole-graph results for transmission: integer node ids become
/// decimal strings and every output value is recursively stringified.
pub fn serialize_results(results: &HashMap<u64, HashMap<String, Value>>) -> SerializedResults {
    let mut serialized = SerializedResults::new();
    for (node_id, outputs) in results {
        let mut node_outputs = Map::new();
        for (name, value) in outputs {
            node_outputs.insert(name.clone(), serialize_value(value));
        }
        serialized.insert(node_id.to_string(), Value::Object(node_outputs));
    }
    serialized
}
