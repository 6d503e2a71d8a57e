// SPDX-License-Identifier: Apache-2.0

//! Value types shared by the DSN builder, the pool and the row iterator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A connection parameter value as it arrives from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Connection parameters keyed by name, in whatever order the caller sent them.
pub type ConnectionDescriptor = HashMap<String, Scalar>;

/// Connection parameters after empty strings were dropped. Sorted by key, so
/// serializing it gives the same text for the same set of pairs.
pub type CleanedParams = BTreeMap<String, Scalar>;

/// Removes every parameter whose value is an empty string. Other falsy
/// values (`0`, `false`) are kept.
pub fn clean_params(params: &ConnectionDescriptor) -> CleanedParams {
    params
        .iter()
        .filter(|(_, value)| !matches!(value, Scalar::Text(s) if s.is_empty()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Universal value representation for row cells and bound parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Some backends hand back byte buffers for columns that are text in
    /// practice (MySQL `VARCHAR BINARY`, SQLite blobs holding strings).
    /// Records expose those as text.
    pub fn normalize_binary(self) -> Value {
        match self {
            Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            other => other,
        }
    }

    /// Text form used by positional scans; `None` for SQL NULL.
    pub fn to_nullable_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Json(j) => Some(j.to_string()),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A single row of data (indexed by column order)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// One decoded row keyed by column name.
///
/// Column names are expected to be unique within a result set. When a query
/// returns two columns with the same name, the later column silently
/// overwrites the earlier one.
pub type Record = BTreeMap<String, Value>;

/// Named query parameters, bound to `:name` placeholders.
pub type QueryParams = HashMap<String, Value>;
