//! Record-related domain models
//!
//! Source objects arrive as JSON maps. They are flattened into [`Record`]s
//! of scalar [`FieldValue`]s and accumulated into a [`Dataset`] per form.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One submission as returned by the source
pub type SourceObject = serde_json::Map<String, Value>;

/// Scalar cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicit "no value" marker
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a JSON scalar
    ///
    /// Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .unwrap_or_else(|| FieldValue::Text(n.to_string())),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => FieldValue::Text(value.to_string()),
        }
    }

    /// Empty text, used for fields a record does not carry
    pub fn empty() -> Self {
        FieldValue::Text(String::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) if x.is_finite() => write!(f, "{}", x),
            FieldValue::Float(_) => Ok(()),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

/// Flat record keyed by dotted field path, in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut FieldValue> {
        self.fields.values_mut()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// One page of results from the source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<SourceObject>,
    pub has_next: bool,
}

/// Records of one form plus the union of their columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: IndexSet<String>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, extending the column set with unseen keys
    pub fn push(&mut self, record: Record) {
        for key in record.keys() {
            if !self.columns.contains(key) {
                self.columns.insert(key.clone());
            }
        }
        self.records.push(record);
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.columns.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Column names in first-seen order
    pub fn header(&self) -> Vec<String> {
        self.columns.iter().cloned().collect()
    }

    /// Cell values aligned with [`Dataset::header`]
    pub fn rows(&self) -> Vec<Vec<FieldValue>> {
        self.records
            .iter()
            .map(|record| {
                self.columns
                    .iter()
                    .map(|col| record.get(col).cloned().unwrap_or_else(FieldValue::empty))
                    .collect()
            })
            .collect()
    }
}
