//! Record flattening and normalization
//!
//! Nested source objects become dotted-path records. Before a dataset is
//! written, infinite floats become the no-value marker and gaps or `NaN`s
//! become empty text so every row carries every column.

use serde_json::Value;

use crate::models::{Dataset, FieldValue, Record, SourceObject};

/// Flatten a nested object into a record
///
/// `{"a": {"b": 1}}` yields `a.b = 1`. Empty nested objects yield no keys,
/// arrays are kept as their JSON text.
pub fn flatten(object: &SourceObject) -> Record {
    let mut record = Record::new();
    flatten_into(&mut record, None, object);
    record
}

fn flatten_into(record: &mut Record, prefix: Option<&str>, object: &SourceObject) {
    for (key, value) in object {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(record, Some(&path), nested),
            other => record.insert(path, FieldValue::from_json(other)),
        }
    }
}

/// Make every record carry every column with a representable value
///
/// Column order and row order are preserved. Applying it twice changes
/// nothing.
///
/// JSON nulls from the source stay [`FieldValue::Null`], the no-value marker,
/// and are written as SQL `NULL` or an empty CSV cell. Missing fields and
/// NaN become empty text instead.
pub fn normalize(mut dataset: Dataset) -> Dataset {
    // Infinite values carry no meaning downstream
    for record in dataset.records_mut() {
        for value in record.values_mut() {
            if matches!(value, FieldValue::Float(x) if x.is_infinite()) {
                *value = FieldValue::Null;
            }
        }
    }

    let columns = dataset.header();
    for record in dataset.records_mut() {
        for value in record.values_mut() {
            if matches!(value, FieldValue::Float(x) if x.is_nan()) {
                *value = FieldValue::empty();
            }
        }
        for column in &columns {
            if !record.contains(column) {
                record.insert(column.clone(), FieldValue::empty());
            }
        }
    }

    dataset
}
