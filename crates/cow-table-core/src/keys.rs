//! Record key and precombine extraction.
//!
//! A single key field yields the value's string form. Multiple key fields
//! yield the composite form `f1:v1,f2:v2`.

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::row::{Row, Value};
use crate::schema::{MissingFieldSnafu, NullPrecombineSnafu, NullRecordKeySnafu, SchemaResult};

/// Identity of a logical record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Wrap an already-derived key string.
    pub fn new(key: impl Into<String>) -> Self {
        RecordKey(key.into())
    }

    /// Borrow the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives record keys and precombine values from rows.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    record_key_fields: Vec<String>,
    precombine_field: Option<String>,
}

impl KeyGenerator {
    /// Generator for the given key fields and optional precombine field.
    pub fn new(record_key_fields: Vec<String>, precombine_field: Option<String>) -> Self {
        Self {
            record_key_fields,
            precombine_field,
        }
    }

    /// Record key of `row` (batch position `index`, used in errors).
    pub fn record_key(&self, index: usize, row: &Row) -> SchemaResult<RecordKey> {
        let mut parts = Vec::with_capacity(self.record_key_fields.len());
        for field in &self.record_key_fields {
            let value = row.get(field).context(MissingFieldSnafu {
                row: index,
                field: field.clone(),
            })?;
            ensure!(
                !value.is_null(),
                NullRecordKeySnafu {
                    row: index,
                    field: field.clone(),
                }
            );
            parts.push((field, value));
        }

        Ok(match parts.as_slice() {
            [(_, value)] => RecordKey(value.to_string()),
            _ => RecordKey(
                parts
                    .iter()
                    .map(|(f, v)| format!("{f}:{v}"))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        })
    }

    /// Precombine value of `row`, or `None` when no precombine field is set.
    pub fn precombine(&self, index: usize, row: &Row) -> SchemaResult<Option<Value>> {
        let Some(field) = &self.precombine_field else {
            return Ok(None);
        };
        let value = row.get(field).context(MissingFieldSnafu {
            row: index,
            field: field.clone(),
        })?;
        ensure!(
            !value.is_null(),
            NullPrecombineSnafu {
                row: index,
                field: field.clone(),
            }
        );
        Ok(Some(value.clone()))
    }
}

/// Whether an incoming version replaces an existing one.
///
/// The greater precombine value wins and ties go to the incoming version, so
/// with no precombine field the latest arrival always wins.
pub fn incoming_wins(incoming: Option<&Value>, existing: Option<&Value>) -> bool {
    match (incoming, existing) {
        (Some(i), Some(e)) => i.compare(e) != Some(Ordering::Less),
        _ => true,
    }
}
