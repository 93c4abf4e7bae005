//! Row-level data model: typed values, rows and batches.
//!
//! Values of one logical type form a total order (floats use IEEE total
//! ordering), which is what precombine comparison relies on.

use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat};

use crate::transaction_log::{LogicalDataType, LogicalSchema};

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch (UTC).
    Timestamp(i64),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::Utf8(_) => "utf8",
            Value::Date(_) => "date32",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Whether this value can be stored in a column of `data_type`.
    /// `Null` conforms to every type; nullability is checked separately.
    pub fn conforms_to(&self, data_type: &LogicalDataType) -> bool {
        matches!(
            (self, data_type),
            (Value::Null, _)
                | (Value::Bool(_), LogicalDataType::Bool)
                | (Value::Int64(_), LogicalDataType::Int64)
                | (Value::Float64(_), LogicalDataType::Float64)
                | (Value::Utf8(_), LogicalDataType::Utf8)
                | (Value::Date(_), LogicalDataType::Date32)
                | (Value::Timestamp(_), LogicalDataType::Timestamp { .. })
        )
    }

    /// Total order between two non-null values of the same type.
    ///
    /// Returns `None` when the values have different types or either is null.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        Some(match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => return None,
        })
    }
}

/// String form used for record keys and partition paths.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int64(i) => write!(f, "{i}"),
            // Debug keeps a trailing ".0" on integral floats.
            Value::Float64(x) => write!(f, "{x:?}"),
            Value::Utf8(s) => f.write_str(s),
            Value::Date(days) => match NaiveDate::from_num_days_from_ce_opt(
                days.saturating_add(UNIX_EPOCH_DAYS_FROM_CE),
            ) {
                Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
                None => write!(f, "{days}"),
            },
            Value::Timestamp(micros) => match DateTime::from_timestamp_micros(*micros) {
                Some(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                None => write!(f, "{micros}"),
            },
        }
    }
}

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
pub(crate) const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// An ordered mapping from field name to value.
///
/// Field order is not significant for schema conformance; rows are
/// normalised to schema order before they are encoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    /// An empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Row::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing any previous value of the same name in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Iterate `(name, value)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values in row order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

/// A batch of rows sharing one logical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    schema: LogicalSchema,
    rows: Vec<Row>,
}

impl RowBatch {
    /// Pair a schema with rows. Conformance is checked by the write path.
    pub fn new(schema: LogicalSchema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    /// The batch schema.
    pub fn schema(&self) -> &LogicalSchema {
        &self.schema
    }

    /// The rows in arrival order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Split into schema and rows.
    pub fn into_parts(self) -> (LogicalSchema, Vec<Row>) {
        (self.schema, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms_are_stable() {
        assert_eq!(Value::from(69.0).to_string(), "69.0");
        assert_eq!(Value::from(35.5).to_string(), "35.5");
        assert_eq!(Value::from(7_i64).to_string(), "7");
        assert_eq!(Value::from("Joe").to_string(), "Joe");
        let d = NaiveDate::from_ymd_opt(2000, 1, 1).expect("date");
        assert_eq!(Value::from(d).to_string(), "2000-01-01");
        assert_eq!(Value::Date(0).to_string(), "1970-01-01");
        assert_eq!(Value::Timestamp(1_500_000).to_string(), "1970-01-01T00:00:01.500Z");
    }

    #[test]
    fn compare_is_total_within_a_type() {
        assert_eq!(
            Value::from(5_i64).compare(&Value::from(7_i64)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Float64(f64::NAN).compare(&Value::Float64(1.0)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::from("a").compare(&Value::from(1_i64)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn row_set_replaces_in_place() {
        let mut row = Row::new().with("a", 1_i64).with("b", "x");
        row.set("a", 2_i64);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("a"), Some(&Value::Int64(2)));
        let names: Vec<_> = row.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(row.get("zzz"), None);
    }

    #[test]
    fn conforms_to_checks_types_not_nullability() {
        assert!(Value::Null.conforms_to(&LogicalDataType::Int64));
        assert!(Value::from(1.0).conforms_to(&LogicalDataType::Float64));
        assert!(!Value::from(1_i64).conforms_to(&LogicalDataType::Float64));
    }
}
