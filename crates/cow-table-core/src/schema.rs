//! Schema enforcement for incoming batches and rows.
//!
//! Rule: **no schema evolution**. The first write adopts the batch schema;
//! every later batch must match it exactly:
//! - same column set (order-insensitive)
//! - same logical data type (including timestamp timezone)
//! - same `nullable` flag.
//!
//! Rows are checked individually and normalised to schema order.

use std::collections::HashMap;

use snafu::prelude::*;

use crate::row::{Row, Value};
use crate::transaction_log::{LogicalDataType, LogicalField, LogicalSchema, LogicalSchemaError};

/// Validation errors for batches, rows and configured fields.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SchemaError {
    /// Logical schema construction or validation failed.
    #[snafu(display("Logical schema is invalid: {source}"))]
    LogicalSchema {
        /// The underlying logical schema error.
        source: LogicalSchemaError,
    },

    /// The batch is missing a column of the table schema.
    #[snafu(display("Batch schema is missing required column {column}"))]
    MissingColumn {
        /// The name of the missing column.
        column: String,
    },

    /// The batch has a column the table schema does not.
    #[snafu(display("Batch schema has extra column {column} not present in table schema"))]
    ExtraColumn {
        /// The name of the extra column.
        column: String,
    },

    /// Column exists in both schemas, but type or nullability differ.
    #[snafu(display(
        "Type mismatch for column {column}: table has {table_field}, batch has {batch_field}"
    ))]
    TypeMismatch {
        /// The column name.
        column: String,
        /// The table's definition of the column.
        table_field: String,
        /// The batch's definition of the column.
        batch_field: String,
    },

    /// A row lacks a field required by the schema or configuration.
    #[snafu(display("Row {row} is missing field {field}"))]
    MissingField {
        /// Zero-based row position in the batch.
        row: usize,
        /// The missing field.
        field: String,
    },

    /// A row carries a field that is not in the schema.
    #[snafu(display("Row {row} has unknown field {field}"))]
    UnknownField {
        /// Zero-based row position in the batch.
        row: usize,
        /// The unknown field.
        field: String,
    },

    /// A row value does not match the column type.
    #[snafu(display("Row {row} field {field}: expected {expected}, found {found}"))]
    ValueTypeMismatch {
        /// Zero-based row position in the batch.
        row: usize,
        /// The offending field.
        field: String,
        /// The declared type.
        expected: LogicalDataType,
        /// Type name of the supplied value.
        found: &'static str,
    },

    /// A non-nullable column received a null.
    #[snafu(display("Row {row} field {field} is null but the column is not nullable"))]
    NullValue {
        /// Zero-based row position in the batch.
        row: usize,
        /// The offending field.
        field: String,
    },

    /// A record key field is null.
    #[snafu(display("Row {row} has a null record key field {field}"))]
    NullRecordKey {
        /// Zero-based row position in the batch.
        row: usize,
        /// The null key field.
        field: String,
    },

    /// The precombine field is null.
    #[snafu(display("Row {row} has a null precombine field {field}"))]
    NullPrecombine {
        /// Zero-based row position in the batch.
        row: usize,
        /// The precombine field.
        field: String,
    },

    /// A configured key, partition or precombine field is not in the schema.
    #[snafu(display("Configured {role} field {field} is not a column of the schema"))]
    UnknownConfiguredField {
        /// Which setting names the field.
        role: &'static str,
        /// The field name.
        field: String,
    },
}

/// A convenience type alias for schema validation results.
pub type SchemaResult<T> = Result<T, SchemaError>;

fn columns_by_name(schema: &LogicalSchema) -> HashMap<&str, &LogicalField> {
    schema
        .columns()
        .iter()
        .map(|col| (col.name.as_str(), col))
        .collect()
}

/// Enforce the "no schema evolution" rule between a table and a batch.
///
/// Name-based, not order-based.
pub fn ensure_schema_exact_match(
    table_schema: &LogicalSchema,
    batch_schema: &LogicalSchema,
) -> SchemaResult<()> {
    let batch_cols = columns_by_name(batch_schema);

    for tcol in table_schema.columns() {
        match batch_cols.get(tcol.name.as_str()) {
            None => {
                return MissingColumnSnafu {
                    column: tcol.name.clone(),
                }
                .fail();
            }
            Some(bcol) if bcol.data_type != tcol.data_type || bcol.nullable != tcol.nullable => {
                return TypeMismatchSnafu {
                    column: tcol.name.clone(),
                    table_field: tcol.to_string(),
                    batch_field: bcol.to_string(),
                }
                .fail();
            }
            Some(_) => {}
        }
    }

    if batch_schema.len() != table_schema.len() {
        let table_cols = columns_by_name(table_schema);
        if let Some(extra) = batch_schema
            .columns()
            .iter()
            .find(|c| !table_cols.contains_key(c.name.as_str()))
        {
            return ExtraColumnSnafu {
                column: extra.name.clone(),
            }
            .fail();
        }
    }

    Ok(())
}

/// Check that every field named by the table settings exists in `schema`.
pub fn ensure_configured_fields(
    schema: &LogicalSchema,
    record_key_fields: &[String],
    partition_path_fields: &[String],
    precombine_field: Option<&str>,
) -> SchemaResult<()> {
    let roles = record_key_fields
        .iter()
        .map(|f| ("record key", f.as_str()))
        .chain(partition_path_fields.iter().map(|f| ("partition path", f.as_str())))
        .chain(precombine_field.map(|f| ("precombine", f)));

    for (role, field) in roles {
        ensure!(
            schema.field(field).is_some(),
            UnknownConfiguredFieldSnafu { role, field }
        );
    }
    Ok(())
}

/// Validate `row` (at batch position `index`) against `schema` and return it
/// normalised to schema order.
///
/// Absent nullable fields are filled with nulls.
pub fn conform_row(schema: &LogicalSchema, index: usize, row: &Row) -> SchemaResult<Row> {
    for (name, _) in row.iter() {
        ensure!(
            schema.field(name).is_some(),
            UnknownFieldSnafu { row: index, field: name }
        );
    }

    let mut out = Row::new();
    for col in schema.columns() {
        let value = match row.get(&col.name) {
            Some(v) => v.clone(),
            None if col.nullable => Value::Null,
            None => {
                return MissingFieldSnafu {
                    row: index,
                    field: col.name.clone(),
                }
                .fail();
            }
        };

        ensure!(
            !value.is_null() || col.nullable,
            NullValueSnafu {
                row: index,
                field: col.name.clone(),
            }
        );
        ensure!(
            value.conforms_to(&col.data_type),
            ValueTypeMismatchSnafu {
                row: index,
                field: col.name.clone(),
                expected: col.data_type.clone(),
                found: value.type_name(),
            }
        );
        out.set(col.name.clone(), value);
    }
    Ok(out)
}
