//! Columnar encoding of data files.
//!
//! Data files hold a file group's rows prefixed by three provenance columns:
//! `_commit_time`, `_record_key` and `_partition_path`. The
//! [`ColumnarCodec`] trait is the seam between the engine and a physical
//! format; [`parquet::ParquetCodec`] is the implementation used by tables.

pub mod arrow_rows;
pub mod parquet;

use std::{fmt::Debug, sync::Arc};

use ::parquet::errors::ParquetError;
use arrow::{
    array::RecordBatch,
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
};
use bytes::Bytes;
use snafu::prelude::*;

use crate::keys::RecordKey;
use crate::row::Row;
use crate::transaction_log::{
    CommitTime, FileFormat, LogicalDataType, LogicalSchema, LogicalSchemaError, PartitionPath,
};

/// Provenance column: commit instant that last wrote the row.
pub const COMMIT_TIME_COLUMN: &str = "_commit_time";
/// Provenance column: record key.
pub const RECORD_KEY_COLUMN: &str = "_record_key";
/// Provenance column: partition path.
pub const PARTITION_PATH_COLUMN: &str = "_partition_path";

/// Provenance column names in file order.
pub const PROVENANCE_COLUMNS: [&str; 3] =
    [COMMIT_TIME_COLUMN, RECORD_KEY_COLUMN, PARTITION_PATH_COLUMN];

/// A row as stored in a data file, with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Commit that inserted or last updated the row.
    pub commit_time: CommitTime,
    /// Record key of the row.
    pub record_key: RecordKey,
    /// Partition the row lives in.
    pub partition_path: PartitionPath,
    /// Table columns, in schema order.
    pub row: Row,
}

/// Errors raised while encoding or decoding data files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CodecError {
    /// Arrow failed to build or cast arrays.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Parquet failed to write or read a file.
    #[snafu(display("Parquet error: {source}"))]
    Parquet {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// A decoded batch lacks a required column.
    #[snafu(display("Data file is missing column {column}"))]
    MissingColumn {
        /// The missing column.
        column: String,
    },

    /// A decoded column has an unexpected type.
    #[snafu(display("Column {column} has type {found}, expected {expected}"))]
    UnexpectedType {
        /// The column name.
        column: String,
        /// The expected Arrow type.
        expected: String,
        /// The Arrow type found.
        found: String,
    },

    /// A value does not match its column type while encoding.
    #[snafu(display("Value of type {found} cannot be stored in {column} ({expected})"))]
    ValueType {
        /// The column name.
        column: String,
        /// The declared logical type.
        expected: LogicalDataType,
        /// Type name of the value.
        found: &'static str,
    },

    /// A provenance column contains a null.
    #[snafu(display("Provenance column {column} contains a null"))]
    NullProvenance {
        /// The column name.
        column: String,
    },

    /// An input schema cannot be represented as a logical schema.
    #[snafu(display("Unsupported input schema: {source}"))]
    InputSchema {
        /// Underlying schema error.
        source: LogicalSchemaError,
    },

    /// Input batches disagree on their schema.
    #[snafu(display("Input batches have differing schemas"))]
    MixedInputSchemas,
}

/// Arrow schema of a data file: provenance columns followed by the table
/// columns.
pub fn provenance_schema(table_schema: &LogicalSchema) -> SchemaRef {
    let mut fields: Vec<Field> = PROVENANCE_COLUMNS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, false))
        .collect();
    fields.extend(table_schema.to_arrow_schema().fields().iter().map(|f| f.as_ref().clone()));
    Arc::new(Schema::new(fields))
}

/// Physical reader/writer for data files.
///
/// Implementations must be deterministic: encoding the same rows twice
/// yields identical bytes, so content addresses are stable.
pub trait ColumnarCodec: Debug + Send + Sync {
    /// Format tag recorded in the commit log.
    fn format(&self) -> FileFormat;

    /// Encode rows (already in schema order) into one file.
    fn encode(&self, schema: &LogicalSchema, rows: &[StoredRow]) -> Result<Bytes, CodecError>;

    /// Decode a file into record batches with the provenance schema.
    fn decode_batches(&self, bytes: Bytes) -> Result<Vec<RecordBatch>, CodecError>;

    /// Decode only the record keys of a file.
    fn decode_keys(&self, bytes: Bytes) -> Result<Vec<RecordKey>, CodecError>;

    /// Decode a file into stored rows.
    fn decode_rows(
        &self,
        schema: &LogicalSchema,
        bytes: Bytes,
    ) -> Result<Vec<StoredRow>, CodecError> {
        let mut out = Vec::new();
        for batch in self.decode_batches(bytes)? {
            out.extend(arrow_rows::stored_rows_from_batch(schema, &batch)?);
        }
        Ok(out)
    }
}
