//! Logical schema definitions and validation for table metadata.
//!
//! This module models the logical fields and data types stored in the
//! transaction log, along with validation and conversion to and from Arrow
//! schemas.
use std::{collections::HashSet, fmt, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Prefix reserved for provenance columns.
pub const RESERVED_COLUMN_PREFIX: char = '_';

/// Units for logical timestamps recorded in the table metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogicalTimestampUnit {
    /// Microsecond precision timestamps.
    Micros,
}

impl fmt::Display for LogicalTimestampUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalTimestampUnit::Micros => write!(f, "us"),
        }
    }
}

/// Logical data types that can be stored in a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogicalDataType {
    /// Boolean value.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 encoded string.
    Utf8,
    /// Calendar date as days since the Unix epoch.
    Date32,
    /// Timestamp value with a precision unit and optional timezone.
    Timestamp {
        /// Timestamp precision unit.
        unit: LogicalTimestampUnit,
        /// Optional IANA timezone identifier.
        timezone: Option<String>,
    },
}

impl LogicalDataType {
    /// The Arrow type used to store this logical type.
    pub fn to_arrow_datatype(&self) -> DataType {
        match self {
            LogicalDataType::Bool => DataType::Boolean,
            LogicalDataType::Int64 => DataType::Int64,
            LogicalDataType::Float64 => DataType::Float64,
            LogicalDataType::Utf8 => DataType::Utf8,
            LogicalDataType::Date32 => DataType::Date32,
            LogicalDataType::Timestamp { timezone, .. } => DataType::Timestamp(
                TimeUnit::Microsecond,
                timezone.as_ref().map(|s| Arc::<str>::from(s.as_str())),
            ),
        }
    }

    /// Map an Arrow type onto a logical type, if it is supported.
    ///
    /// Narrower integer and float widths widen to 64 bits; large strings map
    /// to `Utf8`.
    pub fn from_arrow_datatype(dt: &DataType) -> Option<Self> {
        Some(match dt {
            DataType::Boolean => LogicalDataType::Bool,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => LogicalDataType::Int64,
            DataType::Float16 | DataType::Float32 | DataType::Float64 => LogicalDataType::Float64,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => LogicalDataType::Utf8,
            DataType::Date32 => LogicalDataType::Date32,
            DataType::Timestamp(_, tz) => LogicalDataType::Timestamp {
                unit: LogicalTimestampUnit::Micros,
                timezone: tz.as_ref().map(|s| s.to_string()),
            },
            _ => return None,
        })
    }
}

impl fmt::Display for LogicalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalDataType::Bool => write!(f, "bool"),
            LogicalDataType::Int64 => write!(f, "int64"),
            LogicalDataType::Float64 => write!(f, "float64"),
            LogicalDataType::Utf8 => write!(f, "utf8"),
            LogicalDataType::Date32 => write!(f, "date32"),
            LogicalDataType::Timestamp { unit, timezone } => match timezone {
                Some(tz) => write!(f, "timestamp[{unit}]({tz})"),
                None => write!(f, "timestamp[{unit}]"),
            },
        }
    }
}

/// Logical column definition in a schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalField {
    /// Column name as stored in the schema.
    pub name: String,
    /// Logical data type for the column.
    pub data_type: LogicalDataType,
    /// Whether the column allows null values.
    pub nullable: bool,
}

impl LogicalField {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, data_type: LogicalDataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    fn to_arrow_field(&self) -> Field {
        Field::new(
            self.name.clone(),
            self.data_type.to_arrow_datatype(),
            self.nullable,
        )
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}?: {}", self.name, self.data_type)
        } else {
            write!(f, "{}: {}", self.name, self.data_type)
        }
    }
}

/// Errors that can occur while constructing or validating a logical schema.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum LogicalSchemaError {
    /// Duplicate column names are not allowed.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicate column name.
        column: String,
    },

    /// Column names must be non-empty.
    #[snafu(display("Column name must be non-empty (position {position})"))]
    EmptyColumnName {
        /// Zero-based position of the offending column.
        position: usize,
    },

    /// Names starting with `_` are reserved for provenance columns.
    #[snafu(display("Column name {column} is reserved (leading '_')"))]
    ReservedColumnName {
        /// The reserved column name.
        column: String,
    },

    /// An Arrow column type has no logical counterpart.
    #[snafu(display("Unsupported Arrow type for column {column}: {data_type}"))]
    UnsupportedArrowType {
        /// Column name.
        column: String,
        /// Rendered Arrow data type.
        data_type: String,
    },
}

/// Ordered, duplicate-free collection of logical columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalSchema {
    columns: Vec<LogicalField>,
}

impl LogicalSchema {
    /// Construct a validated logical schema.
    pub fn new(columns: Vec<LogicalField>) -> Result<Self, LogicalSchemaError> {
        let mut seen = HashSet::new();
        for (position, col) in columns.iter().enumerate() {
            ensure!(
                !col.name.trim().is_empty(),
                EmptyColumnNameSnafu { position }
            );
            ensure!(
                !col.name.starts_with(RESERVED_COLUMN_PREFIX),
                ReservedColumnNameSnafu {
                    column: col.name.clone()
                }
            );
            if !seen.insert(col.name.clone()) {
                return DuplicateColumnSnafu {
                    column: col.name.clone(),
                }
                .fail();
            }
        }

        Ok(Self { columns })
    }

    /// Derive a logical schema from an Arrow schema.
    pub fn from_arrow_schema(schema: &Schema) -> Result<Self, LogicalSchemaError> {
        let columns = schema
            .fields()
            .iter()
            .map(|f| {
                let data_type = LogicalDataType::from_arrow_datatype(f.data_type()).context(
                    UnsupportedArrowTypeSnafu {
                        column: f.name().clone(),
                        data_type: f.data_type().to_string(),
                    },
                )?;
                Ok(LogicalField::new(f.name().clone(), data_type, f.is_nullable()))
            })
            .collect::<Result<Vec<_>, LogicalSchemaError>>()?;
        Self::new(columns)
    }

    /// Borrow the logical columns.
    pub fn columns(&self) -> &[LogicalField] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn field(&self, name: &str) -> Option<&LogicalField> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Convert this logical schema to an owned Arrow [`Schema`].
    pub fn to_arrow_schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(LogicalField::to_arrow_field)
                .collect::<Vec<_>>(),
        )
    }

    /// Convert this logical schema to a shared Arrow [`SchemaRef`].
    pub fn to_arrow_schema_ref(&self) -> SchemaRef {
        Arc::new(self.to_arrow_schema())
    }
}

impl fmt::Display for LogicalSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "}}")
    }
}
