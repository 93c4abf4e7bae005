//! Table-level metadata recorded by `LogAction::UpdateTableMeta`.
//!
//! The first commit of a table records its schema together with the key,
//! partitioning and precombine settings. Those settings are immutable for the
//! life of the table; reopening with different settings is rejected by the
//! config layer.
use arrow::datatypes::SchemaRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{IndexScope, TableConfig};
use crate::transaction_log::LogicalSchema;

/// Current table metadata / log format version.
///
/// Bumped only on a breaking change to the on-disk JSON format.
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// High-level table metadata stored in the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableMeta {
    /// Table identity.
    pub name: String,
    /// Canonical logical schema (adopted from the first write).
    pub schema: LogicalSchema,
    /// Fields composing the record key.
    pub record_key_fields: Vec<String>,
    /// Fields composing the partition path; empty for non-partitioned tables.
    pub partition_path_fields: Vec<String>,
    /// Field ordering competing versions of one key.
    pub precombine_field: Option<String>,
    /// Whether partition directories use `field=value` segments.
    pub hive_style_partitioning: bool,
    /// Uniqueness scope of record keys.
    pub index_scope: IndexScope,
    /// Creation timestamp of the table, stored as RFC3339 UTC.
    pub created_at: DateTime<Utc>,
    /// Format version for future evolution of the log/table format.
    pub format_version: u32,
}

impl TableMeta {
    /// Metadata for a new table created from `config` with `schema`.
    pub fn from_config(config: &TableConfig, schema: LogicalSchema) -> Self {
        TableMeta {
            name: config.name.clone(),
            schema,
            record_key_fields: config.record_key_fields.clone(),
            partition_path_fields: config.partition_path_fields.clone(),
            precombine_field: config.precombine_field.clone(),
            hive_style_partitioning: config.hive_style_partitioning,
            index_scope: config.index_scope,
            created_at: Utc::now(),
            format_version: TABLE_FORMAT_VERSION,
        }
    }

    /// The table schema as Arrow, without provenance columns.
    pub fn arrow_schema_ref(&self) -> SchemaRef {
        self.schema.to_arrow_schema_ref()
    }

    /// True if the table has no partition fields.
    pub fn is_partitioned(&self) -> bool {
        !self.partition_path_fields.is_empty()
    }
}
