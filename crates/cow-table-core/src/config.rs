//! Typed table configuration built from flat string options.
//!
//! Writers describe a table with a flat `key → value` mapping (the same shape
//! as a JSON options file or repeated `--option k=v` flags on the CLI).
//! [`TableConfig::from_options`] validates that mapping up front: unknown keys
//! are rejected, values are parsed into typed settings and defaults are
//! filled in.
//!
//! | key | default |
//! |---|---|
//! | `table.name` | required |
//! | `table.basePath` | required |
//! | `write.recordkey.field` | required |
//! | `write.partitionpath.field` | non-partitioned |
//! | `write.precombine.field` | none (arrival order) |
//! | `write.operation` | `upsert` |
//! | `write.mode` | `append` |
//! | `write.parallelism` | available parallelism |
//! | `write.partitionpath.hiveStyle` | `false` |
//! | `write.index.scope` | `partition` |
//! | `write.insert.dropDuplicates` | `false` |
//! | `write.file.maxRows` | `100000` |
//! | `write.retry.maxAttempts` | `3` |

use std::{collections::BTreeMap, fmt, num::NonZeroUsize, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::storage::{StorageError, TableLocation};
use crate::transaction_log::TableMeta;

/// Option key: table identity.
pub const TABLE_NAME: &str = "table.name";
/// Option key: storage root.
pub const TABLE_BASE_PATH: &str = "table.basePath";
/// Option key: comma-separated record key fields.
pub const RECORD_KEY_FIELD: &str = "write.recordkey.field";
/// Option key: comma-separated partition path fields.
pub const PARTITION_PATH_FIELD: &str = "write.partitionpath.field";
/// Option key: precombine field.
pub const PRECOMBINE_FIELD: &str = "write.precombine.field";
/// Option key: `insert` or `upsert`.
pub const WRITE_OPERATION: &str = "write.operation";
/// Option key: `overwrite` or `append`.
pub const WRITE_MODE: &str = "write.mode";
/// Option key: executor threads.
pub const WRITE_PARALLELISM: &str = "write.parallelism";
/// Option key: hive-style partition directories.
pub const HIVE_STYLE: &str = "write.partitionpath.hiveStyle";
/// Option key: `partition` or `global` key uniqueness.
pub const INDEX_SCOPE: &str = "write.index.scope";
/// Option key: drop already-present keys on insert.
pub const INSERT_DROP_DUPLICATES: &str = "write.insert.dropDuplicates";
/// Option key: target max rows per data file.
pub const FILE_MAX_ROWS: &str = "write.file.maxRows";
/// Option key: commit attempts before giving up.
pub const RETRY_MAX_ATTEMPTS: &str = "write.retry.maxAttempts";

/// Every recognised option key.
pub const KNOWN_OPTIONS: &[&str] = &[
    TABLE_NAME,
    TABLE_BASE_PATH,
    RECORD_KEY_FIELD,
    PARTITION_PATH_FIELD,
    PRECOMBINE_FIELD,
    WRITE_OPERATION,
    WRITE_MODE,
    WRITE_PARALLELISM,
    HIVE_STYLE,
    INDEX_SCOPE,
    INSERT_DROP_DUPLICATES,
    FILE_MAX_ROWS,
    RETRY_MAX_ATTEMPTS,
];

/// Default target max rows per data file.
pub const DEFAULT_FILE_MAX_ROWS: usize = 100_000;
/// Default number of commit attempts.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Errors raised while building or checking a [`TableConfig`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The option key is not recognised.
    #[snafu(display("Unknown option {key:?}"))]
    UnknownOption {
        /// The offending key.
        key: String,
    },

    /// A required option is absent.
    #[snafu(display("Missing required option {key:?}"))]
    MissingOption {
        /// The missing key.
        key: &'static str,
    },

    /// An option value could not be parsed.
    #[snafu(display("Invalid value {value:?} for option {key:?}: {reason}"))]
    InvalidValue {
        /// The option key.
        key: &'static str,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The base path is not a supported location.
    #[snafu(display("Invalid {TABLE_BASE_PATH}: {source}"))]
    InvalidBasePath {
        /// Underlying location parse error.
        source: StorageError,
    },

    /// An options document is not a flat JSON object.
    #[snafu(display("Invalid options document: {reason}"))]
    InvalidOptionsDocument {
        /// Description of the problem.
        reason: String,
    },

    /// The options document is not valid JSON.
    #[snafu(display("Options document is not valid JSON: {source}"))]
    OptionsJson {
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A setting differs from what the existing table recorded.
    #[snafu(display(
        "Setting {setting} does not match the existing table: recorded {recorded}, configured {configured}"
    ))]
    MetaMismatch {
        /// The setting that differs.
        setting: &'static str,
        /// Value recorded in the table metadata.
        recorded: String,
        /// Value in the supplied configuration.
        configured: String,
    },
}

/// Write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    /// Append rows without consulting the record index.
    ///
    /// Unless `write.insert.dropDuplicates` is set, inserting a key that is
    /// already stored leaves two rows with that key in the partition, and
    /// both show up in snapshots. A later upsert of the key rewrites only the
    /// copy the record index resolves to; the other keeps its old values.
    /// Duplicates inside one batch are still collapsed by precombine.
    Insert,
    /// Insert new keys, merge existing keys by precombine.
    #[default]
    Upsert,
}

/// What happens to prior table contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Discard existing log and data, then write a fresh table.
    Overwrite,
    /// Continue the existing log; create the table if absent.
    #[default]
    Append,
}

/// Uniqueness scope of record keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexScope {
    /// A key is unique within its partition.
    #[default]
    Partition,
    /// A key is unique across the whole table.
    Global,
}

macro_rules! keyword_enum {
    ($ty:ty, $key:expr, { $($text:literal => $variant:path),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    _ => InvalidValueSnafu {
                        key: $key,
                        value: s.to_string(),
                        reason: format!("expected one of: {}", [$($text),+].join(", ")),
                    }
                    .fail(),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($variant => $text,)+
                })
            }
        }
    };
}

keyword_enum!(WriteOperation, WRITE_OPERATION, {
    "insert" => WriteOperation::Insert,
    "upsert" => WriteOperation::Upsert,
});

keyword_enum!(WriteMode, WRITE_MODE, {
    "overwrite" => WriteMode::Overwrite,
    "append" => WriteMode::Append,
});

keyword_enum!(IndexScope, INDEX_SCOPE, {
    "partition" => IndexScope::Partition,
    "global" => IndexScope::Global,
});

/// Validated configuration for one table and its writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Table identity.
    pub name: String,
    /// Storage root.
    pub location: TableLocation,
    /// Fields composing the record key.
    pub record_key_fields: Vec<String>,
    /// Fields composing the partition path.
    pub partition_path_fields: Vec<String>,
    /// Field ordering competing versions of one key.
    pub precombine_field: Option<String>,
    /// Default write operation.
    pub operation: WriteOperation,
    /// Append to or overwrite existing contents.
    pub mode: WriteMode,
    /// Threads for merge/encode work and concurrent file reads.
    pub parallelism: usize,
    /// `field=value` partition directories.
    pub hive_style_partitioning: bool,
    /// Record key uniqueness scope.
    pub index_scope: IndexScope,
    /// Drop incoming rows whose key already exists on insert.
    pub insert_drop_duplicates: bool,
    /// Target max rows per data file.
    pub file_max_rows: usize,
    /// Commit attempts before `WriteConflict`.
    pub retry_max_attempts: u32,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn split_fields(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => InvalidValueSnafu {
            key,
            value,
            reason: "expected true or false",
        }
        .fail(),
    }
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let parsed: T = value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    ensure!(
        parsed > T::default(),
        InvalidValueSnafu {
            key,
            value,
            reason: "must be greater than zero",
        }
    );
    Ok(parsed)
}

/// Flatten a JSON options document into `(key, value)` string pairs.
///
/// Keys are not validated here; [`TableConfig::from_options`] does that.
pub fn options_from_json_str(json: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let doc: serde_json::Value = serde_json::from_str(json).context(OptionsJsonSnafu)?;
    let serde_json::Value::Object(map) = doc else {
        return InvalidOptionsDocumentSnafu {
            reason: "top level must be an object",
        }
        .fail();
    };

    let mut options = Vec::with_capacity(map.len());
    for (key, value) in map {
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return InvalidOptionsDocumentSnafu {
                    reason: format!("value of {key:?} must be a string, bool or number, got {other}"),
                }
                .fail();
            }
        };
        options.push((key, text));
    }
    Ok(options)
}

impl TableConfig {
    /// Configuration with defaults for every optional setting.
    pub fn new(
        name: impl Into<String>,
        location: TableLocation,
        record_key_fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TableConfig {
            name: name.into(),
            location,
            record_key_fields: record_key_fields.into_iter().map(Into::into).collect(),
            partition_path_fields: Vec::new(),
            precombine_field: None,
            operation: WriteOperation::default(),
            mode: WriteMode::default(),
            parallelism: default_parallelism(),
            hive_style_partitioning: false,
            index_scope: IndexScope::default(),
            insert_drop_duplicates: false,
            file_max_rows: DEFAULT_FILE_MAX_ROWS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
        }
    }

    /// Set the partition fields.
    pub fn with_partition_fields(
        mut self,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.partition_path_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the precombine field.
    pub fn with_precombine_field(mut self, field: impl Into<String>) -> Self {
        self.precombine_field = Some(field.into());
        self
    }

    /// Set the default write operation.
    pub fn with_operation(mut self, operation: WriteOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Set the write mode.
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the index scope.
    pub fn with_index_scope(mut self, scope: IndexScope) -> Self {
        self.index_scope = scope;
        self
    }

    /// Build a configuration from flat `key → value` options.
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut opts: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in options {
            let key = k.into();
            let key = key.trim().to_string();
            ensure!(
                KNOWN_OPTIONS.contains(&key.as_str()),
                UnknownOptionSnafu { key }
            );
            opts.insert(key, v.into());
        }

        let required = |key: &'static str| -> Result<&String, ConfigError> {
            opts.get(key)
                .filter(|v| !v.trim().is_empty())
                .context(MissingOptionSnafu { key })
        };

        let name = required(TABLE_NAME)?.trim().to_string();
        let location = TableLocation::parse(required(TABLE_BASE_PATH)?).context(InvalidBasePathSnafu)?;

        let record_key_fields = split_fields(required(RECORD_KEY_FIELD)?);
        ensure!(
            !record_key_fields.is_empty(),
            MissingOptionSnafu {
                key: RECORD_KEY_FIELD
            }
        );

        let mut config = TableConfig::new(name, location, record_key_fields);

        if let Some(v) = opts.get(PARTITION_PATH_FIELD) {
            config.partition_path_fields = split_fields(v);
        }
        if let Some(v) = opts.get(PRECOMBINE_FIELD) {
            let v = v.trim();
            config.precombine_field = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = opts.get(WRITE_OPERATION) {
            config.operation = v.parse()?;
        }
        if let Some(v) = opts.get(WRITE_MODE) {
            config.mode = v.parse()?;
        }
        if let Some(v) = opts.get(WRITE_PARALLELISM) {
            config.parallelism = parse_positive(WRITE_PARALLELISM, v)?;
        }
        if let Some(v) = opts.get(HIVE_STYLE) {
            config.hive_style_partitioning = parse_bool(HIVE_STYLE, v)?;
        }
        if let Some(v) = opts.get(INDEX_SCOPE) {
            config.index_scope = v.parse()?;
        }
        if let Some(v) = opts.get(INSERT_DROP_DUPLICATES) {
            config.insert_drop_duplicates = parse_bool(INSERT_DROP_DUPLICATES, v)?;
        }
        if let Some(v) = opts.get(FILE_MAX_ROWS) {
            config.file_max_rows = parse_positive(FILE_MAX_ROWS, v)?;
        }
        if let Some(v) = opts.get(RETRY_MAX_ATTEMPTS) {
            config.retry_max_attempts = parse_positive(RETRY_MAX_ATTEMPTS, v)?;
        }

        Ok(config)
    }

    /// Build a configuration from a flat JSON object.
    ///
    /// String, boolean and number values are accepted and converted to their
    /// option string form.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_options(options_from_json_str(json)?)
    }

    /// Check the immutable table settings against an existing table.
    pub fn ensure_matches(&self, meta: &TableMeta) -> Result<(), ConfigError> {
        fn check<T: PartialEq + fmt::Debug>(
            setting: &'static str,
            recorded: &T,
            configured: &T,
        ) -> Result<(), ConfigError> {
            ensure!(
                recorded == configured,
                MetaMismatchSnafu {
                    setting,
                    recorded: format!("{recorded:?}"),
                    configured: format!("{configured:?}"),
                }
            );
            Ok(())
        }

        check(TABLE_NAME, &meta.name, &self.name)?;
        check(
            RECORD_KEY_FIELD,
            &meta.record_key_fields,
            &self.record_key_fields,
        )?;
        check(
            PARTITION_PATH_FIELD,
            &meta.partition_path_fields,
            &self.partition_path_fields,
        )?;
        check(
            PRECOMBINE_FIELD,
            &meta.precombine_field,
            &self.precombine_field,
        )?;
        check(
            HIVE_STYLE,
            &meta.hive_style_partitioning,
            &self.hive_style_partitioning,
        )?;
        check(INDEX_SCOPE, &meta.index_scope, &self.index_scope)?;
        Ok(())
    }

    /// Configuration matching an existing table's recorded settings.
    pub fn from_meta(meta: &TableMeta, location: TableLocation) -> Self {
        let mut config = TableConfig::new(
            meta.name.clone(),
            location,
            meta.record_key_fields.clone(),
        );
        config.partition_path_fields = meta.partition_path_fields.clone();
        config.precombine_field = meta.precombine_field.clone();
        config.hive_style_partitioning = meta.hive_style_partitioning;
        config.index_scope = meta.index_scope;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::{LogicalDataType, LogicalField, LogicalSchema};

    fn base_options() -> Vec<(&'static str, &'static str)> {
        vec![
            (TABLE_NAME, "trips"),
            (TABLE_BASE_PATH, "file:///tmp/trips"),
            (RECORD_KEY_FIELD, "uuid"),
        ]
    }

    #[test]
    fn defaults_are_applied() {
        let config = TableConfig::from_options(base_options()).expect("valid");
        assert_eq!(config.name, "trips");
        assert_eq!(config.location, TableLocation::local("/tmp/trips"));
        assert_eq!(config.record_key_fields, vec!["uuid"]);
        assert!(config.partition_path_fields.is_empty());
        assert_eq!(config.precombine_field, None);
        assert_eq!(config.operation, WriteOperation::Upsert);
        assert_eq!(config.mode, WriteMode::Append);
        assert!(config.parallelism >= 1);
        assert_eq!(config.index_scope, IndexScope::Partition);
        assert_eq!(config.file_max_rows, DEFAULT_FILE_MAX_ROWS);
        assert_eq!(config.retry_max_attempts, DEFAULT_RETRY_MAX_ATTEMPTS);
    }

    #[test]
    fn all_options_parse() {
        let mut opts = base_options();
        opts.extend([
            (RECORD_KEY_FIELD, "id, name"),
            (PARTITION_PATH_FIELD, "region,country"),
            (PRECOMBINE_FIELD, "ts"),
            (WRITE_OPERATION, "INSERT"),
            (WRITE_MODE, "overwrite"),
            (WRITE_PARALLELISM, "4"),
            (HIVE_STYLE, "true"),
            (INDEX_SCOPE, "global"),
            (INSERT_DROP_DUPLICATES, "true"),
            (FILE_MAX_ROWS, "10"),
            (RETRY_MAX_ATTEMPTS, "5"),
        ]);
        let config = TableConfig::from_options(opts).expect("valid");
        assert_eq!(config.record_key_fields, vec!["id", "name"]);
        assert_eq!(config.partition_path_fields, vec!["region", "country"]);
        assert_eq!(config.precombine_field.as_deref(), Some("ts"));
        assert_eq!(config.operation, WriteOperation::Insert);
        assert_eq!(config.mode, WriteMode::Overwrite);
        assert_eq!(config.parallelism, 4);
        assert!(config.hive_style_partitioning);
        assert_eq!(config.index_scope, IndexScope::Global);
        assert!(config.insert_drop_duplicates);
        assert_eq!(config.file_max_rows, 10);
        assert_eq!(config.retry_max_attempts, 5);
    }

    #[test]
    fn unknown_and_missing_options_are_rejected() {
        let mut opts = base_options();
        opts.push(("hoodie.table.type", "MERGE_ON_READ"));
        assert!(matches!(
            TableConfig::from_options(opts),
            Err(ConfigError::UnknownOption { key }) if key == "hoodie.table.type"
        ));

        let opts = vec![(TABLE_NAME, "t"), (TABLE_BASE_PATH, "/tmp/t")];
        assert!(matches!(
            TableConfig::from_options(opts),
            Err(ConfigError::MissingOption {
                key: RECORD_KEY_FIELD
            })
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            (WRITE_OPERATION, "delete"),
            (WRITE_PARALLELISM, "0"),
            (FILE_MAX_ROWS, "lots"),
            (HIVE_STYLE, "yes"),
        ] {
            let mut opts = base_options();
            opts.push((key, value));
            assert!(
                matches!(
                    TableConfig::from_options(opts),
                    Err(ConfigError::InvalidValue { .. })
                ),
                "{key}={value} should be rejected"
            );
        }

        let mut opts = base_options();
        opts.push((TABLE_BASE_PATH, "s3://bucket/t"));
        assert!(matches!(
            TableConfig::from_options(opts),
            Err(ConfigError::InvalidBasePath { .. })
        ));
    }

    #[test]
    fn json_documents_accept_scalars() {
        let config = TableConfig::from_json_str(
            r#"{
                "table.name": "t",
                "table.basePath": "/tmp/t",
                "write.recordkey.field": "id",
                "write.parallelism": 2,
                "write.partitionpath.hiveStyle": true
            }"#,
        )
        .expect("valid");
        assert_eq!(config.parallelism, 2);
        assert!(config.hive_style_partitioning);

        assert!(matches!(
            TableConfig::from_json_str("[1, 2]"),
            Err(ConfigError::InvalidOptionsDocument { .. })
        ));
        assert!(matches!(
            TableConfig::from_json_str("{"),
            Err(ConfigError::OptionsJson { .. })
        ));
    }

    #[test]
    fn ensure_matches_detects_changed_key_fields() {
        let config = TableConfig::from_options(base_options()).expect("valid");
        let schema = LogicalSchema::new(vec![
            LogicalField::new("uuid", LogicalDataType::Utf8, false),
            LogicalField::new("other", LogicalDataType::Utf8, false),
        ])
        .expect("schema");
        let meta = TableMeta::from_config(&config, schema);
        config.ensure_matches(&meta).expect("same settings");

        let mut changed = config.clone();
        changed.record_key_fields = vec!["other".to_string()];
        assert!(matches!(
            changed.ensure_matches(&meta),
            Err(ConfigError::MetaMismatch {
                setting: RECORD_KEY_FIELD,
                ..
            })
        ));
    }
}
