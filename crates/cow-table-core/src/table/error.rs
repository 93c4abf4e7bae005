//! Error types and SNAFU context selectors for the table layer.
//!
//! `TableError` is the top of the error stack. Lower layers keep their own
//! enums; this module wraps them and maps every variant onto [`ErrorKind`] so
//! callers can decide whether retrying a write makes sense.

use arrow::error::ArrowError;
use snafu::prelude::*;

use crate::{
    config::ConfigError,
    executor::ExecutorError,
    file_groups::FileGroupError,
    formats::CodecError,
    schema::SchemaError,
    storage::{StorageError, TableLocation},
    transaction_log::CommitError,
};

/// Coarse classification of [`TableError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Batch or row does not fit the table schema or configuration.
    Schema,
    /// Optimistic concurrency retries were exhausted.
    WriteConflict,
    /// Storage or codec failure; the write did not commit.
    IoFailure,
    /// The commit log is unreadable or inconsistent.
    CorruptCommitLog,
    /// Invalid or mismatched configuration.
    Config,
    /// The requested table or version does not exist.
    NotFound,
}

/// Errors from table-level operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Any error coming from the commit log.
    #[snafu(display("Transaction log error: {source}"))]
    TransactionLog {
        /// Underlying commit log error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// Storage error while accessing table data.
    #[snafu(display("Storage error while accessing table data: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Reading or writing a data file failed.
    #[snafu(display("Data file error: {source}"))]
    DataFile {
        /// Underlying file group error.
        source: FileGroupError,
    },

    /// The batch or a row violates the table schema.
    #[snafu(display("Schema error: {source}"))]
    Schema {
        /// Underlying schema error.
        source: SchemaError,
    },

    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config {
        /// Underlying configuration error.
        source: ConfigError,
    },

    /// Encoding a data file failed.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
    },

    /// Arrow error while building batches for a caller.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// The batch executor failed.
    #[snafu(display("Batch executor error: {source}"))]
    Executor {
        /// Underlying executor error.
        source: ExecutorError,
    },

    /// Reading a snapshot of a table with no commits.
    #[snafu(display("Cannot read a snapshot of a table with no commits (version 0)"))]
    EmptyTable,

    /// No table exists at the location.
    #[snafu(display("No table found at {location}"))]
    NotFound {
        /// Location that was probed.
        location: TableLocation,
    },

    /// Every commit attempt lost the race against another writer.
    #[snafu(display("Write conflict: gave up after {attempts} attempts"))]
    WriteConflict {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl TableError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::TransactionLog { source } => match source {
                CommitError::Conflict { .. } => ErrorKind::WriteConflict,
                CommitError::Storage { .. } => ErrorKind::IoFailure,
                CommitError::CorruptState { .. } => ErrorKind::CorruptCommitLog,
                CommitError::UnknownVersion { .. } => ErrorKind::NotFound,
            },
            TableError::Storage { .. }
            | TableError::DataFile { .. }
            | TableError::Codec { .. }
            | TableError::Arrow { .. }
            | TableError::Executor { .. } => ErrorKind::IoFailure,
            TableError::Schema { .. } => ErrorKind::Schema,
            TableError::Config { .. } => ErrorKind::Config,
            TableError::EmptyTable | TableError::NotFound { .. } => ErrorKind::NotFound,
            TableError::WriteConflict { .. } => ErrorKind::WriteConflict,
        }
    }

    /// Whether the caller may fix the input or simply retry the write.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Schema | ErrorKind::WriteConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_recoverability() {
        let conflict = TableError::WriteConflict { attempts: 3 };
        assert_eq!(conflict.kind(), ErrorKind::WriteConflict);
        assert!(conflict.is_recoverable());

        let empty = TableError::EmptyTable;
        assert_eq!(empty.kind(), ErrorKind::NotFound);
        assert!(!empty.is_recoverable());

        let schema = TableError::Schema {
            source: SchemaError::NullRecordKey {
                row: 0,
                field: "id".to_string(),
            },
        };
        assert_eq!(schema.kind(), ErrorKind::Schema);
        assert!(schema.is_recoverable());
    }
}
