//! Append-only commit log and table state.
//!
//! Every write to a table produces exactly one immutable commit file under
//! `_cow_log/`. A commit lists the data files it adds and the files it
//! supersedes; replaying commits `1..=N` in order yields the [`TableState`]
//! (metadata plus live files) of version `N`.
//!
//! ## On-disk layout
//!
//! ```text
//! table_root/
//!   _cow_log/
//!     CURRENT                  # hint: latest published version ("3\n")
//!     0000000001.json          # Commit version 1
//!     0000000002.json          # Commit version 2
//!     0000000003.json          # Commit version 3
//!   2000-01-01/                # partition directory
//!     fg-<id>_<commit_time>_<hash16>.parquet
//! ```
//!
//! Each `*.json` file contains a single [`Commit`] encoded as JSON:
//!
//! ```json
//! {
//!   "version": 2,
//!   "base_version": 1,
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "commit_time": "20250101000000000",
//!   "operation": "upsert",
//!   "actions": [
//!     { "SupersedeFile": { "partition": "2000-01-01", "file_group_id": "fg-…", "file_id": "…" } },
//!     { "AddFile": { "file_id": "…", "file_group_id": "fg-…", "partition": "2000-01-01", … } }
//!   ]
//! }
//! ```
//!
//! Commit files are published with create-if-absent semantics, which makes
//! the publish the single serialization point between concurrent writers.
//! `CURRENT` is only a hint; readers roll forward past it.
pub mod actions;
pub mod data_files;
pub mod log_store;
pub mod logical_schema;
pub mod table_metadata;
pub mod table_state;

pub use actions::{Commit, CommitTime, LogAction, PartitionChange};
pub use data_files::{DataFileId, DataFileMeta, FileFormat, FileGroupId, PartitionPath};
pub use log_store::TransactionLogStore;
pub use logical_schema::{
    LogicalDataType, LogicalField, LogicalSchema, LogicalSchemaError, LogicalTimestampUnit,
};
pub use table_metadata::{TABLE_FORMAT_VERSION, TableMeta};
pub use table_state::TableState;

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Errors that can occur while reading or writing the commit log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommitError {
    /// Another writer published the version this writer expected to create.
    #[snafu(display("Commit conflict: expected version {expected}, but found {found}"))]
    Conflict {
        /// The version the caller expected to be current.
        expected: u64,
        /// The version observed in the log.
        found: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error while working with the log or CURRENT file.
    #[snafu(display("Storage error while accessing commit log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The log or CURRENT file is in an unexpected / malformed state.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A version beyond the latest published commit was requested.
    #[snafu(display("Unknown version {requested}: latest committed version is {latest}"))]
    UnknownVersion {
        /// The version the caller asked for.
        requested: u64,
        /// The latest version present in the log.
        latest: u64,
    },
}
