//! Core engine for a copy-on-write keyed table format.
//!
//! This crate provides the foundational pieces for `cow-table`:
//!
//! - An append-only commit log with create-if-absent publishing and
//!   version-guard optimistic concurrency control (`transaction_log`).
//! - Typed table configuration built from flat option maps (`config`).
//! - Record keys, precombine ordering and partition path derivation
//!   (`keys`, `partitioner`).
//! - Immutable, content-addressed Parquet data files organised into file
//!   groups that are replaced copy-on-write (`file_groups`, `formats`).
//! - A `TableHandle` exposing the insert/upsert write pipeline and
//!   point-in-time snapshot reads (`table`).
//!
//! Higher-level integration crates (the DataFusion provider, the CLI) depend
//! on this core crate rather than re-implementing storage and log logic.
#![deny(missing_docs)]

pub mod config;
pub mod executor;
pub mod file_groups;
pub mod formats;
pub mod keys;
pub mod partitioner;
pub mod record_index;
pub mod row;
pub mod schema;
pub mod storage;
pub mod table;
pub mod transaction_log;

pub use config::{IndexScope, TableConfig, WriteMode, WriteOperation};
pub use formats::StoredRow;
pub use row::{Row, RowBatch, Value};
pub use storage::TableLocation;
pub use table::{ErrorKind, Snapshot, TableError, TableHandle, WriteReport};
