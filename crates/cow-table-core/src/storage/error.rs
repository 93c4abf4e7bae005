use std::io;

use snafu::{Backtrace, prelude::*};

/// Errors raised by storage operations.
///
/// `NotFound` and `AlreadyExists` are split out of generic I/O failures
/// because the commit log branches on them: a missing `CURRENT` means an
/// empty table and an existing commit file means another writer won.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// Nothing exists at the path.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// Absolute path that was accessed.
        path: String,
        /// Filesystem error.
        source: io::Error,
        /// Captured backtrace.
        backtrace: Backtrace,
    },

    /// A create-if-absent write found the path taken.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// Absolute path that was accessed.
        path: String,
        /// Filesystem error.
        source: io::Error,
        /// Captured backtrace.
        backtrace: Backtrace,
    },

    /// Any other filesystem failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    OtherIo {
        /// Absolute path that was accessed.
        path: String,
        /// Filesystem error.
        source: io::Error,
        /// Captured backtrace.
        backtrace: Backtrace,
    },

    /// A table location string could not be interpreted.
    #[snafu(display("Unsupported table location {spec:?}: {reason}"))]
    InvalidLocation {
        /// The location string supplied by the caller.
        spec: String,
        /// Why the location was rejected.
        reason: String,
    },
}

impl StorageError {
    /// The path (or location spec) the error refers to.
    pub fn path(&self) -> &str {
        match self {
            StorageError::NotFound { path, .. }
            | StorageError::AlreadyExists { path, .. }
            | StorageError::OtherIo { path, .. } => path,
            StorageError::InvalidLocation { spec, .. } => spec,
        }
    }
}
