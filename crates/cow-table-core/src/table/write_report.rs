//! Summary returned by a successful write.

use std::collections::BTreeSet;

use crate::config::WriteOperation;
use crate::transaction_log::{CommitTime, PartitionPath};

/// Outcome of one committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Version created by the write.
    pub version: u64,
    /// Commit time stamped on inserted and updated rows.
    pub commit_time: CommitTime,
    /// Operation that was applied.
    pub operation: WriteOperation,
    /// Partitions whose files changed.
    pub partitions: BTreeSet<PartitionPath>,
    /// Data files added.
    pub files_added: usize,
    /// Data files superseded.
    pub files_superseded: usize,
    /// Rows written under a key not present before.
    pub rows_inserted: u64,
    /// Existing rows replaced by an incoming version.
    pub rows_updated: u64,
    /// Incoming rows dropped: batch duplicates, lower precombine values, or
    /// keys already present on a duplicate-dropping insert.
    pub rows_ignored: u64,
    /// Commit attempts used, including the successful one.
    pub attempts: u32,
}

impl WriteReport {
    /// True when the write changed no data files.
    pub fn is_noop(&self) -> bool {
        self.files_added == 0 && self.files_superseded == 0
    }
}
