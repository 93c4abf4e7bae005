//! Log actions and commit payload definitions.
//!
//! Each commit file stores a [`Commit`] containing ordered [`LogAction`]
//! values: registering table metadata, adding a new data file version and
//! superseding the previous version of a file group.
use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WriteOperation;
use crate::transaction_log::{
    data_files::{DataFileId, DataFileMeta, FileGroupId, PartitionPath},
    table_metadata::TableMeta,
};

const COMMIT_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Commit instant string `YYYYMMDDHHMMSSmmm` (UTC).
///
/// Commit times of one table are strictly increasing with the version, so
/// lexicographic order equals commit order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitTime(String);

impl CommitTime {
    /// Wrap an existing instant string.
    pub fn new(s: impl Into<String>) -> Self {
        CommitTime(s.into())
    }

    /// Format a wall-clock instant (millisecond precision).
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        CommitTime(ts.format(COMMIT_TIME_FORMAT).to_string())
    }

    /// Parse back into a UTC instant, if well formed.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, COMMIT_TIME_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Next commit time for a table whose latest commit time is `previous`.
    ///
    /// Uses `now`, bumped to one millisecond past `previous` when the clock
    /// has not advanced (or went backwards).
    pub fn next_after(previous: Option<&CommitTime>, now: DateTime<Utc>) -> Self {
        let candidate = CommitTime::from_datetime(now);
        match previous {
            Some(prev) if candidate <= *prev => match prev.to_datetime() {
                Some(prev_ts) => CommitTime::from_datetime(prev_ts + Duration::milliseconds(1)),
                // Unparseable history: extend the string so it still sorts after.
                None => CommitTime(format!("{}0", prev.0)),
            },
            _ => candidate,
        }
    }

    /// Borrow the instant string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An action recorded in a commit.
///
/// Actions are applied in order when replaying the log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogAction {
    /// Register (or replace) table-level metadata. Written by the first commit.
    UpdateTableMeta(TableMeta),

    /// Add a new data file; it becomes the live version of its file group.
    AddFile(DataFileMeta),

    /// Mark a data file as no longer live. The file stays on disk.
    SupersedeFile {
        /// Partition of the superseded file.
        partition: PartitionPath,
        /// Group the file belonged to.
        file_group_id: FileGroupId,
        /// Content address of the superseded file.
        file_id: DataFileId,
    },
}

/// A single, immutable commit in the log.
///
/// Commits are written to files such as `_cow_log/0000000001.json`. The
/// version field must match the file name; `base_version` records what the
/// writer believed was the latest version when the commit was prepared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    /// The version number of this commit (monotonic, starting from 1).
    pub version: u64,

    /// The version the writer built this commit on.
    pub base_version: u64,

    /// Wall-clock creation timestamp, stored as RFC3339 UTC.
    pub timestamp: DateTime<Utc>,

    /// Commit instant written into the `_commit_time` column of new rows.
    pub commit_time: CommitTime,

    /// Write operation that produced the commit.
    pub operation: WriteOperation,

    /// Ordered list of actions that describe how table state changes.
    pub actions: Vec<LogAction>,
}

/// Files added and superseded in one partition by a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionChange {
    /// File ids added by the commit.
    pub added: Vec<DataFileId>,
    /// File ids superseded by the commit.
    pub superseded: Vec<DataFileId>,
}

impl Commit {
    /// Per-partition summary of the file actions in this commit.
    pub fn partition_changes(&self) -> BTreeMap<PartitionPath, PartitionChange> {
        let mut out: BTreeMap<PartitionPath, PartitionChange> = BTreeMap::new();
        for action in &self.actions {
            match action {
                LogAction::AddFile(meta) => out
                    .entry(meta.partition.clone())
                    .or_default()
                    .added
                    .push(meta.file_id.clone()),
                LogAction::SupersedeFile {
                    partition, file_id, ..
                } => out
                    .entry(partition.clone())
                    .or_default()
                    .superseded
                    .push(file_id.clone()),
                LogAction::UpdateTableMeta(_) => {}
            }
        }
        out
    }

    /// Number of `AddFile` actions.
    pub fn files_added(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, LogAction::AddFile(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32, ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).single().expect("valid")
            + Duration::milliseconds(ms)
    }

    #[test]
    fn commit_time_format_is_compact_millis() {
        let ct = CommitTime::from_datetime(at(13, 5, 7, 42));
        assert_eq!(ct.as_str(), "20240309130507042");
        assert_eq!(ct.to_datetime(), Some(at(13, 5, 7, 42)));
    }

    #[test]
    fn next_after_is_strictly_increasing_when_clock_stalls() {
        let prev = CommitTime::from_datetime(at(13, 5, 7, 999));

        let same = CommitTime::next_after(Some(&prev), at(13, 5, 7, 999));
        assert_eq!(same.as_str(), "20240309130508000");

        let earlier = CommitTime::next_after(Some(&prev), at(12, 0, 0, 0));
        assert!(earlier > prev);

        let later = CommitTime::next_after(Some(&prev), at(14, 0, 0, 0));
        assert_eq!(later, CommitTime::from_datetime(at(14, 0, 0, 0)));

        assert_eq!(
            CommitTime::next_after(None, at(1, 2, 3, 4)),
            CommitTime::from_datetime(at(1, 2, 3, 4))
        );
    }

    #[test]
    fn partition_changes_group_by_partition() {
        let p1 = PartitionPath::new("a");
        let p2 = PartitionPath::new("b");
        let meta = |p: &PartitionPath, id: &str| DataFileMeta {
            file_id: DataFileId::new(id),
            file_group_id: FileGroupId::new("fg-1"),
            partition: p.clone(),
            path: format!("{p}/{id}.parquet"),
            commit_time: CommitTime::new("1"),
            row_count: 1,
            size_bytes: 1,
            format: crate::transaction_log::FileFormat::Parquet,
        };

        let commit = Commit {
            version: 2,
            base_version: 1,
            timestamp: at(0, 0, 0, 0),
            commit_time: CommitTime::new("1"),
            operation: WriteOperation::Upsert,
            actions: vec![
                LogAction::SupersedeFile {
                    partition: p1.clone(),
                    file_group_id: FileGroupId::new("fg-1"),
                    file_id: DataFileId::new("old"),
                },
                LogAction::AddFile(meta(&p1, "new")),
                LogAction::AddFile(meta(&p2, "other")),
            ],
        };

        let changes = commit.partition_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[&p1].added, vec![DataFileId::new("new")]);
        assert_eq!(changes[&p1].superseded, vec![DataFileId::new("old")]);
        assert_eq!(changes[&p2].added, vec![DataFileId::new("other")]);
        assert!(changes[&p2].superseded.is_empty());
        assert_eq!(commit.files_added(), 2);
    }
}
