//! Identifiers and metadata for immutable data files.
//!
//! A *file group* is the unit of copy-on-write replacement inside a
//! partition: at any committed version it has exactly one live data file,
//! and an update writes a brand-new file for the group while the previous
//! one is recorded as superseded.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Relative partition path under the table root.
///
/// The empty path denotes a non-partitioned table whose files live directly
/// under the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionPath(String);

impl PartitionPath {
    /// Wrap an already-derived partition path.
    pub fn new(path: impl Into<String>) -> Self {
        PartitionPath(path.into())
    }

    /// The partition of a non-partitioned table.
    pub fn unpartitioned() -> Self {
        PartitionPath(String::new())
    }

    /// Borrow the path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the partition of a non-partitioned table.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PartitionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static FILE_GROUP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of a file group, unique within its partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileGroupId(String);

impl FileGroupId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        FileGroupId(id.into())
    }

    /// Generate a fresh identifier `fg-<32 hex>`.
    ///
    /// The id hashes the partition and commit time together with the process
    /// id, a process-wide counter and the wall clock, so two writers racing
    /// on the same partition never mint the same group.
    pub fn generate(partition: &PartitionPath, commit_time: &str) -> Self {
        let seq = FILE_GROUP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cow-table:file-group:v1\0");
        hasher.update(partition.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(commit_time.as_bytes());
        hasher.update(b"\0");
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(&nanos.to_le_bytes());

        let hex = hasher.finalize().to_hex();
        FileGroupId(format!("fg-{}", &hex.as_str()[..32]))
    }

    /// Borrow the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content address of a data file: hex `blake3` of its encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataFileId(String);

impl DataFileId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        DataFileId(id.into())
    }

    /// Compute the content address of `bytes`.
    pub fn for_content(bytes: &[u8]) -> Self {
        DataFileId(blake3::hash(bytes).to_hex().to_string())
    }

    /// Borrow the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical format of a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Apache Parquet.
    Parquet,
}

/// Metadata for one immutable data file as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileMeta {
    /// Content address of the file.
    pub file_id: DataFileId,
    /// Group this file is the current version of.
    pub file_group_id: FileGroupId,
    /// Partition the group belongs to.
    pub partition: PartitionPath,
    /// Path relative to the table root.
    pub path: String,
    /// Commit that wrote this file.
    pub commit_time: super::CommitTime,
    /// Number of rows in the file.
    pub row_count: u64,
    /// Encoded size in bytes.
    pub size_bytes: u64,
    /// Physical format.
    pub format: FileFormat,
}
