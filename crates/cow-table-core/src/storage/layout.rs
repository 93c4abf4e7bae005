//! On-disk layout helpers for a table root.
//!
//! This module centralizes all *relative* path conventions under a table root:
//! - transaction log directory / commit file naming (`_cow_log/`)
//! - partition directories and data file naming
//! - staging directories for overwrites (`_cow_staging/`)
//!
//! The functions here return relative [`std::path::PathBuf`] values. Callers are
//! expected to join these with a [`crate::storage::TableLocation`] before doing IO.

use std::path::PathBuf;

use crate::transaction_log::{DataFileId, FileGroupId, PartitionPath};

// ====================
// Staging layout
// ====================

/// Name of the subdirectory holding in-progress overwrites.
pub const STAGING_DIR_NAME: &str = "_cow_staging";

/// Relative path: `_cow_staging/<token>/`
pub fn staging_rel_dir(token: &str) -> PathBuf {
    PathBuf::from(STAGING_DIR_NAME).join(token)
}

/// Relative path: `_cow_staging/<token>.log/`, where a replaced log waits
/// for removal.
pub fn parked_log_rel_dir(token: &str) -> PathBuf {
    PathBuf::from(STAGING_DIR_NAME).join(format!("{token}.log"))
}

// ====================
// Transaction log layout
// ====================

/// Name of the subdirectory containing the commit log.
pub const LOG_DIR_NAME: &str = "_cow_log";

/// Name of the file that stores the current version hint.
pub const CURRENT_FILE_NAME: &str = "CURRENT";

/// Number of digits used in zero-padded commit file names.
pub const COMMIT_FILENAME_DIGITS: usize = 10;

/// Relative path: `_cow_log/`
pub fn log_rel_dir() -> PathBuf {
    PathBuf::from(LOG_DIR_NAME)
}

/// Relative path: `_cow_log/CURRENT`
pub fn current_rel_path() -> PathBuf {
    log_rel_dir().join(CURRENT_FILE_NAME)
}

/// Relative path: `_cow_log/<zero-padded>.json`
pub fn commit_rel_path(version: u64) -> PathBuf {
    let file_name = format!("{:0width$}.json", version, width = COMMIT_FILENAME_DIGITS);
    log_rel_dir().join(file_name)
}

// ====================
// Data layout
// ====================

/// Extension used for data files.
pub const DATA_FILE_EXT: &str = "parquet";

/// Relative directory of a partition. The empty partition maps to the table root.
pub fn partition_rel_dir(partition: &PartitionPath) -> PathBuf {
    if partition.is_empty() {
        PathBuf::new()
    } else {
        PathBuf::from(partition.as_str())
    }
}

/// Relative path: `<partition>/<file_group_id>_<commit_time>_<hash16>.parquet`
pub fn data_file_rel_path(
    partition: &PartitionPath,
    file_group_id: &FileGroupId,
    commit_time: &str,
    file_id: &DataFileId,
) -> PathBuf {
    let short: String = file_id.as_str().chars().take(16).collect();
    let file_name = format!("{file_group_id}_{commit_time}_{short}.{DATA_FILE_EXT}");
    partition_rel_dir(partition).join(file_name)
}
