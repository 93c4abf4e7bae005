//! Reconstructing table state by replaying log commits.
//!
//! [`TransactionLogStore::rebuild_table_state`] walks commits from version 1
//! up to the requested version and applies their actions in order. A reader
//! resolving version `N` therefore never observes any effect of `N + 1`.
use std::collections::HashMap;

use futures::TryStreamExt;
use snafu::prelude::*;

use crate::transaction_log::*;

/// In-memory view of table metadata and live files, reconstructed from the log.
///
/// Invariant:
/// - `table_meta` and `files` are the result of applying all commits from
///   version 1 through `version` in order.
/// - Every file group has at most one live file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    /// Version this state reflects.
    pub version: u64,
    /// Table-level metadata reconstructed from the log.
    pub table_meta: TableMeta,
    /// Live data files keyed by content address.
    pub files: HashMap<DataFileId, DataFileMeta>,
    /// Commit time of the commit at `version`.
    pub last_commit_time: Option<CommitTime>,
}

impl TableState {
    /// Number of rows across all live files.
    pub fn row_count(&self) -> u64 {
        self.files.values().map(|f| f.row_count).sum()
    }
}

impl TransactionLogStore {
    /// Rebuild the TableState at `as_of` (or the latest version).
    ///
    /// - A table without commits yields `CommitError::CorruptState`; callers
    ///   that treat this as "empty table" should check the version first.
    /// - The first commit must include an `UpdateTableMeta` action; the last
    ///   one wins.
    /// - Superseding a file that is not live, or adding a second live file to
    ///   a group, is `CorruptState`.
    pub async fn rebuild_table_state(&self, as_of: Option<u64>) -> Result<TableState, CommitError> {
        let target = self.resolve_version(as_of).await?;
        ensure!(
            target > 0,
            CorruptStateSnafu {
                msg: "Cannot rebuild TableState: no commits".to_string(),
            }
        );

        let mut table_meta: Option<TableMeta> = None;
        let mut files: HashMap<DataFileId, DataFileMeta> = HashMap::new();
        let mut live_groups: HashMap<(PartitionPath, FileGroupId), DataFileId> = HashMap::new();
        let mut last_commit_time = None;

        let mut commits = self.stream_commits(target);
        while let Some(commit) = commits.try_next().await? {
            let v = commit.version;
            for action in commit.actions {
                match action {
                    LogAction::UpdateTableMeta(meta) => table_meta = Some(meta),
                    LogAction::AddFile(meta) => {
                        let group = (meta.partition.clone(), meta.file_group_id.clone());
                        if let Some(existing) = live_groups.get(&group) {
                            return CorruptStateSnafu {
                                msg: format!(
                                    "commit {v} adds a second live file to group {} in partition {:?} (live: {existing})",
                                    group.1, group.0.as_str()
                                ),
                            }
                            .fail();
                        }
                        live_groups.insert(group, meta.file_id.clone());
                        files.insert(meta.file_id.clone(), meta);
                    }
                    LogAction::SupersedeFile {
                        partition,
                        file_group_id,
                        file_id,
                    } => {
                        let group = (partition, file_group_id);
                        if live_groups.get(&group) != Some(&file_id) {
                            return CorruptStateSnafu {
                                msg: format!(
                                    "commit {v} supersedes file {file_id} which is not live in group {}",
                                    group.1
                                ),
                            }
                            .fail();
                        }
                        live_groups.remove(&group);
                        files.remove(&file_id);
                    }
                }
            }
            last_commit_time = Some(commit.commit_time);
        }

        let table_meta = table_meta.context(CorruptStateSnafu {
            msg: format!("No TableMeta found in commits up to version {target}"),
        })?;

        Ok(TableState {
            version: target,
            table_meta,
            files,
            last_commit_time,
        })
    }
}
