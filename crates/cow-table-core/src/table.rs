//! Table layer.
//!
//! [`TableHandle`] is the user-facing entry point: it is constructed from a
//! storage location (or a full [`TableConfig`]), owns the batch executor and
//! the cached record index, and exposes the write pipeline and snapshot
//! reads. Handles hold no global state; independent handles on the same
//! location coordinate only through the commit log.

pub mod error;
mod overwrite;
pub mod snapshot;
pub mod write;
pub mod write_report;

#[cfg(test)]
pub(crate) mod test_util;

use std::sync::Arc;

use log::debug;
use snafu::prelude::*;

use crate::{
    config::{TableConfig, WriteMode},
    executor::BatchExecutor,
    file_groups::FileGroupManager,
    formats::parquet::ParquetCodec,
    record_index::RecordIndex,
    storage::TableLocation,
    transaction_log::{Commit, PartitionPath, TableState, TransactionLogStore},
};

pub use error::{ErrorKind, TableError};
pub use snapshot::{Snapshot, SnapshotScan};
pub use write_report::WriteReport;

use error::{ConfigSnafu, EmptyTableSnafu, ExecutorSnafu, NotFoundSnafu, TransactionLogSnafu};

/// Handle on one copy-on-write table.
#[derive(Debug)]
pub struct TableHandle {
    config: TableConfig,
    log: TransactionLogStore,
    files: FileGroupManager,
    executor: BatchExecutor,
    index_cache: Option<RecordIndex>,
    #[cfg(test)]
    pre_commit_hook: Option<write::PreCommitHook>,
}

impl TableHandle {
    /// Open an existing table, taking its settings from the recorded
    /// metadata.
    pub async fn open(location: TableLocation) -> Result<Self, TableError> {
        let log = TransactionLogStore::new(location.clone());
        let version = log
            .load_current_version()
            .await
            .context(TransactionLogSnafu)?;
        if version == 0 {
            return NotFoundSnafu { location }.fail();
        }

        let state = log
            .rebuild_table_state(Some(version))
            .await
            .context(TransactionLogSnafu)?;
        let config = TableConfig::from_meta(&state.table_meta, location);
        debug!("opened table {} at version {version}", config.name);
        Self::from_parts(config, log)
    }

    /// Open or prepare a table for writing with explicit settings.
    ///
    /// In append mode an existing table must have been created with the same
    /// key, partition and precombine settings. A missing table is created by
    /// the first write.
    pub async fn open_with_config(config: TableConfig) -> Result<Self, TableError> {
        let log = TransactionLogStore::new(config.location.clone());

        if config.mode == WriteMode::Append {
            let version = log
                .load_current_version()
                .await
                .context(TransactionLogSnafu)?;
            if version > 0 {
                let state = log
                    .rebuild_table_state(Some(version))
                    .await
                    .context(TransactionLogSnafu)?;
                config
                    .ensure_matches(&state.table_meta)
                    .context(ConfigSnafu)?;
            }
        }

        Self::from_parts(config, log)
    }

    fn from_parts(config: TableConfig, log: TransactionLogStore) -> Result<Self, TableError> {
        let executor = BatchExecutor::new(config.parallelism).context(ExecutorSnafu)?;
        let files = FileGroupManager::new(
            config.location.clone(),
            Arc::new(ParquetCodec::default()),
        );
        Ok(Self {
            config,
            log,
            files,
            executor,
            index_cache: None,
            #[cfg(test)]
            pre_commit_hook: None,
        })
    }

    /// Settings this handle writes with.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Storage root of the table.
    pub fn location(&self) -> &TableLocation {
        &self.config.location
    }

    /// The table's commit log.
    pub fn log_store(&self) -> &TransactionLogStore {
        &self.log
    }

    /// Latest committed version (0 when the table has no commits).
    pub async fn current_version(&self) -> Result<u64, TableError> {
        self.log
            .load_current_version()
            .await
            .context(TransactionLogSnafu)
    }

    /// Replay the log up to `as_of` (or the latest version).
    pub async fn state(&self, as_of: Option<u64>) -> Result<TableState, TableError> {
        let version = self
            .log
            .resolve_version(as_of)
            .await
            .context(TransactionLogSnafu)?;
        ensure!(version > 0, EmptyTableSnafu);
        self.log
            .rebuild_table_state(Some(version))
            .await
            .context(TransactionLogSnafu)
    }

    /// Commit history, oldest first.
    pub async fn commits(&self) -> Result<Vec<Commit>, TableError> {
        self.log.commits(None).await.context(TransactionLogSnafu)
    }

    /// Partitions holding live files at `as_of` (or the latest version).
    pub async fn partitions(&self, as_of: Option<u64>) -> Result<Vec<PartitionPath>, TableError> {
        let state = self.state(as_of).await?;
        Ok(FileGroupManager::resolve_active(&state)
            .into_keys()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexScope, WriteOperation};
    use crate::table::test_util::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_requires_existing_table() -> TestResult {
        let tmp = TempDir::new()?;
        let err = TableHandle::open(TableLocation::local(tmp.path()))
            .await
            .expect_err("no table yet");
        assert!(matches!(err, TableError::NotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn open_adopts_recorded_settings() -> TestResult {
        let tmp = TempDir::new()?;
        let mut handle = create_trips_handle(&tmp).await?;
        handle
            .write(trips_batch(&[trip("u1", "sf", 1, 10.0)]), None)
            .await?;

        let reopened = TableHandle::open(TableLocation::local(tmp.path())).await?;
        assert_eq!(reopened.config().record_key_fields, vec!["uuid".to_string()]);
        assert_eq!(reopened.config().partition_path_fields, vec!["city".to_string()]);
        assert_eq!(reopened.config().precombine_field.as_deref(), Some("ts"));
        assert_eq!(reopened.current_version().await?, 1);
        assert_eq!(reopened.partitions(None).await?, vec![PartitionPath::new("sf")]);
        Ok(())
    }

    #[tokio::test]
    async fn reopening_with_different_key_fields_is_rejected() -> TestResult {
        let tmp = TempDir::new()?;
        let mut handle = create_trips_handle(&tmp).await?;
        handle
            .write(trips_batch(&[trip("u1", "sf", 1, 10.0)]), None)
            .await?;

        let config = trips_config(&tmp).with_partition_fields(Vec::<String>::new());
        let err = TableHandle::open_with_config(config)
            .await
            .expect_err("partition settings differ");
        assert_eq!(err.kind(), ErrorKind::Config);

        let config = trips_config(&tmp).with_index_scope(IndexScope::Global);
        assert!(TableHandle::open_with_config(config).await.is_err());

        // Overwrite discards the old table, so its settings do not apply.
        let config = trips_config(&tmp)
            .with_partition_fields(Vec::<String>::new())
            .with_mode(crate::config::WriteMode::Overwrite)
            .with_operation(WriteOperation::Insert);
        assert!(TableHandle::open_with_config(config).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn state_of_empty_table_is_an_error() -> TestResult {
        let tmp = TempDir::new()?;
        let handle = create_trips_handle(&tmp).await?;
        let err = handle.state(None).await.expect_err("empty");
        assert!(matches!(err, TableError::EmptyTable));
        assert!(handle.commits().await?.is_empty());
        Ok(())
    }
}
