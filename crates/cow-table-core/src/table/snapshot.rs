//! Snapshot reads.
//!
//! A [`Snapshot`] pins one committed version: the table state and its live
//! file list are resolved once, so every scan of the snapshot reads the same
//! files no matter how many commits land afterwards. Scans are lazy streams
//! of record batches with the provenance columns first, produced in
//! partition order and then file group order.

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use log::debug;
use snafu::prelude::*;

use crate::{
    executor::BatchExecutor,
    file_groups::FileGroupManager,
    formats::{StoredRow, arrow_rows::stored_rows_from_batch, provenance_schema},
    table::{
        TableHandle,
        error::{CodecSnafu, DataFileSnafu, ExecutorSnafu, TableError},
    },
    transaction_log::{CommitTime, DataFileMeta, PartitionPath, TableMeta},
};

/// Stream of record batches produced by [`Snapshot::scan`].
pub type SnapshotScan = BoxStream<'static, Result<RecordBatch, TableError>>;

/// A consistent, read-only view of the table at one version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    table_meta: TableMeta,
    last_commit_time: Option<CommitTime>,
    files: Vec<DataFileMeta>,
    schema: SchemaRef,
    manager: FileGroupManager,
    executor: BatchExecutor,
    concurrency: usize,
}

impl Snapshot {
    /// Version the snapshot reflects.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Table metadata as of the snapshot.
    pub fn table_meta(&self) -> &TableMeta {
        &self.table_meta
    }

    /// Commit time of the snapshot's version.
    pub fn commit_time(&self) -> Option<&CommitTime> {
        self.last_commit_time.as_ref()
    }

    /// Live data files in scan order.
    pub fn files(&self) -> &[DataFileMeta] {
        &self.files
    }

    /// Distinct partitions holding live files.
    pub fn partitions(&self) -> Vec<PartitionPath> {
        let mut out: Vec<PartitionPath> = self.files.iter().map(|f| f.partition.clone()).collect();
        out.dedup();
        out
    }

    /// Arrow schema of scanned batches: provenance columns, then table columns.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Total rows across live files.
    pub fn row_count(&self) -> u64 {
        self.files.iter().map(|f| f.row_count).sum()
    }

    /// Stream the snapshot's rows as record batches.
    ///
    /// Files are fetched concurrently (bounded by the write parallelism) and
    /// decoded on the batch executor, but batches are yielded in
    /// deterministic file order.
    pub fn scan(&self) -> SnapshotScan {
        let manager = self.manager.clone();
        let executor = self.executor.clone();
        stream::iter(self.files.clone())
            .map(move |file| {
                let manager = manager.clone();
                let executor = executor.clone();
                async move {
                    let bytes = manager.read_bytes(&file).await.context(DataFileSnafu)?;
                    let decoded = executor
                        .try_map(vec![(file, bytes)], move |(file, bytes)| {
                            manager.decode_batches(&file, bytes)
                        })
                        .await
                        .context(ExecutorSnafu)?
                        .context(DataFileSnafu)?;
                    let batches = decoded.into_iter().flatten().map(Ok::<_, TableError>);
                    Ok::<_, TableError>(stream::iter(batches))
                }
            })
            .buffered(self.concurrency.max(1))
            .try_flatten()
            .boxed()
    }

    /// Materialise every row with its provenance.
    pub async fn collect_rows(&self) -> Result<Vec<StoredRow>, TableError> {
        let mut scan = self.scan();
        let mut out = Vec::new();
        while let Some(batch) = scan.try_next().await? {
            out.extend(stored_rows_from_batch(&self.table_meta.schema, &batch).context(CodecSnafu)?);
        }
        Ok(out)
    }
}

impl TableHandle {
    /// Resolve a snapshot at `as_of` (or the latest version).
    ///
    /// Fails with [`TableError::EmptyTable`] when the table has no commits.
    pub async fn snapshot(&self, as_of: Option<u64>) -> Result<Snapshot, TableError> {
        let state = self.state(as_of).await?;
        let files: Vec<DataFileMeta> = FileGroupManager::resolve_active(&state)
            .into_values()
            .flatten()
            .collect();
        debug!(
            "snapshot of {} at version {}: {} live files",
            state.table_meta.name,
            state.version,
            files.len()
        );

        Ok(Snapshot {
            version: state.version,
            schema: provenance_schema(&state.table_meta.schema),
            table_meta: state.table_meta,
            last_commit_time: state.last_commit_time,
            files,
            manager: self.files.clone(),
            executor: self.executor.clone(),
            concurrency: self.config.parallelism,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::PROVENANCE_COLUMNS;
    use crate::table::test_util::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn snapshot_of_empty_table_fails() -> TestResult {
        let tmp = TempDir::new()?;
        let handle = create_trips_handle(&tmp).await?;
        let err = handle.snapshot(None).await.expect_err("no commits");
        assert!(matches!(err, TableError::EmptyTable));
        Ok(())
    }

    #[tokio::test]
    async fn scan_yields_provenance_columns_first_in_partition_order() -> TestResult {
        let tmp = TempDir::new()?;
        let mut handle = create_trips_handle(&tmp).await?;
        handle
            .write(
                trips_batch(&[trip("u2", "sf", 1, 2.0), trip("u1", "la", 1, 1.0)]),
                None,
            )
            .await?;

        let snapshot = handle.snapshot(None).await?;
        assert_eq!(snapshot.version(), 1);
        assert_eq!(
            snapshot.partitions(),
            vec![PartitionPath::new("la"), PartitionPath::new("sf")]
        );

        let schema = snapshot.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(&names[..3], &PROVENANCE_COLUMNS[..]);
        assert_eq!(&names[3..], &["uuid", "city", "ts", "fare"]);

        let batches: Vec<RecordBatch> = snapshot.scan().try_collect().await?;
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
        assert!(batches.iter().all(|b| b.schema() == schema));

        let rows = snapshot.collect_rows().await?;
        let keys: Vec<_> = rows.iter().map(|r| r.record_key.to_string()).collect();
        assert_eq!(keys, vec!["u1", "u2"]);
        Ok(())
    }

    #[tokio::test]
    async fn historical_snapshot_ignores_later_commits() -> TestResult {
        let tmp = TempDir::new()?;
        let mut handle = create_trips_handle(&tmp).await?;
        handle
            .write(trips_batch(&[trip("u1", "sf", 1, 1.0)]), None)
            .await?;
        let pinned = handle.snapshot(None).await?;

        handle
            .write(trips_batch(&[trip("u1", "sf", 2, 5.0), trip("u2", "sf", 2, 6.0)]), None)
            .await?;

        // A snapshot resolved before the second commit still reads version 1.
        let rows = pinned.collect_rows().await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(fare_of(&rows[0]), 1.0);

        let v1 = handle.snapshot(Some(1)).await?;
        assert_eq!(v1.files(), pinned.files());
        assert_eq!(handle.snapshot(None).await?.row_count(), 2);

        let err = handle.snapshot(Some(9)).await.expect_err("unknown version");
        assert_eq!(err.kind(), crate::table::ErrorKind::NotFound);
        Ok(())
    }
}
