//! File groups: the unit of copy-on-write replacement.
//!
//! Each partition holds a set of file groups, each with exactly one live data
//! file at any committed version. Updating a group never touches its current
//! file: the merged content is encoded into a brand-new immutable file and
//! the old one is superseded by the commit.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use arrow::array::RecordBatch;
use bytes::Bytes;
use log::warn;
use snafu::prelude::*;

use crate::formats::{CodecError, ColumnarCodec, StoredRow};
use crate::keys::RecordKey;
use crate::storage::{self, StorageError, TableLocation, layout};
use crate::transaction_log::{
    CommitTime, DataFileId, DataFileMeta, FileGroupId, LogicalSchema, PartitionPath, TableState,
};

/// Errors from reading or writing data files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FileGroupError {
    /// Storage failure while reading or writing a data file.
    #[snafu(display("Storage error for data file: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// A data file could not be encoded or decoded.
    #[snafu(display("Codec error for data file {path}: {source}"))]
    Codec {
        /// Relative path of the file.
        path: String,
        /// Underlying codec error.
        source: CodecError,
    },
}

/// A data file encoded in memory but not yet written.
#[derive(Debug, Clone)]
pub struct EncodedFile {
    /// Metadata the commit will record for the file.
    pub meta: DataFileMeta,
    /// Encoded file contents.
    pub bytes: Bytes,
}

/// Reads and writes the data files of one table.
#[derive(Debug, Clone)]
pub struct FileGroupManager {
    location: TableLocation,
    codec: Arc<dyn ColumnarCodec>,
}

impl FileGroupManager {
    /// Manager for the table at `location` using `codec`.
    pub fn new(location: TableLocation, codec: Arc<dyn ColumnarCodec>) -> Self {
        Self { location, codec }
    }

    /// Same codec, different table root.
    pub fn relocated(&self, location: TableLocation) -> Self {
        Self {
            location,
            codec: Arc::clone(&self.codec),
        }
    }

    /// Live files of `state` grouped by partition, ordered by file group id.
    pub fn resolve_active(state: &TableState) -> BTreeMap<PartitionPath, Vec<DataFileMeta>> {
        let mut out: BTreeMap<PartitionPath, Vec<DataFileMeta>> = BTreeMap::new();
        for file in state.files.values() {
            out.entry(file.partition.clone())
                .or_default()
                .push(file.clone());
        }
        for files in out.values_mut() {
            files.sort_by(|a, b| a.file_group_id.cmp(&b.file_group_id));
        }
        out
    }

    /// Encode `rows` as the next version of `file_group_id`.
    ///
    /// Pure CPU work; nothing is written.
    pub fn encode_version(
        &self,
        schema: &LogicalSchema,
        partition: &PartitionPath,
        file_group_id: &FileGroupId,
        commit_time: &CommitTime,
        rows: &[StoredRow],
    ) -> Result<EncodedFile, CodecError> {
        let bytes = self.codec.encode(schema, rows)?;
        let file_id = DataFileId::for_content(&bytes);
        let rel = layout::data_file_rel_path(partition, file_group_id, commit_time.as_str(), &file_id);

        let meta = DataFileMeta {
            file_id,
            file_group_id: file_group_id.clone(),
            partition: partition.clone(),
            path: rel.to_string_lossy().into_owned(),
            commit_time: commit_time.clone(),
            row_count: rows.len() as u64,
            size_bytes: bytes.len() as u64,
            format: self.codec.format(),
        };
        Ok(EncodedFile { meta, bytes })
    }

    /// Write an encoded file. Existing files are never overwritten.
    pub async fn persist(&self, file: &EncodedFile) -> Result<(), FileGroupError> {
        storage::write_immutable(&self.location, Path::new(&file.meta.path), &file.bytes)
            .await
            .context(StorageSnafu)
    }

    /// Encode and write a new version of a file group.
    pub async fn write_new_version(
        &self,
        schema: &LogicalSchema,
        partition: &PartitionPath,
        file_group_id: &FileGroupId,
        commit_time: &CommitTime,
        rows: &[StoredRow],
    ) -> Result<DataFileMeta, FileGroupError> {
        let encoded = self
            .encode_version(schema, partition, file_group_id, commit_time, rows)
            .context(CodecSnafu {
                path: format!("{partition}/{file_group_id}"),
            })?;
        self.persist(&encoded).await?;
        Ok(encoded.meta)
    }

    /// Fetch the raw bytes of a data file.
    pub async fn read_bytes(&self, file: &DataFileMeta) -> Result<Bytes, FileGroupError> {
        storage::read_all_bytes(&self.location, Path::new(&file.path))
            .await
            .context(StorageSnafu)
    }

    /// Decode all rows of a data file.
    pub async fn read_rows(
        &self,
        schema: &LogicalSchema,
        file: &DataFileMeta,
    ) -> Result<Vec<StoredRow>, FileGroupError> {
        let bytes = self.read_bytes(file).await?;
        self.codec
            .decode_rows(schema, bytes)
            .context(CodecSnafu { path: &file.path })
    }

    /// Decode only the record keys of a data file.
    pub async fn read_keys(&self, file: &DataFileMeta) -> Result<Vec<RecordKey>, FileGroupError> {
        let bytes = self.read_bytes(file).await?;
        self.codec
            .decode_keys(bytes)
            .context(CodecSnafu { path: &file.path })
    }

    /// Decode bytes already fetched for `file` into record batches
    /// (provenance schema).
    pub fn decode_batches(
        &self,
        file: &DataFileMeta,
        bytes: Bytes,
    ) -> Result<Vec<RecordBatch>, FileGroupError> {
        self.codec
            .decode_batches(bytes)
            .context(CodecSnafu { path: &file.path })
    }

    /// Delete files written by an attempt that never committed. Best effort.
    pub async fn discard(&self, files: &[DataFileMeta]) {
        for file in files {
            if let Err(e) = storage::remove_file(&self.location, Path::new(&file.path)).await {
                warn!("failed to remove uncommitted data file {}: {e}", file.path);
            }
        }
    }
}

/// Assign `new_rows` rows of one partition to file groups.
///
/// Rows go first to the least loaded existing groups whose row count is below
/// `max_rows` (filling each up to `max_rows`), then to freshly minted groups
/// of at most `max_rows` rows each. Returns `(group, rows)` chunks in the
/// order rows should be taken.
pub fn pack_new_rows(
    existing: &[(FileGroupId, usize)],
    new_rows: usize,
    max_rows: usize,
    mut mint: impl FnMut() -> FileGroupId,
) -> Vec<(FileGroupId, usize)> {
    let max_rows = max_rows.max(1);
    let mut candidates: Vec<&(FileGroupId, usize)> =
        existing.iter().filter(|(_, n)| *n < max_rows).collect();
    candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut remaining = new_rows;
    let mut out = Vec::new();
    for (group, load) in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(max_rows - load);
        out.push((group.clone(), take));
        remaining -= take;
    }
    while remaining > 0 {
        let take = remaining.min(max_rows);
        out.push((mint(), take));
        remaining -= take;
    }
    out
}
