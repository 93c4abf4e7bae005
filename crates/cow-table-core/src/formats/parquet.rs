//! Parquet implementation of [`ColumnarCodec`].
//!
//! Files are written in memory with `ArrowWriter` (Snappy compression) and
//! read back from `Bytes` with `ParquetRecordBatchReaderBuilder`, so the
//! storage layer only ever moves whole buffers.

use arrow::array::{Array, AsArray, RecordBatch};
use bytes::Bytes;
use parquet::{
    arrow::{ArrowWriter, ProjectionMask, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::Compression,
    file::properties::WriterProperties,
};
use snafu::prelude::*;

use crate::formats::{
    ArrowSnafu, CodecError, ColumnarCodec, MissingColumnSnafu, NullProvenanceSnafu,
    ParquetSnafu, RECORD_KEY_COLUMN, StoredRow, UnexpectedTypeSnafu,
    arrow_rows::batch_from_stored_rows,
};
use crate::keys::RecordKey;
use crate::transaction_log::{FileFormat, LogicalSchema};

/// Parquet codec for data files.
#[derive(Debug, Clone)]
pub struct ParquetCodec {
    max_row_group_size: usize,
}

impl Default for ParquetCodec {
    fn default() -> Self {
        Self {
            max_row_group_size: 64 * 1024,
        }
    }
}

impl ParquetCodec {
    /// Codec with a custom row-group size.
    pub fn with_row_group_size(max_row_group_size: usize) -> Self {
        Self {
            max_row_group_size: max_row_group_size.max(1),
        }
    }

    fn writer_properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(self.max_row_group_size)
            .build()
    }
}

impl ColumnarCodec for ParquetCodec {
    fn format(&self) -> FileFormat {
        FileFormat::Parquet
    }

    fn encode(&self, schema: &LogicalSchema, rows: &[StoredRow]) -> Result<Bytes, CodecError> {
        let batch = batch_from_stored_rows(schema, rows)?;

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(self.writer_properties()))
            .context(ParquetSnafu)?;
        writer.write(&batch).context(ParquetSnafu)?;
        writer.close().context(ParquetSnafu)?;

        Ok(Bytes::from(buf))
    }

    fn decode_batches(&self, bytes: Bytes) -> Result<Vec<RecordBatch>, CodecError> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .context(ParquetSnafu)?
            .build()
            .context(ParquetSnafu)?;

        reader
            .map(|batch| batch.context(ArrowSnafu))
            .collect()
    }

    fn decode_keys(&self, bytes: Bytes) -> Result<Vec<RecordKey>, CodecError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).context(ParquetSnafu)?;
        let idx = builder
            .schema()
            .index_of(RECORD_KEY_COLUMN)
            .ok()
            .context(MissingColumnSnafu {
                column: RECORD_KEY_COLUMN,
            })?;
        let mask = ProjectionMask::roots(builder.parquet_schema(), [idx]);
        let reader = builder
            .with_projection(mask)
            .build()
            .context(ParquetSnafu)?;

        let mut keys = Vec::new();
        for batch in reader {
            let batch = batch.context(ArrowSnafu)?;
            let column = batch.column(0);
            let typed = column.as_string_opt::<i32>().context(UnexpectedTypeSnafu {
                column: RECORD_KEY_COLUMN,
                expected: "Utf8",
                found: column.data_type().to_string(),
            })?;
            for i in 0..typed.len() {
                ensure!(
                    !typed.is_null(i),
                    NullProvenanceSnafu {
                        column: RECORD_KEY_COLUMN
                    }
                );
                keys.push(RecordKey::new(typed.value(i)));
            }
        }
        Ok(keys)
    }
}
