//! Conversion between rows and Arrow record batches.

use std::sync::Arc;

use arrow::{
    array::{
        Array, ArrayRef, ArrowPrimitiveType, AsArray, BooleanArray, Date32Array, Float64Array,
        Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
    },
    compute::cast,
    datatypes::{Date32Type, Float64Type, Int64Type, Schema, TimestampMicrosecondType},
};
use snafu::prelude::*;

use crate::formats::{
    ArrowSnafu, COMMIT_TIME_COLUMN, CodecError, InputSchemaSnafu, MissingColumnSnafu,
    MixedInputSchemasSnafu, NullProvenanceSnafu, PARTITION_PATH_COLUMN, RECORD_KEY_COLUMN,
    StoredRow, UnexpectedTypeSnafu, ValueTypeSnafu, provenance_schema,
};
use crate::keys::RecordKey;
use crate::row::{Row, RowBatch, Value};
use crate::transaction_log::{CommitTime, LogicalDataType, LogicalSchema, PartitionPath};

const NULL: Value = Value::Null;

fn collect_typed<'a, T>(
    column: &str,
    data_type: &LogicalDataType,
    values: impl Iterator<Item = &'a Value>,
    pick: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>, CodecError> {
    values
        .map(|v| {
            if v.is_null() {
                return Ok(None);
            }
            pick(v).map(Some).context(ValueTypeSnafu {
                column,
                expected: data_type.clone(),
                found: v.type_name(),
            })
        })
        .collect()
}

/// Build an Arrow array of `data_type` from `values`.
pub fn array_from_values<'a>(
    column: &str,
    data_type: &LogicalDataType,
    values: impl Iterator<Item = &'a Value>,
) -> Result<ArrayRef, CodecError> {
    Ok(match data_type {
        LogicalDataType::Bool => Arc::new(BooleanArray::from(collect_typed(
            column,
            data_type,
            values,
            |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            },
        )?)),
        LogicalDataType::Int64 => Arc::new(Int64Array::from(collect_typed(
            column,
            data_type,
            values,
            |v| match v {
                Value::Int64(i) => Some(*i),
                _ => None,
            },
        )?)),
        LogicalDataType::Float64 => Arc::new(Float64Array::from(collect_typed(
            column,
            data_type,
            values,
            |v| match v {
                Value::Float64(x) => Some(*x),
                _ => None,
            },
        )?)),
        LogicalDataType::Utf8 => Arc::new(StringArray::from(collect_typed(
            column,
            data_type,
            values,
            |v| match v {
                Value::Utf8(s) => Some(s.clone()),
                _ => None,
            },
        )?)),
        LogicalDataType::Date32 => Arc::new(Date32Array::from(collect_typed(
            column,
            data_type,
            values,
            |v| match v {
                Value::Date(d) => Some(*d),
                _ => None,
            },
        )?)),
        LogicalDataType::Timestamp { timezone, .. } => Arc::new(
            TimestampMicrosecondArray::from(collect_typed(column, data_type, values, |v| {
                match v {
                    Value::Timestamp(t) => Some(*t),
                    _ => None,
                }
            })?)
            .with_timezone_opt(timezone.clone()),
        ),
    })
}

fn primitive_values<T: ArrowPrimitiveType>(
    column: &str,
    array: &ArrayRef,
    wrap: impl Fn(T::Native) -> Value,
) -> Result<Vec<Value>, CodecError> {
    let typed = array
        .as_primitive_opt::<T>()
        .context(UnexpectedTypeSnafu {
            column,
            expected: T::DATA_TYPE.to_string(),
            found: array.data_type().to_string(),
        })?;
    Ok((0..typed.len())
        .map(|i| {
            if typed.is_null(i) {
                Value::Null
            } else {
                wrap(typed.value(i))
            }
        })
        .collect())
}

/// Read an Arrow array as values of `data_type`, casting when the physical
/// type differs (narrower ints, other timestamp units, string views).
pub fn values_from_array(
    column: &str,
    data_type: &LogicalDataType,
    array: &ArrayRef,
) -> Result<Vec<Value>, CodecError> {
    let target = data_type.to_arrow_datatype();
    let array = if array.data_type() == &target {
        Arc::clone(array)
    } else {
        cast(array, &target).context(ArrowSnafu)?
    };

    match data_type {
        LogicalDataType::Bool => {
            let typed = array.as_boolean_opt().context(UnexpectedTypeSnafu {
                column,
                expected: target.to_string(),
                found: array.data_type().to_string(),
            })?;
            Ok((0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        Value::Null
                    } else {
                        Value::Bool(typed.value(i))
                    }
                })
                .collect())
        }
        LogicalDataType::Int64 => primitive_values::<Int64Type>(column, &array, Value::Int64),
        LogicalDataType::Float64 => primitive_values::<Float64Type>(column, &array, Value::Float64),
        LogicalDataType::Date32 => primitive_values::<Date32Type>(column, &array, Value::Date),
        LogicalDataType::Timestamp { .. } => {
            primitive_values::<TimestampMicrosecondType>(column, &array, Value::Timestamp)
        }
        LogicalDataType::Utf8 => {
            let typed = array.as_string_opt::<i32>().context(UnexpectedTypeSnafu {
                column,
                expected: target.to_string(),
                found: array.data_type().to_string(),
            })?;
            Ok((0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        Value::Null
                    } else {
                        Value::Utf8(typed.value(i).to_string())
                    }
                })
                .collect())
        }
    }
}

/// Encode stored rows into a record batch with the provenance schema.
pub fn batch_from_stored_rows(
    schema: &LogicalSchema,
    rows: &[StoredRow],
) -> Result<RecordBatch, CodecError> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len() + 3);
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.commit_time.as_str()),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.record_key.as_str()),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.partition_path.as_str()),
    )));

    for col in schema.columns() {
        let values = rows.iter().map(|r| r.row.get(&col.name).unwrap_or(&NULL));
        columns.push(array_from_values(&col.name, &col.data_type, values)?);
    }

    RecordBatch::try_new(provenance_schema(schema), columns).context(ArrowSnafu)
}

fn provenance_strings(batch: &RecordBatch, column: &str) -> Result<Vec<String>, CodecError> {
    let array = batch
        .column_by_name(column)
        .context(MissingColumnSnafu { column })?;
    let typed = array.as_string_opt::<i32>().context(UnexpectedTypeSnafu {
        column,
        expected: "Utf8",
        found: array.data_type().to_string(),
    })?;
    (0..typed.len())
        .map(|i| -> Result<String, CodecError> {
            ensure!(!typed.is_null(i), NullProvenanceSnafu { column });
            Ok(typed.value(i).to_string())
        })
        .collect()
}

/// Decode a record batch with the provenance schema into stored rows.
pub fn stored_rows_from_batch(
    schema: &LogicalSchema,
    batch: &RecordBatch,
) -> Result<Vec<StoredRow>, CodecError> {
    let commit_times = provenance_strings(batch, COMMIT_TIME_COLUMN)?;
    let keys = provenance_strings(batch, RECORD_KEY_COLUMN)?;
    let partitions = provenance_strings(batch, PARTITION_PATH_COLUMN)?;

    let mut columns = Vec::with_capacity(schema.len());
    for col in schema.columns() {
        let array = batch
            .column_by_name(&col.name)
            .context(MissingColumnSnafu {
                column: col.name.clone(),
            })?;
        columns.push(values_from_array(&col.name, &col.data_type, array)?);
    }

    let mut out = Vec::with_capacity(batch.num_rows());
    for (i, ((commit_time, key), partition)) in commit_times
        .into_iter()
        .zip(keys)
        .zip(partitions)
        .enumerate()
    {
        let row = schema
            .columns()
            .iter()
            .zip(&columns)
            .map(|(col, values)| (col.name.clone(), values[i].clone()))
            .collect();
        out.push(StoredRow {
            commit_time: CommitTime::new(commit_time),
            record_key: RecordKey::new(key),
            partition_path: PartitionPath::new(partition),
            row,
        });
    }
    Ok(out)
}

/// Convert input record batches (all sharing `schema`) into a row batch.
pub fn row_batch_from_record_batches(
    schema: &Schema,
    batches: &[RecordBatch],
) -> Result<RowBatch, CodecError> {
    let logical = LogicalSchema::from_arrow_schema(schema).context(InputSchemaSnafu)?;

    let mut rows = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());
    for batch in batches {
        ensure!(
            batch.schema().fields() == schema.fields(),
            MixedInputSchemasSnafu
        );

        let mut columns = Vec::with_capacity(logical.len());
        for (col, array) in logical.columns().iter().zip(batch.columns()) {
            columns.push(values_from_array(&col.name, &col.data_type, array)?);
        }

        for i in 0..batch.num_rows() {
            rows.push(
                logical
                    .columns()
                    .iter()
                    .zip(&columns)
                    .map(|(col, values)| (col.name.clone(), values[i].clone()))
                    .collect::<Row>(),
            );
        }
    }

    Ok(RowBatch::new(logical, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, TimeUnit};

    fn schema() -> LogicalSchema {
        LogicalSchema::new(vec![
            crate::transaction_log::LogicalField::new("name", LogicalDataType::Utf8, false),
            crate::transaction_log::LogicalField::new("cost", LogicalDataType::Float64, true),
        ])
        .expect("schema")
    }

    #[test]
    fn stored_rows_survive_a_batch() {
        let rows = vec![
            StoredRow {
                commit_time: CommitTime::new("20000101000000000"),
                record_key: RecordKey::new("Joe"),
                partition_path: PartitionPath::new("2000-01-01"),
                row: Row::new().with("name", "Joe").with("cost", 69.0),
            },
            StoredRow {
                commit_time: CommitTime::new("20000101000000000"),
                record_key: RecordKey::new("Don"),
                partition_path: PartitionPath::new("2000-01-01"),
                row: Row::new().with("name", "Don").with("cost", Value::Null),
            },
        ];

        let batch = batch_from_stored_rows(&schema(), &rows).expect("encode");
        let names: Vec<_> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(
            names,
            vec!["_commit_time", "_record_key", "_partition_path", "name", "cost"]
        );
        assert_eq!(stored_rows_from_batch(&schema(), &batch).expect("decode"), rows);
    }

    #[test]
    fn encoding_rejects_mistyped_values() {
        let rows = vec![StoredRow {
            commit_time: CommitTime::new("1"),
            record_key: RecordKey::new("k"),
            partition_path: PartitionPath::unpartitioned(),
            row: Row::new().with("name", "k").with("cost", "lots"),
        }];
        assert!(matches!(
            batch_from_stored_rows(&schema(), &rows),
            Err(CodecError::ValueType { .. })
        ));
    }

    #[test]
    fn input_batches_widen_to_logical_types() {
        let input = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                true,
            ),
        ]));
        let batch = RecordBatch::try_new(
            input.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(
                    arrow::array::TimestampMillisecondArray::from(vec![Some(1_000), None])
                        .with_timezone("UTC"),
                ),
            ],
        )
        .expect("batch");

        let rows = row_batch_from_record_batches(&input, &[batch]).expect("rows");
        assert_eq!(rows.schema().columns()[0].data_type, LogicalDataType::Int64);
        assert_eq!(
            rows.rows()[0],
            Row::new().with("id", 1_i64).with("ts", Value::Timestamp(1_000_000))
        );
        assert_eq!(rows.rows()[1].get("ts"), Some(&Value::Null));
    }
}
