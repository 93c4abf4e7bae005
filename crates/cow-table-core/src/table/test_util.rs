use crate::config::TableConfig;
use crate::formats::StoredRow;
use crate::row::{Row, RowBatch, Value};
use crate::storage::TableLocation;
use crate::table::{TableError, TableHandle};
use crate::transaction_log::{LogicalDataType, LogicalField, LogicalSchema};
use tempfile::TempDir;

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

/// uuid (key) / city (partition) / ts (precombine) / fare.
pub(crate) fn trips_schema() -> LogicalSchema {
    LogicalSchema::new(vec![
        LogicalField::new("uuid", LogicalDataType::Utf8, false),
        LogicalField::new("city", LogicalDataType::Utf8, true),
        LogicalField::new("ts", LogicalDataType::Int64, false),
        LogicalField::new("fare", LogicalDataType::Float64, true),
    ])
    .expect("valid logical schema")
}

pub(crate) fn trip(uuid: &str, city: &str, ts: i64, fare: f64) -> Row {
    Row::new()
        .with("uuid", uuid)
        .with("city", city)
        .with("ts", ts)
        .with("fare", fare)
}

pub(crate) fn trips_batch(rows: &[Row]) -> RowBatch {
    RowBatch::new(trips_schema(), rows.to_vec())
}

pub(crate) fn trips_config(tmp: &TempDir) -> TableConfig {
    let mut config = TableConfig::new("trips", TableLocation::local(tmp.path()), ["uuid"])
        .with_partition_fields(["city"])
        .with_precombine_field("ts");
    config.parallelism = 2;
    config
}

pub(crate) async fn create_trips_handle(tmp: &TempDir) -> Result<TableHandle, TableError> {
    TableHandle::open_with_config(trips_config(tmp)).await
}

pub(crate) fn fare_of(row: &StoredRow) -> f64 {
    match row.row.get("fare") {
        Some(Value::Float64(v)) => *v,
        other => panic!("unexpected fare {other:?}"),
    }
}

pub(crate) fn data_files_on_disk(tmp: &TempDir) -> Vec<std::path::PathBuf> {
    fn walk(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, out);
            } else if path.extension().is_some_and(|e| e == "parquet") {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    walk(tmp.path(), &mut out);
    out.sort();
    out
}
