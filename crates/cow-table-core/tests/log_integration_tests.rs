#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures::TryStreamExt;
use tempfile::TempDir;

use cow_table_core::{
    ErrorKind, Row, RowBatch, TableConfig, TableHandle, TableLocation, WriteOperation,
    storage::layout,
    transaction_log::{LogicalDataType, LogicalField, LogicalSchema},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn batch(keys: &[&str]) -> RowBatch {
    let schema = LogicalSchema::new(vec![
        LogicalField::new("id", LogicalDataType::Utf8, false),
        LogicalField::new("n", LogicalDataType::Int64, true),
    ])
    .expect("schema");
    let rows = keys
        .iter()
        .enumerate()
        .map(|(i, k)| Row::new().with("id", *k).with("n", i as i64))
        .collect();
    RowBatch::new(schema, rows)
}

async fn table_with_commits(tmp: &TempDir, commits: usize) -> Result<TableHandle, Box<dyn std::error::Error>> {
    let config = TableConfig::new("events", TableLocation::local(tmp.path()), ["id"]);
    let mut handle = TableHandle::open_with_config(config).await?;
    for i in 0..commits {
        let key = format!("k{i}");
        handle.write(batch(&[key.as_str()]), None).await?;
    }
    Ok(handle)
}

#[tokio::test]
async fn commit_published_without_current_update_is_visible() -> TestResult {
    let tmp = TempDir::new()?;
    let handle = table_with_commits(&tmp, 2).await?;

    let current = tmp.path().join(layout::current_rel_path());
    std::fs::write(&current, "1\n")?;
    assert_eq!(handle.current_version().await?, 2);
    assert_eq!(handle.snapshot(None).await?.row_count(), 2);

    std::fs::remove_file(&current)?;
    let reopened = TableHandle::open(TableLocation::local(tmp.path())).await?;
    assert_eq!(reopened.snapshot(None).await?.version(), 2);
    Ok(())
}

#[tokio::test]
async fn corrupt_commit_file_is_reported() -> TestResult {
    let tmp = TempDir::new()?;
    let handle = table_with_commits(&tmp, 2).await?;

    std::fs::write(tmp.path().join(layout::commit_rel_path(2)), b"{ not json")?;
    let err = handle.snapshot(None).await.expect_err("corrupt commit");
    assert_eq!(err.kind(), ErrorKind::CorruptCommitLog);
    assert!(!err.is_recoverable());

    // Versions before the damage still resolve.
    assert_eq!(handle.snapshot(Some(1)).await?.row_count(), 1);
    Ok(())
}

#[tokio::test]
async fn misnumbered_commit_file_is_reported() -> TestResult {
    let tmp = TempDir::new()?;
    let handle = table_with_commits(&tmp, 1).await?;

    std::fs::copy(
        tmp.path().join(layout::commit_rel_path(1)),
        tmp.path().join(layout::commit_rel_path(2)),
    )?;
    let err = handle.snapshot(None).await.expect_err("misnumbered");
    assert_eq!(err.kind(), ErrorKind::CorruptCommitLog);
    Ok(())
}

#[tokio::test]
async fn history_lists_every_write_in_order() -> TestResult {
    let tmp = TempDir::new()?;
    let mut handle = table_with_commits(&tmp, 2).await?;
    handle
        .write(batch(&["k0"]), Some(WriteOperation::Insert))
        .await?;

    let commits = handle.commits().await?;
    let versions: Vec<u64> = commits.iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(commits[2].operation, WriteOperation::Insert);
    assert!(
        commits
            .windows(2)
            .all(|w| w[0].commit_time < w[1].commit_time)
    );

    let changes = commits[1].partition_changes();
    assert_eq!(changes.len(), 1);
    let change = changes.values().next().expect("one partition");
    assert_eq!(change.added.len(), 1);
    assert_eq!(change.superseded.len(), 1);

    let streamed: Vec<_> = handle
        .log_store()
        .read_up_to(Some(2))
        .await?
        .try_collect()
        .await?;
    assert_eq!(streamed, commits[..2].to_vec());
    Ok(())
}
