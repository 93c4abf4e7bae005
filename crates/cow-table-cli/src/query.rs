use arrow::{array::RecordBatch, util::pretty::pretty_format_batches};
use cow_table_core::TableHandle;
use cow_table_datafusion::register_snapshot;
use datafusion::prelude::SessionContext;
use snafu::ResultExt;

use crate::error::{ArrowSnafu, CliResult, DataFusionSnafu};

/// Default SQL name for the registered snapshot.
pub const DEFAULT_TABLE_NAME: &str = "snapshot";

#[derive(Debug, Clone)]
pub struct QueryOpts {
    pub name: String,
    pub as_of: Option<u64>,
    pub max_rows: Option<usize>,
}

#[derive(Debug)]
pub struct QueryResult {
    pub batches: Vec<RecordBatch>,
    pub total_rows: usize,
}

/// Replace anything that is not a plain SQL identifier character.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        return DEFAULT_TABLE_NAME.to_string();
    }
    if out.chars().next().is_some_and(|ch| !ch.is_ascii_alphabetic()) {
        out = format!("t_{out}");
    }
    out.make_ascii_lowercase();
    out
}

/// Run `sql` against a snapshot of `handle` registered under `opts.name`.
pub async fn run_query(handle: &TableHandle, sql: &str, opts: &QueryOpts) -> CliResult<QueryResult> {
    let ctx = SessionContext::new();
    register_snapshot(&ctx, &opts.name, handle, opts.as_of)
        .await
        .context(DataFusionSnafu)?;

    let batches = ctx
        .sql(sql)
        .await
        .context(DataFusionSnafu)?
        .collect()
        .await
        .context(DataFusionSnafu)?;
    let total_rows = batches.iter().map(RecordBatch::num_rows).sum();

    Ok(QueryResult {
        batches,
        total_rows,
    })
}

/// First `limit` rows of `batches`.
pub fn truncate_batches(batches: &[RecordBatch], limit: usize) -> Vec<RecordBatch> {
    let mut out = Vec::new();
    let mut remaining = limit;
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.num_rows());
        out.push(batch.slice(0, take));
        remaining -= take;
    }
    out
}

/// Pretty table of the (possibly truncated) result plus a row count line.
pub fn render_result(res: &QueryResult, opts: &QueryOpts) -> CliResult<String> {
    let shown = match opts.max_rows {
        Some(limit) => truncate_batches(&res.batches, limit),
        None => res.batches.clone(),
    };
    let shown_rows: usize = shown.iter().map(RecordBatch::num_rows).sum();

    let mut out = String::new();
    if shown_rows > 0 {
        out.push_str(&pretty_format_batches(&shown).context(ArrowSnafu)?.to_string());
        out.push('\n');
    }
    if shown_rows < res.total_rows {
        out.push_str(&format!(
            "({} rows, showing first {shown_rows})",
            res.total_rows
        ));
    } else {
        out.push_str(&format!("({} rows)", res.total_rows));
    }
    Ok(out)
}
