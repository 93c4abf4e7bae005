//! Write pipeline (insert / upsert) for `TableHandle`.
//!
//! One call to [`TableHandle::write`] turns a batch into exactly one new
//! table version:
//! - validate rows against the table schema and derive partition, record key
//!   and precombine value per row,
//! - collapse duplicates inside the batch,
//! - route each row to the file group that already holds its key (record
//!   index) or pack it into a lightly loaded or new group,
//! - merge and encode every touched group on the batch executor, writing
//!   each result as a brand-new immutable data file,
//! - publish one commit guarded by the version the attempt started from.
//!
//! A lost publish race discards the attempt's files and retries against the
//! new latest state, up to `write.retry.maxAttempts` attempts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    config::{IndexScope, WriteMode, WriteOperation},
    file_groups::{EncodedFile, FileGroupError, FileGroupManager, pack_new_rows},
    formats::{CodecError, StoredRow, arrow_rows::row_batch_from_record_batches},
    keys::{KeyGenerator, RecordKey, incoming_wins},
    partitioner::Partitioner,
    record_index::RecordIndex,
    row::{Row, RowBatch, Value},
    schema::{SchemaError, conform_row, ensure_configured_fields, ensure_schema_exact_match},
    table::{
        TableHandle, WriteReport,
        error::{
            CodecSnafu, ConfigSnafu, DataFileSnafu, ExecutorSnafu, SchemaSnafu,
            TableError, TransactionLogSnafu, WriteConflictSnafu,
        },
    },
    transaction_log::{
        CommitError, CommitTime, DataFileMeta, FileGroupId, LogAction, LogicalSchema,
        PartitionPath, TableMeta, TableState,
    },
};

/// Hook run right before the commit is published.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct PreCommitHook(
    pub(crate) Arc<dyn Fn() -> futures::future::BoxFuture<'static, ()> + Send + Sync>,
);

#[cfg(test)]
impl std::fmt::Debug for PreCommitHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PreCommitHook")
    }
}

/// An incoming row with everything derived from it.
#[derive(Debug, Clone)]
pub(super) struct IncomingRow {
    partition: PartitionPath,
    key: RecordKey,
    precombine: Option<Value>,
    row: Row,
}

/// Work for one file group in one attempt.
#[derive(Debug)]
struct GroupJob {
    partition: PartitionPath,
    file_group_id: FileGroupId,
    current: Option<DataFileMeta>,
    updates: Vec<IncomingRow>,
    inserts: Vec<IncomingRow>,
}

#[derive(Debug)]
struct GroupOutcome {
    partition: PartitionPath,
    file_group_id: FileGroupId,
    superseded: Option<DataFileMeta>,
    written: Option<EncodedFile>,
    touched_keys: Vec<RecordKey>,
    inserted: u64,
    updated: u64,
    ignored: u64,
}

/// Shared, immutable inputs of the merge jobs.
#[derive(Debug)]
struct MergeContext {
    files: FileGroupManager,
    schema: LogicalSchema,
    commit_time: CommitTime,
    precombine_field: Option<String>,
}

enum AttemptError {
    Conflict { expected: u64, found: u64 },
    Failed(TableError),
}

impl From<TableError> for AttemptError {
    fn from(e: TableError) -> Self {
        AttemptError::Failed(e)
    }
}

/// Keep one row per key slot: greatest precombine wins, ties go to the later
/// row. Returns the survivors (in first-seen order) and the number dropped.
fn dedup_incoming(rows: Vec<IncomingRow>, scope: IndexScope) -> (Vec<IncomingRow>, u64) {
    let mut slots: HashMap<(PartitionPath, RecordKey), usize> = HashMap::new();
    let mut kept: Vec<IncomingRow> = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        let slot = match scope {
            IndexScope::Partition => (row.partition.clone(), row.key.clone()),
            IndexScope::Global => (PartitionPath::unpartitioned(), row.key.clone()),
        };
        match slots.get(&slot) {
            Some(&i) => {
                dropped += 1;
                if incoming_wins(row.precombine.as_ref(), kept[i].precombine.as_ref()) {
                    kept[i] = row;
                }
            }
            None => {
                slots.insert(slot, kept.len());
                kept.push(row);
            }
        }
    }
    (kept, dropped)
}

impl MergeContext {
    fn stored(&self, partition: &PartitionPath, row: IncomingRow) -> StoredRow {
        StoredRow {
            commit_time: self.commit_time.clone(),
            record_key: row.key,
            partition_path: partition.clone(),
            row: row.row,
        }
    }

    /// Merge incoming rows into a group's current rows and encode the result.
    ///
    /// Rows not touched by the batch keep their original commit time. A
    /// group where every incoming row lost its precombine comparison is left
    /// alone.
    fn merge_group(
        &self,
        job: GroupJob,
        mut rows: Vec<StoredRow>,
    ) -> Result<GroupOutcome, CodecError> {
        let mut position: HashMap<RecordKey, usize> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.record_key.clone(), i))
            .collect();
        let (mut inserted, mut updated, mut ignored) = (0, 0, 0);
        let mut touched_keys = Vec::new();

        for incoming in job.updates {
            match position.get(&incoming.key) {
                Some(&i) => {
                    let existing = self
                        .precombine_field
                        .as_deref()
                        .and_then(|f| rows[i].row.get(f));
                    if incoming_wins(incoming.precombine.as_ref(), existing) {
                        touched_keys.push(incoming.key.clone());
                        rows[i] = self.stored(&job.partition, incoming);
                        updated += 1;
                    } else {
                        ignored += 1;
                    }
                }
                None => {
                    position.insert(incoming.key.clone(), rows.len());
                    touched_keys.push(incoming.key.clone());
                    rows.push(self.stored(&job.partition, incoming));
                    inserted += 1;
                }
            }
        }

        for incoming in job.inserts {
            touched_keys.push(incoming.key.clone());
            rows.push(self.stored(&job.partition, incoming));
            inserted += 1;
        }

        let written = if touched_keys.is_empty() {
            None
        } else {
            Some(self.files.encode_version(
                &self.schema,
                &job.partition,
                &job.file_group_id,
                &self.commit_time,
                &rows,
            )?)
        };

        Ok(GroupOutcome {
            superseded: written.as_ref().and(job.current),
            partition: job.partition,
            file_group_id: job.file_group_id,
            written,
            touched_keys,
            inserted,
            updated,
            ignored,
        })
    }
}

impl TableHandle {
    /// Write a batch with `operation` (or the configured default).
    ///
    /// On success exactly one new version exists. On failure nothing becomes
    /// visible: files written by failed attempts are removed best effort.
    pub async fn write(
        &mut self,
        batch: RowBatch,
        operation: Option<WriteOperation>,
    ) -> Result<WriteReport, TableError> {
        let operation = operation.unwrap_or(self.config.operation);
        let (schema, rows) = batch.into_parts();

        ensure_configured_fields(
            &schema,
            &self.config.record_key_fields,
            &self.config.partition_path_fields,
            self.config.precombine_field.as_deref(),
        )
        .context(SchemaSnafu)?;

        let prepared = self.prepare_rows(&schema, &rows)?;
        let (incoming, batch_duplicates) = dedup_incoming(prepared, self.config.index_scope);
        debug!(
            "write to {}: {} rows, {} after batch dedup",
            self.config.name,
            rows.len(),
            incoming.len()
        );

        if self.config.mode == WriteMode::Overwrite {
            return self
                .overwrite(&schema, &incoming, operation, batch_duplicates)
                .await;
        }
        self.write_with_retries(&schema, &incoming, operation, batch_duplicates)
            .await
    }

    /// Run attempts until one publishes, a non-conflict error occurs, or the
    /// retry budget is spent.
    pub(super) async fn write_with_retries(
        &mut self,
        schema: &LogicalSchema,
        incoming: &[IncomingRow],
        operation: WriteOperation,
        batch_duplicates: u64,
    ) -> Result<WriteReport, TableError> {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_attempt(schema, incoming, operation).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    report.rows_ignored += batch_duplicates;
                    info!(
                        "committed version {} ({operation}) to {}: {} added, {} superseded",
                        report.version, self.config.name, report.files_added, report.files_superseded
                    );
                    return Ok(report);
                }
                Err(AttemptError::Conflict { expected, found }) if attempt < max_attempts => {
                    warn!(
                        "commit conflict on {} (expected {expected}, found {found}); retrying, attempt {attempt} of {max_attempts}",
                        self.config.name
                    );
                }
                Err(AttemptError::Conflict { .. }) => {
                    return WriteConflictSnafu { attempts: attempt }.fail();
                }
                Err(AttemptError::Failed(e)) => return Err(e),
            }
        }
    }

    /// Write Arrow record batches sharing `schema`.
    pub async fn write_record_batches(
        &mut self,
        schema: SchemaRef,
        batches: &[RecordBatch],
        operation: Option<WriteOperation>,
    ) -> Result<WriteReport, TableError> {
        LogicalSchema::from_arrow_schema(&schema)
            .map_err(|source| SchemaError::LogicalSchema { source })
            .context(SchemaSnafu)?;
        let batch = row_batch_from_record_batches(&schema, batches).context(CodecSnafu)?;
        self.write(batch, operation).await
    }

    fn prepare_rows(
        &self,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<Vec<IncomingRow>, TableError> {
        let partitioner = Partitioner::new(
            self.config.partition_path_fields.clone(),
            self.config.hive_style_partitioning,
        );
        let keys = KeyGenerator::new(
            self.config.record_key_fields.clone(),
            self.config.precombine_field.clone(),
        );

        rows.iter()
            .enumerate()
            .map(|(i, raw)| {
                let row = conform_row(schema, i, raw)?;
                Ok(IncomingRow {
                    partition: partitioner.derive(i, &row)?,
                    key: keys.record_key(i, &row)?,
                    precombine: keys.precombine(i, &row)?,
                    row,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()
            .context(SchemaSnafu)
    }

    /// Make the cached index valid for `version` and cover `partitions`.
    async fn ensure_index(
        &mut self,
        version: u64,
        active: &BTreeMap<PartitionPath, Vec<DataFileMeta>>,
        partitions: &BTreeSet<PartitionPath>,
    ) -> Result<(), TableError> {
        let scope = self.config.index_scope;
        let concurrency = self.config.parallelism;
        match &mut self.index_cache {
            Some(index) if index.version() == version && index.scope() == scope => {
                if !index.covers(partitions) {
                    index
                        .load_partitions(&self.files, active, partitions, concurrency)
                        .await
                        .context(DataFileSnafu)?;
                }
            }
            _ => {
                debug!("rebuilding record index of {} at version {version}", self.config.name);
                let index =
                    RecordIndex::build(&self.files, active, scope, version, partitions, concurrency)
                        .await
                        .context(DataFileSnafu)?;
                self.index_cache = Some(index);
            }
        }
        Ok(())
    }

    async fn write_attempt(
        &mut self,
        batch_schema: &LogicalSchema,
        incoming: &[IncomingRow],
        operation: WriteOperation,
    ) -> Result<WriteReport, AttemptError> {
        // 1) Resolve the state this attempt builds on.
        let base_version = self
            .log
            .load_current_version()
            .await
            .context(TransactionLogSnafu)?;
        let state: Option<TableState> = if base_version > 0 {
            Some(
                self.log
                    .rebuild_table_state(Some(base_version))
                    .await
                    .context(TransactionLogSnafu)?,
            )
        } else {
            None
        };

        let mut actions = Vec::new();
        let table_schema = match &state {
            Some(state) => {
                ensure_schema_exact_match(&state.table_meta.schema, batch_schema)
                    .context(SchemaSnafu)?;
                self.config
                    .ensure_matches(&state.table_meta)
                    .context(ConfigSnafu)?;
                state.table_meta.schema.clone()
            }
            None => {
                actions.push(LogAction::UpdateTableMeta(TableMeta::from_config(
                    &self.config,
                    batch_schema.clone(),
                )));
                batch_schema.clone()
            }
        };

        let commit_time = CommitTime::next_after(
            state.as_ref().and_then(|s| s.last_commit_time.as_ref()),
            Utc::now(),
        );
        let active = state
            .as_ref()
            .map(FileGroupManager::resolve_active)
            .unwrap_or_default();

        // 2) Record index, only when keys must be matched against the table.
        let use_index = operation == WriteOperation::Upsert || self.config.insert_drop_duplicates;
        if use_index {
            let affected: BTreeSet<PartitionPath> =
                incoming.iter().map(|r| r.partition.clone()).collect();
            self.ensure_index(base_version, &active, &affected).await?;
        }

        // 3) Route rows to file groups.
        let mut jobs: BTreeMap<(PartitionPath, FileGroupId), GroupJob> = BTreeMap::new();
        let mut fresh: BTreeMap<PartitionPath, Vec<IncomingRow>> = BTreeMap::new();
        let mut dropped_existing = 0;
        {
            let index = self.index_cache.as_ref().filter(|_| use_index);
            for row in incoming {
                match index.and_then(|idx| idx.lookup(&row.partition, &row.key)) {
                    Some(_) if operation == WriteOperation::Insert => dropped_existing += 1,
                    Some(entry) => {
                        let slot = (entry.partition.clone(), entry.file_group_id.clone());
                        jobs.entry(slot)
                            .or_insert_with(|| new_job(&active, &entry.partition, &entry.file_group_id))
                            .updates
                            .push(row.clone());
                    }
                    None => fresh.entry(row.partition.clone()).or_default().push(row.clone()),
                }
            }
        }

        for (partition, rows) in fresh {
            let loads: Vec<(FileGroupId, usize)> = active
                .get(&partition)
                .map(|files| {
                    files
                        .iter()
                        .map(|f| (f.file_group_id.clone(), f.row_count as usize))
                        .collect()
                })
                .unwrap_or_default();
            let plan = pack_new_rows(&loads, rows.len(), self.config.file_max_rows, || {
                FileGroupId::generate(&partition, commit_time.as_str())
            });

            let mut rows = rows.into_iter();
            for (group, take) in plan {
                jobs.entry((partition.clone(), group.clone()))
                    .or_insert_with(|| new_job(&active, &partition, &group))
                    .inserts
                    .extend(rows.by_ref().take(take));
            }
        }

        // 4) Load the current rows of touched groups.
        let concurrency = self.config.parallelism.max(1);
        let files = self.files.clone();
        let read_schema = table_schema.clone();
        let loaded: Vec<(GroupJob, Vec<StoredRow>)> = stream::iter(jobs.into_values())
            .map(|job| {
                let files = files.clone();
                let schema = read_schema.clone();
                async move {
                    let rows = match &job.current {
                        Some(file) => files.read_rows(&schema, file).await?,
                        None => Vec::new(),
                    };
                    Ok::<_, FileGroupError>((job, rows))
                }
            })
            .buffered(concurrency)
            .try_collect()
            .await
            .context(DataFileSnafu)?;

        // 5) Merge and encode on the batch executor.
        let ctx = Arc::new(MergeContext {
            files: self.files.clone(),
            schema: table_schema,
            commit_time: commit_time.clone(),
            precombine_field: self.config.precombine_field.clone(),
        });
        let outcomes: Vec<GroupOutcome> = self
            .executor
            .try_map(loaded, move |(job, rows)| ctx.merge_group(job, rows))
            .await
            .context(ExecutorSnafu)?
            .context(CodecSnafu)?;

        // 6) Persist new files. Any failure aborts before the commit.
        let mut written: Vec<DataFileMeta> = Vec::new();
        for outcome in &outcomes {
            if let Some(file) = &outcome.written {
                if let Err(source) = self.files.persist(file).await {
                    self.files.discard(&written).await;
                    return Err(TableError::DataFile { source }.into());
                }
                written.push(file.meta.clone());
            }
        }

        // 7) Supersede before add, per group in partition order.
        let mut report = WriteReport {
            version: 0,
            commit_time: commit_time.clone(),
            operation,
            partitions: BTreeSet::new(),
            files_added: 0,
            files_superseded: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_ignored: dropped_existing,
            attempts: 0,
        };
        for outcome in &outcomes {
            report.rows_inserted += outcome.inserted;
            report.rows_updated += outcome.updated;
            report.rows_ignored += outcome.ignored;
            let Some(file) = &outcome.written else {
                continue;
            };
            if let Some(old) = &outcome.superseded {
                actions.push(LogAction::SupersedeFile {
                    partition: outcome.partition.clone(),
                    file_group_id: outcome.file_group_id.clone(),
                    file_id: old.file_id.clone(),
                });
                report.files_superseded += 1;
            }
            actions.push(LogAction::AddFile(file.meta.clone()));
            report.files_added += 1;
            report.partitions.insert(outcome.partition.clone());
        }

        #[cfg(test)]
        if let Some(hook) = self.pre_commit_hook.clone() {
            (hook.0)().await;
        }

        // 8) Publish.
        let version = match self
            .log
            .commit_with_expected_version(base_version, commit_time, operation, actions)
            .await
        {
            Ok(v) => v,
            Err(CommitError::Conflict {
                expected, found, ..
            }) => {
                self.files.discard(&written).await;
                return Err(AttemptError::Conflict { expected, found });
            }
            Err(source) => {
                self.files.discard(&written).await;
                return Err(TableError::TransactionLog { source }.into());
            }
        };
        report.version = version;

        // 9) Keep the cached index in step with our own commit.
        if use_index {
            if let Some(index) = self.index_cache.as_mut() {
                for outcome in &outcomes {
                    for key in &outcome.touched_keys {
                        index.upsert(&outcome.partition, key.clone(), outcome.file_group_id.clone());
                    }
                }
                index.advance_to(version);
            }
        }

        Ok(report)
    }

    #[cfg(test)]
    pub(crate) fn set_pre_commit_hook(&mut self, hook: Option<PreCommitHook>) {
        self.pre_commit_hook = hook;
    }
}

fn new_job(
    active: &BTreeMap<PartitionPath, Vec<DataFileMeta>>,
    partition: &PartitionPath,
    file_group_id: &FileGroupId,
) -> GroupJob {
    let current = active
        .get(partition)
        .and_then(|files| files.iter().find(|f| &f.file_group_id == file_group_id))
        .cloned();
    GroupJob {
        partition: partition.clone(),
        file_group_id: file_group_id.clone(),
        current,
        updates: Vec::new(),
        inserts: Vec::new(),
    }
}
