//! Overwrite mode for `TableHandle`.
//!
//! The replacement table is written in full under `_cow_staging/<token>/`
//! with its own log starting at version 1. Nothing under the live root is
//! touched until that write has committed. The swap then moves the staged
//! data files to their final paths, parks the live `_cow_log/` and renames
//! the staged log into its place. A failed step undoes the earlier ones.
//!
//! Old data files, the parked log and the staging directory are removed
//! after the swap, best effort. Dropping the future between the renames can
//! leave the live log parked under `_cow_staging/`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    config::{WriteMode, WriteOperation},
    storage::{self, TableLocation, layout},
    table::{
        TableHandle, WriteReport,
        error::{StorageSnafu, TableError, TransactionLogSnafu, WriteConflictSnafu},
        write::IncomingRow,
    },
    transaction_log::{LogAction, LogicalSchema, TransactionLogStore},
};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

fn staging_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos}-{}-{seq}", std::process::id())
}

impl TableHandle {
    pub(super) async fn overwrite(
        &mut self,
        schema: &LogicalSchema,
        incoming: &[IncomingRow],
        operation: WriteOperation,
        batch_duplicates: u64,
    ) -> Result<WriteReport, TableError> {
        let token = staging_token();
        let staging_rel = layout::staging_rel_dir(&token);
        let parked_rel = layout::parked_log_rel_dir(&token);
        let base_version = self.current_version().await?;
        info!(
            "overwrite of {} from version {base_version}, staged at {}",
            self.config.name,
            staging_rel.display()
        );

        let mut staged = self.staging_handle(&staging_rel);
        let report = match staged
            .write_with_retries(schema, incoming, operation, batch_duplicates)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                self.remove_dir_best_effort(&staging_rel).await;
                return Err(e);
            }
        };

        let old_files = match self
            .swap_in(&staged, &staging_rel, &parked_rel, base_version, report.attempts)
            .await
        {
            Ok(old_files) => old_files,
            Err(e) => {
                self.remove_dir_best_effort(&staging_rel).await;
                return Err(e);
            }
        };
        self.index_cache = None;

        for rel in &old_files {
            if let Err(e) = storage::remove_file(&self.config.location, rel).await {
                warn!("failed to remove replaced data file {}: {e}", rel.display());
            }
        }
        self.remove_dir_best_effort(&parked_rel).await;
        self.remove_dir_best_effort(&staging_rel).await;

        info!(
            "overwrote {}: {} files replaced by {}",
            self.config.name,
            old_files.len(),
            report.files_added
        );
        Ok(report)
    }

    /// A handle writing a fresh table under `staging_rel`.
    fn staging_handle(&self, staging_rel: &Path) -> TableHandle {
        let location = TableLocation::local(self.config.location.root().join(staging_rel));
        let mut config = self.config.clone();
        config.location = location.clone();
        config.mode = WriteMode::Append;

        TableHandle {
            files: self.files.relocated(location.clone()),
            log: TransactionLogStore::new(location),
            executor: self.executor.clone(),
            index_cache: None,
            config,
            #[cfg(test)]
            pre_commit_hook: self.pre_commit_hook.clone(),
        }
    }

    /// Move the staged table into the live root. Returns the data files the
    /// old log referenced.
    async fn swap_in(
        &self,
        staged: &TableHandle,
        staging_rel: &Path,
        parked_rel: &Path,
        base_version: u64,
        attempts: u32,
    ) -> Result<Vec<PathBuf>, TableError> {
        let root = &self.config.location;
        let live_log = layout::log_rel_dir();

        let old_files = self.referenced_files(base_version).await?;
        let found = self.current_version().await?;
        if found != base_version {
            warn!(
                "overwrite of {} lost to a concurrent commit (expected {base_version}, found {found})",
                self.config.name
            );
            return WriteConflictSnafu { attempts }.fail();
        }
        let had_log = storage::exists(root, &live_log)
            .await
            .context(StorageSnafu)?;
        let staged_state = staged.state(None).await?;

        let mut moved: Vec<PathBuf> = Vec::with_capacity(staged_state.files.len());
        for file in staged_state.files.values() {
            let rel = PathBuf::from(&file.path);
            if let Err(e) = storage::rename(root, &staging_rel.join(&rel), &rel).await {
                self.remove_files_best_effort(&moved).await;
                return Err(e).context(StorageSnafu);
            }
            moved.push(rel);
        }
        debug!("moved {} staged data files into {root}", moved.len());

        if had_log {
            if let Err(e) = storage::rename(root, &live_log, parked_rel).await {
                self.remove_files_best_effort(&moved).await;
                return Err(e).context(StorageSnafu);
            }
        }

        if let Err(e) = storage::rename(root, &staging_rel.join(&live_log), &live_log).await {
            if had_log {
                if let Err(restore) = storage::rename(root, parked_rel, &live_log).await {
                    warn!(
                        "failed to restore the log of {} from {}: {restore}",
                        self.config.name,
                        parked_rel.display()
                    );
                }
            }
            self.remove_files_best_effort(&moved).await;
            return Err(e).context(StorageSnafu);
        }

        Ok(old_files)
    }

    /// Every data file added by commits up to `version`.
    async fn referenced_files(&self, version: u64) -> Result<Vec<PathBuf>, TableError> {
        if version == 0 {
            return Ok(Vec::new());
        }
        let commits = self
            .log
            .commits(Some(version))
            .await
            .context(TransactionLogSnafu)?;
        Ok(commits
            .iter()
            .flat_map(|c| c.actions.iter())
            .filter_map(|action| match action {
                LogAction::AddFile(meta) => Some(PathBuf::from(&meta.path)),
                _ => None,
            })
            .collect())
    }

    async fn remove_files_best_effort(&self, files: &[PathBuf]) {
        for rel in files {
            if let Err(e) = storage::remove_file(&self.config.location, rel).await {
                warn!("failed to remove staged data file {}: {e}", rel.display());
            }
        }
    }

    async fn remove_dir_best_effort(&self, rel: &Path) {
        if let Err(e) = storage::remove_dir_all(&self.config.location, rel).await {
            warn!("failed to remove {}: {e}", rel.display());
        }
    }
}
