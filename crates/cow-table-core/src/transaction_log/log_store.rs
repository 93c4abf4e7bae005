//! Async helpers for persisting and reading the commit log.
//!
//! This module owns all on-disk interactions with `_cow_log/`:
//! - Resolving the latest version from the `CURRENT` hint, rolling forward
//!   over commit files published after the hint was last written.
//! - Publishing zero-padded commit files with create-if-absent semantics so
//!   each version is created exactly once.
//! - Streaming commits in version order for state replay and history views.
//! - Mapping storage-layer failures into [`CommitError`] variants so callers
//!   can differentiate between conflicts, storage errors and corrupt state.
use crate::config::WriteOperation;
use crate::storage::{self, StorageError, TableLocation, layout};
use crate::transaction_log::*;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::{debug, warn};
use snafu::{Backtrace, prelude::*};

/// Helper for reading and writing the commit log under a table root.
///
/// Layout:
///   <root>/_cow_log/0000000001.json
///   <root>/_cow_log/0000000002.json
///   <root>/_cow_log/CURRENT
#[derive(Debug, Clone)]
pub struct TransactionLogStore {
    location: TableLocation,
}

impl TransactionLogStore {
    /// Create a new TransactionLogStore rooted at a table directory.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    /// Get the TableLocation of the LogStore.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Load a single commit by version, without validating its payload.
    ///
    /// - On storage-layer failures, returns `CommitError::Storage`.
    /// - On JSON parse failures, returns `CommitError::CorruptState`.
    pub async fn load_commit(&self, version: u64) -> Result<Commit, CommitError> {
        let rel = layout::commit_rel_path(version);
        let json = storage::read_to_string(&self.location, &rel)
            .await
            .context(StorageSnafu)?;

        serde_json::from_str(&json).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to parse commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })
    }

    /// Load a commit that must exist as part of the committed range.
    ///
    /// A missing file or a payload whose version differs from its file name
    /// is reported as `CorruptState`.
    async fn load_commit_checked(&self, version: u64) -> Result<Commit, CommitError> {
        let commit = match self.load_commit(version).await {
            Ok(c) => c,
            Err(CommitError::Storage {
                source: StorageError::NotFound { path, .. },
            }) => {
                return CorruptStateSnafu {
                    msg: format!("commit file for version {version} is missing ({path})"),
                }
                .fail();
            }
            Err(e) => return Err(e),
        };

        ensure!(
            commit.version == version,
            CorruptStateSnafu {
                msg: format!(
                    "Commit version mismatch: expected {version}, found {} in payload",
                    commit.version
                ),
            }
        );
        Ok(commit)
    }

    async fn load_current_hint(&self) -> Result<u64, CommitError> {
        let rel = layout::current_rel_path();

        let contents = match storage::read_to_string(&self.location, &rel).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => return Ok(0),
            Err(source) => return Err(CommitError::Storage { source }),
        };

        let trimmed = contents.trim();
        ensure!(
            !trimmed.is_empty(),
            CorruptStateSnafu {
                msg: format!("CURRENT has empty content at {rel:?}"),
            }
        );

        trimmed
            .parse::<u64>()
            .map_err(|e| CommitError::CorruptState {
                msg: format!("CURRENT has invalid content {trimmed:?}: {e}"),
                backtrace: Backtrace::capture(),
            })
    }

    /// Resolve the latest published version.
    ///
    /// - If CURRENT does not exist, start from 0 (fresh table).
    /// - If CURRENT contains invalid or empty content, return `CorruptState`.
    /// - Commit files published beyond CURRENT (a writer crashed or lost the
    ///   race between publishing and updating the hint) are included.
    pub async fn load_current_version(&self) -> Result<u64, CommitError> {
        let mut version = self.load_current_hint().await?;
        loop {
            let next = version.checked_add(1).context(CorruptStateSnafu {
                msg: "version counter overflow".to_string(),
            })?;
            let exists = storage::exists(&self.location, &layout::commit_rel_path(next))
                .await
                .context(StorageSnafu)?;
            if !exists {
                return Ok(version);
            }
            debug!("rolling forward past CURRENT to version {next}");
            version = next;
        }
    }

    /// Publish a new commit with an optimistic concurrency guard.
    ///
    /// ## Concurrency semantics
    ///
    /// The version check against the latest published version is advisory.
    /// The actual guard is the create-if-absent publish of the commit file:
    /// when two writers race for the same version exactly one publish
    /// succeeds and the other observes [`CommitError::Conflict`].
    ///
    /// ## Steps
    ///
    /// 1. Resolve the latest version; if it differs from `expected`, return
    ///    `Conflict`.
    /// 2. Build the [`Commit`] for `expected + 1` and serialize it.
    /// 3. Publish `_cow_log/<zero-padded>.json` (temp file, fsync, link).
    /// 4. Update `_cow_log/CURRENT`. This is a hint only: failures are logged
    ///    and readers roll forward regardless.
    pub async fn commit_with_expected_version(
        &self,
        expected: u64,
        commit_time: CommitTime,
        operation: WriteOperation,
        actions: Vec<LogAction>,
    ) -> Result<u64, CommitError> {
        // 1) Guard on the latest version
        let current = self.load_current_version().await?;
        if current != expected {
            return ConflictSnafu {
                expected,
                found: current,
            }
            .fail();
        }

        let version = expected.checked_add(1).context(CorruptStateSnafu {
            msg: "version counter overflow".to_string(),
        })?;

        // 2) Build commit payload
        let commit = Commit {
            version,
            base_version: expected,
            timestamp: Utc::now(),
            commit_time,
            operation,
            actions,
        };

        let json = serde_json::to_vec_pretty(&commit).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to serialize commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        // 3) Publish; losing the race is a conflict, not a storage failure.
        let commit_rel = layout::commit_rel_path(version);
        match storage::write_new(&self.location, &commit_rel, &json).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                return ConflictSnafu {
                    expected,
                    found: version,
                }
                .fail();
            }
            Err(source) => return Err(CommitError::Storage { source }),
        }

        // 4) Advance the hint.
        let current_rel = layout::current_rel_path();
        let current_contents = format!("{version}\n");
        if let Err(e) =
            storage::write_atomic(&self.location, &current_rel, current_contents.as_bytes()).await
        {
            warn!("commit {version} published but CURRENT was not updated: {e}");
        }

        Ok(version)
    }

    /// Resolve `as_of` (or the latest version when `None`) to a concrete
    /// version, rejecting versions that have not been committed.
    pub async fn resolve_version(&self, as_of: Option<u64>) -> Result<u64, CommitError> {
        let latest = self.load_current_version().await?;
        match as_of {
            Some(requested) if requested > latest => UnknownVersionSnafu { requested, latest }.fail(),
            Some(requested) => Ok(requested),
            None => Ok(latest),
        }
    }

    /// Lazily stream commits `1..=as_of` (or up to the latest version).
    ///
    /// The target version is fixed when this method returns, so the stream is
    /// finite even while other writers keep committing. Each call produces an
    /// independent stream.
    pub async fn read_up_to(
        &self,
        as_of: Option<u64>,
    ) -> Result<BoxStream<'static, Result<Commit, CommitError>>, CommitError> {
        let target = self.resolve_version(as_of).await?;
        Ok(self.stream_commits(target))
    }

    pub(crate) fn stream_commits(
        &self,
        target: u64,
    ) -> BoxStream<'static, Result<Commit, CommitError>> {
        let store = self.clone();
        stream::iter(1..=target)
            .then(move |v| {
                let store = store.clone();
                async move { store.load_commit_checked(v).await }
            })
            .boxed()
    }

    /// Collect the commit history up to `as_of` (or latest).
    pub async fn commits(&self, as_of: Option<u64>) -> Result<Vec<Commit>, CommitError> {
        self.read_up_to(as_of).await?.try_collect().await
    }
}
