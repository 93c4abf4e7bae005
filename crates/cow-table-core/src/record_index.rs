//! Record index: which file group holds the latest version of a key.
//!
//! The index is never persisted. It is rebuilt from the `_record_key` column
//! of the live data files and cached by the table handle together with the
//! version it reflects and the partitions it covers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::{StreamExt, TryStreamExt, stream};

use crate::config::IndexScope;
use crate::file_groups::{FileGroupError, FileGroupManager};
use crate::keys::RecordKey;
use crate::transaction_log::{DataFileMeta, FileGroupId, PartitionPath};

/// Location of a key's latest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Partition holding the key.
    pub partition: PartitionPath,
    /// File group holding the key.
    pub file_group_id: FileGroupId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Coverage {
    All,
    Partitions(BTreeSet<PartitionPath>),
}

/// In-memory key → file group mapping for one table version.
#[derive(Debug, Clone)]
pub struct RecordIndex {
    scope: IndexScope,
    version: u64,
    coverage: Coverage,
    entries: HashMap<(PartitionPath, RecordKey), IndexEntry>,
}

impl RecordIndex {
    /// Empty index for `version`.
    ///
    /// A global index always covers the whole table; a partition index covers
    /// nothing until partitions are loaded.
    pub fn empty(scope: IndexScope, version: u64) -> Self {
        let coverage = match scope {
            IndexScope::Global => Coverage::All,
            IndexScope::Partition => Coverage::Partitions(BTreeSet::new()),
        };
        Self {
            scope,
            version,
            coverage,
            entries: HashMap::new(),
        }
    }

    /// Build an index over `partitions` (or every partition for a global
    /// index) from the live files in `active`.
    pub async fn build(
        files: &FileGroupManager,
        active: &BTreeMap<PartitionPath, Vec<DataFileMeta>>,
        scope: IndexScope,
        version: u64,
        partitions: &BTreeSet<PartitionPath>,
        concurrency: usize,
    ) -> Result<Self, FileGroupError> {
        let mut index = Self::empty(scope, version);
        let wanted: BTreeSet<PartitionPath> = match scope {
            IndexScope::Global => active.keys().cloned().collect(),
            IndexScope::Partition => partitions.clone(),
        };
        index.load_partitions(files, active, &wanted, concurrency).await?;
        Ok(index)
    }

    /// Load key entries for `partitions` not yet covered.
    pub async fn load_partitions(
        &mut self,
        files: &FileGroupManager,
        active: &BTreeMap<PartitionPath, Vec<DataFileMeta>>,
        partitions: &BTreeSet<PartitionPath>,
        concurrency: usize,
    ) -> Result<(), FileGroupError> {
        let todo: Vec<&DataFileMeta> = partitions
            .iter()
            .filter(|p| match &self.coverage {
                Coverage::All => true,
                Coverage::Partitions(covered) => !covered.contains(*p),
            })
            .filter_map(|p| active.get(p))
            .flatten()
            .collect();

        let loaded: Vec<(DataFileMeta, Vec<RecordKey>)> = stream::iter(todo)
            .map(|file| async move {
                let keys = files.read_keys(file).await?;
                Ok::<_, FileGroupError>((file.clone(), keys))
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        for (file, keys) in loaded {
            for key in keys {
                self.upsert(&file.partition, key, file.file_group_id.clone());
            }
        }

        if let Coverage::Partitions(covered) = &mut self.coverage {
            covered.extend(partitions.iter().cloned());
        }
        Ok(())
    }

    fn slot(&self, partition: &PartitionPath, key: RecordKey) -> (PartitionPath, RecordKey) {
        match self.scope {
            IndexScope::Partition => (partition.clone(), key),
            IndexScope::Global => (PartitionPath::unpartitioned(), key),
        }
    }

    /// Where the latest version of `key` lives.
    ///
    /// For a global index `partition` is ignored.
    pub fn lookup(&self, partition: &PartitionPath, key: &RecordKey) -> Option<&IndexEntry> {
        self.entries.get(&self.slot(partition, key.clone()))
    }

    /// Record that `key` now lives in `file_group_id` of `partition`.
    pub fn upsert(&mut self, partition: &PartitionPath, key: RecordKey, file_group_id: FileGroupId) {
        let slot = self.slot(partition, key);
        self.entries.insert(
            slot,
            IndexEntry {
                partition: partition.clone(),
                file_group_id,
            },
        );
    }

    /// Table version the index reflects.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Move the index to a newer version after its own commit was applied.
    pub fn advance_to(&mut self, version: u64) {
        self.version = version;
    }

    /// Key scope.
    pub fn scope(&self) -> IndexScope {
        self.scope
    }

    /// Whether every partition in `partitions` is loaded.
    pub fn covers(&self, partitions: &BTreeSet<PartitionPath>) -> bool {
        match &self.coverage {
            Coverage::All => true,
            Coverage::Partitions(covered) => partitions.is_subset(covered),
        }
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
