use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use cow_table_core::{Snapshot, TableError, TableHandle, table::SnapshotScan};
use datafusion::catalog::{Session, TableProvider};
use datafusion::datasource::{MemTable, TableType};
use datafusion::error::{DataFusionError, Result as DFResult};
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::Expr;
use datafusion::physical_plan::ExecutionPlan;
use futures::TryStreamExt;
use log::debug;

/// DataFusion table provider over one snapshot of a copy-on-write table.
///
/// The snapshot is pinned when the provider is built, so every query through
/// the provider sees the same version regardless of later commits.
#[derive(Debug, Clone)]
pub struct CowTableProvider {
    snapshot: Snapshot,
}

fn external(e: TableError) -> DataFusionError {
    DataFusionError::External(Box::new(e))
}

impl CowTableProvider {
    /// Resolve a snapshot of `handle` at `as_of` (or the latest version).
    pub async fn try_new(handle: &TableHandle, as_of: Option<u64>) -> Result<Self, TableError> {
        let snapshot = handle.snapshot(as_of).await?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Wrap an already resolved snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    /// The pinned snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

#[async_trait]
impl TableProvider for CowTableProvider {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.snapshot.schema()
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    async fn scan(
        &self,
        state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        limit: Option<usize>,
    ) -> DFResult<Arc<dyn ExecutionPlan>> {
        let scan: SnapshotScan = self.snapshot.scan();
        let batches = scan.try_collect::<Vec<_>>().await.map_err(external)?;
        debug!(
            "scanning snapshot version {}: {} batches",
            self.snapshot.version(),
            batches.len()
        );

        // Predicates and projection are evaluated by DataFusion over the
        // materialised snapshot.
        let mem = MemTable::try_new(self.schema(), vec![batches])?;
        mem.scan(state, projection, filters, limit).await
    }
}

/// Register a snapshot of `handle` under `name` in `ctx`.
pub async fn register_snapshot(
    ctx: &SessionContext,
    name: &str,
    handle: &TableHandle,
    as_of: Option<u64>,
) -> DFResult<()> {
    let provider = CowTableProvider::try_new(handle, as_of)
        .await
        .map_err(external)?;
    ctx.register_table(name, Arc::new(provider))?;
    Ok(())
}
