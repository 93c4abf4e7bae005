//! Batch executor for CPU-bound write work.
//!
//! Merging file groups and encoding data files are independent jobs. They run
//! on a dedicated rayon pool sized from `write.parallelism` so the async
//! runtime threads only wait on a channel and never do the encoding work.

use std::sync::Arc;

use rayon::prelude::*;
use snafu::prelude::*;
use tokio::sync::oneshot;

/// Errors from the batch executor itself (not from the jobs it runs).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExecutorError {
    /// The thread pool could not be created.
    #[snafu(display("failed to build rayon thread pool: {source}"))]
    PoolBuild {
        /// Underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// A job panicked or the pool shut down before reporting a result.
    #[snafu(display("batch executor dropped a job before it completed"))]
    JobLost,
}

/// Runs independent jobs in parallel and returns all results or the first
/// error.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    pool: Arc<rayon::ThreadPool>,
    threads: usize,
}

impl BatchExecutor {
    /// Executor with `threads` worker threads (at least one).
    pub fn new(threads: usize) -> Result<Self, ExecutorError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cow-table-exec-{i}"))
            .build()
            .context(PoolBuildSnafu)?;
        Ok(Self {
            pool: Arc::new(pool),
            threads,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Apply `f` to every item in parallel, preserving input order.
    ///
    /// The outer result reports executor failures; the inner result is the
    /// first job error, if any.
    pub async fn try_map<T, R, E, F>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Result<Result<Vec<R>, E>, ExecutorError>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Ok(Ok(Vec::new()));
        }

        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let result: Result<Vec<R>, E> = items.into_par_iter().map(f).collect();
            // The receiver is gone only if the caller stopped waiting.
            let _ = tx.send(result);
        });

        rx.await.ok().context(JobLostSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_map_preserves_order() -> Result<(), Box<dyn std::error::Error>> {
        let exec = BatchExecutor::new(3)?;
        let out: Result<Vec<u64>, String> = exec
            .try_map((0..100u64).collect(), |x| Ok(x * 2))
            .await?;
        assert_eq!(out?, (0..100u64).map(|x| x * 2).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn try_map_reports_job_errors() -> Result<(), Box<dyn std::error::Error>> {
        let exec = BatchExecutor::new(2)?;
        let out = exec
            .try_map(vec![1, 2, 3], |x| if x == 2 { Err("boom") } else { Ok(x) })
            .await?;
        assert_eq!(out, Err("boom"));
        assert_eq!(exec.threads(), 2);
        Ok(())
    }
}
