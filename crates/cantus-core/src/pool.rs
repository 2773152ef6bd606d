//! Worker threads for level-parallel execution.

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::GraphError;

/// A fixed set of worker threads, or none when running single-threaded.
pub struct WorkerPool {
    threads: usize,
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    /// Builds a pool for `threads` workers. One thread builds no pool.
    pub fn new(threads: usize) -> Result<Self, GraphError> {
        Ok(Self {
            threads,
            pool: Self::build(threads)?,
        })
    }

    fn build(threads: usize) -> Result<Option<ThreadPool>, GraphError> {
        match threads {
            0 => Err(GraphError::InvalidThreadCount),
            1 => Ok(None),
            n => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("cantus-worker-{i}"))
                    .build()?;
                Ok(Some(pool))
            }
        }
    }

    /// Configured thread count.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Rebuilds the pool if the count changed.
    pub fn set_threads(&mut self, threads: usize) -> Result<(), GraphError> {
        if threads == self.threads {
            return Ok(());
        }
        self.pool = Self::build(threads)?;
        self.threads = threads;
        tracing::info!(threads, "worker pool resized");
        Ok(())
    }

    /// Runs `f` on every item and returns once all have finished.
    ///
    /// Return is the barrier: no item of a later call starts before every
    /// item of this call completes.
    pub fn run_level<T: Sync>(&self, items: &[T], f: impl Fn(&T) + Sync) {
        match &self.pool {
            Some(pool) if items.len() > 1 => {
                let f = &f;
                pool.scope(|s| {
                    for item in items {
                        s.spawn(move |_| f(item));
                    }
                });
            }
            _ => items.iter().for_each(f),
        }
    }
}
