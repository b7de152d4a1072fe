//! Bounded worker pool a codec fans per-frame work out onto.

use std::sync::Arc;

use anyhow::Context;

/// Handle to a bounded rayon pool.
///
/// Work submitted through [`install`](Runner::install) blocks the caller
/// until it completes, so from the session's point of view decoding stays
/// synchronous.
#[derive(Clone)]
pub struct Runner {
    pool: Arc<rayon::ThreadPool>,
}

impl Runner {
    /// Build a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> anyhow::Result<Self> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("jxl-worker-{i}"))
            .build()
            .with_context(|| format!("Failed to create a {num_threads}-thread worker pool"))?;

        log::debug!("Created worker pool with {} threads", num_threads);
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Worker count used when none is configured.
    pub fn default_num_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool, so nested rayon work stays on its workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}
