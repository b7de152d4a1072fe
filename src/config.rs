//! Handler configuration.

use crate::codec::Runner;

/// Settings applied when a handler creates its decode session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Worker pool size; `None` uses [`Runner::default_num_worker_threads`].
    pub worker_threads: Option<usize>,
    /// Apply the stream's orientation metadata while decoding.
    pub adjust_orientation: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            adjust_orientation: true,
        }
    }
}

impl HandlerConfig {
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_adjust_orientation(mut self, adjust: bool) -> Self {
        self.adjust_orientation = adjust;
        self
    }

    /// The worker count the session's pool is built with.
    pub fn num_worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(Runner::default_num_worker_threads)
            .max(1)
    }
}
