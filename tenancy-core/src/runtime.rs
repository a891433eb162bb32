//! Tokio runtime construction.
//!
//! Multi-threaded work-stealing scheduler with named workers and a small
//! blocking pool. Hook work is CPU-bound JSON rewriting on small documents,
//! so nothing here needs the blocking pool beyond DNS resolution.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::{Builder, Runtime};
use tracing::info;

/// Thread ID counter for naming workers
static WORKER_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Configuration for the proxy runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: number of CPU cores)
    pub worker_threads: usize,
    /// Maximum blocking threads (default: 4)
    pub max_blocking_threads: usize,
    /// Thread stack size in bytes (default: 2MB)
    pub thread_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus(),
            max_blocking_threads: 4,
            thread_stack_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Returns the number of available CPU cores.
#[inline]
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Build the Tokio runtime.
///
/// ```
/// use tenancy_core::runtime::{build_runtime, RuntimeConfig};
///
/// let rt = build_runtime(RuntimeConfig { worker_threads: 1, ..Default::default() }).unwrap();
/// assert_eq!(rt.block_on(async { 2 + 2 }), 4);
/// ```
pub fn build_runtime(config: RuntimeConfig) -> std::io::Result<Runtime> {
    info!(
        worker_threads = config.worker_threads,
        blocking_threads = config.max_blocking_threads,
        "Building Tokio runtime"
    );

    Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .max_blocking_threads(config.max_blocking_threads.max(1))
        .thread_stack_size(config.thread_stack_size)
        .thread_name_fn(|| {
            let id = WORKER_COUNTER.fetch_add(1, Ordering::SeqCst);
            format!("tenancy-worker-{id}")
        })
        .enable_all()
        .build()
}
