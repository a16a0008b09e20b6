// src/engine/pool.rs
//
// Shared thread pool for batch processing.
//
// One pool serves every batch call; it is created lazily on first use and
// sized from std::thread::available_parallelism(), which respects cgroup/CPU
// quota. Changes to the environment after initialization have no effect.

use rayon::ThreadPool;
use std::sync::OnceLock;

/// Minimum number of rayon threads to ensure at least some parallelism
const MIN_RAYON_THREADS: usize = 1;

static BATCH_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// Number of worker threads the batch pool is built with.
pub fn batch_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_RAYON_THREADS)
        .max(MIN_RAYON_THREADS)
}

/// The shared batch pool, or `None` if the OS refused to spawn its threads.
/// Callers fall back to rayon's global pool in that case.
pub fn get_pool() -> Option<&'static ThreadPool> {
    BATCH_THREAD_POOL
        .get_or_init(|| {
            let num_threads = batch_thread_count();
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|idx| format!("pixelgate-batch-{idx}"))
                .build()
                .map_err(|e| {
                    tracing::warn!(
                        target: "pixelgate::pool",
                        error = %e,
                        num_threads,
                        "failed to build batch pool; using rayon global pool"
                    );
                })
                .ok()
        })
        .as_ref()
}

/// Run `f` inside the batch pool.
pub fn install<R: Send>(f: impl FnOnce() -> R + Send) -> R {
    match get_pool() {
        Some(pool) => pool.install(f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_shared() {
        let a = get_pool().map(|p| p as *const ThreadPool);
        let b = get_pool().map(|p| p as *const ThreadPool);
        assert_eq!(a, b);
    }

    #[test]
    fn install_runs_closure() {
        assert_eq!(install(|| 21 * 2), 42);
        assert!(batch_thread_count() >= 1);
    }
}
