//! Worker pool for blocking log reads.
//!
//! A fixed set of OS threads executes blocking closures in FIFO order so the
//! async scheduler never stalls on file I/O. Jobs carry no logic of their
//! own beyond the closure they were given; results travel back over a
//! oneshot channel.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error};

use casprobe_core::{Error, Result};

/// Default bound on queued jobs
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Pool metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs waiting in the queue.
    pub queue_depth: usize,
    /// Jobs currently running on a worker.
    pub active_jobs: usize,
    /// Jobs finished since the pool was created, panicked ones included.
    pub jobs_completed: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Job = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_jobs: AtomicUsize,
    max_queue_depth: usize,
    jobs_completed: AtomicU64,
}

/// Fixed-size pool of reader threads.
///
/// Workers are named `casprobe-log-0`, `casprobe-log-1`, etc. Dropping the
/// pool shuts it down; queued jobs still run before the workers exit.
pub struct ReadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl ReadPool {
    /// Start `num_threads` workers (at least one) sharing a queue of at most
    /// `max_queue_depth` pending jobs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a worker thread cannot be spawned.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            max_queue_depth,
            jobs_completed: AtomicU64::new(0),
        });

        let pool = ReadPool {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner = Arc::clone(&pool.inner);
            // On failure the pool drops here and joins the workers already started
            let handle = std::thread::Builder::new()
                .name(format!("casprobe-log-{}", i))
                .spawn(move || worker_loop(&inner))?;
            pool.workers.lock().push(handle);
        }
        debug!(target: "casprobe::logwatch", threads = num_threads, "read pool started");
        Ok(pool)
    }

    /// Queue a blocking closure.
    ///
    /// # Errors
    ///
    /// Fails if the queue is at capacity or the pool has been shut down.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "log read pool is shut down",
            )));
        }
        if self.inner.queue_depth.load(Ordering::Acquire) >= self.inner.max_queue_depth {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "log read pool queue is full",
            )));
        }

        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::new(work));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Run `f` on a worker and await its result.
    ///
    /// Dropping the returned future does not interrupt `f`; the worker
    /// finishes it and discards the result, releasing whatever `f` owns.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            let _ = tx.send(f());
        })?;
        rx.await.map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "log read job panicked before producing a result",
            ))
        })
    }

    /// Signal workers to exit and join them.
    ///
    /// Workers finish the remaining queue first. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Taking the queue lock orders this notify after any worker's
        // shutdown check, so no worker misses the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let current = std::thread::current().id();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_jobs: self.inner.active_jobs.load(Ordering::Relaxed),
            jobs_completed: self.inner.jobs_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for ReadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Keeps `active_jobs` and `jobs_completed` right even if a job panics.
struct ActiveJobGuard<'a> {
    inner: &'a PoolInner,
}

impl<'a> Drop for ActiveJobGuard<'a> {
    fn drop(&mut self) {
        self.inner.active_jobs.fetch_sub(1, Ordering::Release);
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_jobs.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                target: "casprobe::logwatch",
                "log read job panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    fn wait_idle(pool: &ReadPool, completed: u64) {
        for _ in 0..500 {
            if pool.stats().jobs_completed >= completed {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("pool did not finish {} jobs", completed);
    }

    #[test]
    fn test_submit_runs_jobs() {
        let pool = ReadPool::new(2, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        wait_idle(&pool, 10);
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        pool.shutdown();
    }

    #[test]
    fn test_fifo_order() {
        let pool = ReadPool::new(1, 64).unwrap();

        // Block the single worker so the rest queue up
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            pool.submit(move || o.lock().push(i)).unwrap();
        }

        barrier.wait();
        wait_idle(&pool, 6);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_bound() {
        let pool = ReadPool::new(1, 2).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        // Let the worker take the blocking job off the queue
        std::thread::sleep(Duration::from_millis(50));

        pool.submit(|| {}).unwrap();
        pool.submit(|| {}).unwrap();
        assert!(pool.submit(|| {}).is_err());

        barrier.wait();
        pool.shutdown();
        assert_eq!(pool.stats().jobs_completed, 3);
    }

    #[test]
    fn test_shutdown_rejects_and_is_idempotent() {
        let pool = ReadPool::new(2, 64).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let pool = ReadPool::new(1, 64).unwrap();
        pool.submit(|| panic!("intentional test panic")).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        wait_idle(&pool, 2);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(pool.stats().active_jobs, 0);
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = ReadPool::new(0, 8).unwrap();
        assert_eq!(pool.stats().worker_count, 1);
    }

    #[tokio::test]
    async fn test_run_returns_result() {
        let pool = ReadPool::new(2, 64).unwrap();
        let name = pool
            .run(|| std::thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert!(name.unwrap().starts_with("casprobe-log-"));
    }

    #[tokio::test]
    async fn test_run_surfaces_panic() {
        let pool = ReadPool::new(1, 64).unwrap();
        let result: Result<()> = pool.run(|| panic!("intentional test panic")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_dropped_run_still_completes_job() {
        let pool = ReadPool::new(1, 64).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        let fut = pool.run(move || {
            std::thread::sleep(Duration::from_millis(20));
            d.store(true, Ordering::Release);
        });
        // Poll until the job is queued, then drop the future
        let _ = tokio::time::timeout(Duration::from_millis(1), fut).await;
        wait_idle(&pool, 1);
        assert!(done.load(Ordering::Acquire));
    }
}
