//! Fixed-size pool of worker threads with one FIFO queue per worker.
//!
//! Unlike a work-stealing pool, callers pick the worker for every job. The
//! frame recorder relies on this: a drawable's command buffer comes from a
//! command pool owned by one worker, so that drawable must always be recorded
//! on that worker.
//!
//! # Guarantees
//!
//! - Jobs submitted to the same worker run in submission order.
//! - [`WorkerPool::barrier`] returns only once every queue is empty and no job
//!   is running, so all effects of previously submitted jobs are visible.
//! - Dropping the pool drains every queue before the threads are joined.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tessera_core::WorkerPool;
//!
//! let pool = WorkerPool::new(2).unwrap();
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for i in 0..8 {
//!     let counter = counter.clone();
//!     pool.submit(i % pool.worker_count(), move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! pool.barrier().unwrap();
//! assert_eq!(counter.load(Ordering::SeqCst), 8);
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::config::RendererConfig;
use crate::error::{Error, Result};

/// A unit of work executed on a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Number of workers used when none is configured: the available hardware
/// parallelism, or 1 if it cannot be determined.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    /// A job has been taken off the queue and is still running.
    busy: bool,
    shutdown: bool,
    /// Panicked jobs since the last barrier.
    panicked: usize,
}

impl QueueState {
    #[inline]
    fn is_idle(&self) -> bool {
        self.jobs.is_empty() && !self.busy
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    /// Signals both "job available" and "queue drained".
    signal: Condvar,
}

struct Worker {
    index: usize,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(index: usize) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let thread_shared = shared.clone();

        let handle = thread::Builder::new()
            .name(format!("tessera-worker-{index}"))
            .spawn(move || run(index, &thread_shared))?;

        Ok(Self {
            index,
            shared,
            handle: Some(handle),
        })
    }

    fn push(&self, job: Job) {
        let mut state = self.shared.state.lock();
        state.jobs.push_back(job);
        drop(state);
        self.shared.signal.notify_all();
    }

    /// Blocks until the queue is drained; returns and clears the panic count.
    fn wait_idle(&self) -> usize {
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            self.shared.signal.wait(&mut state);
        }
        std::mem::take(&mut state.panicked)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let panicked = self.wait_idle();
        if panicked > 0 {
            error!(
                "Worker {} shut down with {} unreported panicked job(s)",
                self.index, panicked
            );
        }

        self.shared.state.lock().shutdown = true;
        self.shared.signal.notify_all();

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Worker {} thread terminated abnormally", self.index);
        }
        debug!("Worker {} joined", self.index);
    }
}

fn run(index: usize, shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            while state.jobs.is_empty() && !state.shutdown {
                shared.signal.wait(&mut state);
            }
            if state.shutdown {
                return;
            }
            let Some(job) = state.jobs.pop_front() else {
                continue;
            };
            state.busy = true;
            job
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(job));

        let mut state = shared.state.lock();
        if let Err(payload) = outcome {
            error!("Job on worker {} panicked: {}", index, panic_message(&*payload));
            state.panicked += 1;
        }
        state.busy = false;
        drop(state);
        shared.signal.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Fixed set of worker threads, each with a private FIFO job queue.
///
/// # Thread Safety
///
/// `submit` and `barrier` take `&self` and may be called from any thread, but
/// the frame recorder only drives the pool from the main thread.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Creates a pool with `count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `count` is zero, or [`Error::Io`] if a
    /// thread cannot be spawned.
    pub fn new(count: usize) -> Result<Self> {
        let mut pool = Self {
            workers: Vec::new(),
        };
        pool.configure(count)?;
        Ok(pool)
    }

    /// Creates a pool with [`RendererConfig::worker_count`] workers.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(config: &RendererConfig) -> Result<Self> {
        Self::new(config.worker_count)
    }

    /// Replaces the current workers with `count` fresh ones.
    ///
    /// Existing workers finish their queued jobs and are joined before the new
    /// threads start. Callers must not submit concurrently with this call.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new). On error the pool is left empty.
    pub fn configure(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::Config(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        if !self.workers.is_empty() {
            debug!("Reconfiguring worker pool: {} -> {}", self.workers.len(), count);
            self.workers.clear();
        }

        let workers = (0..count)
            .map(Worker::spawn)
            .collect::<Result<Vec<_>>>()?;
        self.workers = workers;

        info!("Worker pool configured with {} thread(s)", count);
        Ok(())
    }

    /// Returns the number of workers.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Appends `job` to worker `index`'s queue and wakes that worker.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.worker_count()`. Choosing a valid worker is the
    /// caller's responsibility.
    pub fn submit<F>(&self, index: usize, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = self.workers.get(index).unwrap_or_else(|| {
            panic!(
                "worker index {index} out of range (pool has {} workers)",
                self.workers.len()
            )
        });
        worker.push(Box::new(job));
    }

    /// Blocks until every worker's queue is empty and no job is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] naming the first worker on which a job
    /// panicked since the previous barrier. All queues are drained either way.
    pub fn barrier(&self) -> Result<()> {
        let mut failure = None;
        for worker in &self.workers {
            let count = worker.wait_idle();
            if count > 0 && failure.is_none() {
                failure = Some(Error::WorkerPanicked {
                    worker: worker.index,
                    count,
                });
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let count = self.workers.len();
        self.workers.clear();
        debug!("Worker pool with {} thread(s) shut down", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_worker_count() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.worker_count(), 3);
    }

    #[test]
    fn test_pool_sized_from_config() {
        let config = RendererConfig {
            worker_count: 3,
            ..Default::default()
        };
        let pool = WorkerPool::from_config(&config).unwrap();
        assert_eq!(pool.worker_count(), 3);

        let config = RendererConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(WorkerPool::from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_worker_count_positive() {
        assert!(default_worker_count() >= 1);
    }

    #[test]
    fn test_fifo_per_worker() {
        let pool = WorkerPool::new(2).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = order.clone();
            pool.submit(1, move || order.lock().push(i));
        }
        pool.barrier().unwrap();

        let order = order.lock();
        assert_eq!(*order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_barrier_waits_for_running_job() {
        let pool = WorkerPool::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let flag = done.clone();
        pool.submit(0, move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(1, Ordering::SeqCst);
        });

        pool.barrier().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_barrier_on_idle_pool() {
        let pool = WorkerPool::new(4).unwrap();
        pool.barrier().unwrap();
        pool.barrier().unwrap();
    }

    #[test]
    fn test_jobs_run_on_chosen_worker() {
        let pool = WorkerPool::new(3).unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let names = names.clone();
            pool.submit(i, move || {
                let name = thread::current().name().map(str::to_owned);
                names.lock().push((i, name));
            });
        }
        pool.barrier().unwrap();

        for (i, name) in names.lock().iter() {
            assert_eq!(name.as_deref(), Some(format!("tessera-worker-{i}").as_str()));
        }
    }

    #[test]
    fn test_panicking_job_reported_and_worker_survives() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(1, || panic!("boom"));
        let c = counter.clone();
        pool.submit(1, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let err = pool.barrier().unwrap_err();
        assert!(matches!(err, Error::WorkerPanicked { worker: 1, count: 1 }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The panic count is cleared once reported.
        pool.barrier().unwrap();
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_submit_out_of_range_panics() {
        let pool = WorkerPool::new(2).unwrap();
        pool.submit(2, || {});
    }

    #[test]
    fn test_configure_drains_previous_workers() {
        let mut pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..20 {
            let c = counter.clone();
            pool.submit(i % 2, move || {
                thread::sleep(Duration::from_millis(1));
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.configure(4).unwrap();
        assert_eq!(pool.worker_count(), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
