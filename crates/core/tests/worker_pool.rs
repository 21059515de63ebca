//! Integration tests for the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::{Error, WorkerPool};

#[test]
fn test_every_job_runs_exactly_once_before_drop() {
    const JOBS: usize = 1_000;

    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..JOBS).map(|_| AtomicUsize::new(0)).collect());

    {
        let pool = WorkerPool::new(4).expect("Failed to create pool");
        for job in 0..JOBS {
            let runs = runs.clone();
            pool.submit(job % pool.worker_count(), move || {
                runs[job].fetch_add(1, Ordering::SeqCst);
            });
        }
        // Dropped without a barrier: drop must drain.
    }

    for (job, count) in runs.iter().enumerate() {
        assert_eq!(count.load(Ordering::SeqCst), 1, "job {job} ran a wrong number of times");
    }
}

#[test]
fn test_barrier_makes_all_effects_visible() {
    let pool = WorkerPool::new(3).expect("Failed to create pool");
    let sum = Arc::new(AtomicUsize::new(0));

    for round in 1..=5 {
        for i in 0..30 {
            let sum = sum.clone();
            pool.submit(i % 3, move || {
                thread::sleep(Duration::from_micros(100));
                sum.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.barrier().expect("No job should panic");
        assert_eq!(sum.load(Ordering::SeqCst), round * 30);
    }
}

#[test]
fn test_per_worker_order_with_round_robin_submission() {
    const WORKERS: usize = 3;
    let pool = WorkerPool::new(WORKERS).expect("Failed to create pool");
    let logs: Arc<Vec<Mutex<Vec<usize>>>> =
        Arc::new((0..WORKERS).map(|_| Mutex::new(Vec::new())).collect());

    for i in 0..90 {
        let logs = logs.clone();
        let worker = i % WORKERS;
        pool.submit(worker, move || logs[worker].lock().push(i));
    }
    pool.barrier().expect("No job should panic");

    for (worker, log) in logs.iter().enumerate() {
        let log = log.lock();
        let expected: Vec<usize> = (0..90).filter(|i| i % WORKERS == worker).collect();
        assert_eq!(*log, expected, "worker {worker} ran jobs out of order");
    }
}

#[test]
fn test_panic_reported_once_then_cleared() {
    let pool = WorkerPool::new(2).expect("Failed to create pool");

    pool.submit(0, || panic!("recording failed"));
    pool.submit(0, || panic!("recording failed again"));

    match pool.barrier() {
        Err(Error::WorkerPanicked { worker, count }) => {
            assert_eq!(worker, 0);
            assert_eq!(count, 2);
        }
        other => panic!("expected WorkerPanicked, got {other:?}"),
    }

    assert!(pool.barrier().is_ok());
}

#[test]
fn test_reconfigure_then_submit() {
    let mut pool = WorkerPool::new(1).expect("Failed to create pool");
    pool.configure(5).expect("Failed to reconfigure");

    let hits = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let hits = hits.clone();
        pool.submit(i, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    pool.barrier().expect("No job should panic");
    assert_eq!(hits.load(Ordering::SeqCst), 5);

    assert!(matches!(pool.configure(0), Err(Error::Config(_))));
}
