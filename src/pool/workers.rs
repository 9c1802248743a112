//! Fixed-size worker thread pool.
//!
//! Ported from the original server's `threadPool`: a shared task
//! queue behind a mutex/condvar. Unlike the original, which `detach()`es
//! its workers and never joins them, shutdown here explicitly joins
//! every worker thread so in-flight tasks finish and no thread outlives
//! the pool.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    tasks: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    closed: Mutex<bool>,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Self {
        assert!(thread_count > 0);
        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            closed: Mutex::new(false),
        });

        let workers = (0..thread_count)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        WorkerPool { shared, workers }
    }

    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        let mut tasks = self.shared.tasks.lock().unwrap();
        tasks.push_back(Box::new(task));
        drop(tasks);
        self.shared.not_empty.notify_one();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut tasks = shared.tasks.lock().unwrap();
        loop {
            if let Some(task) = tasks.pop_front() {
                drop(tasks);
                task();
                break;
            }
            if *shared.closed.lock().unwrap() {
                return;
            }
            tasks = shared.not_empty.wait(tasks).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        *self.shared.closed.lock().unwrap() = true;
        self.shared.not_empty.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_submitted_tasks() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool); // joins all workers, draining the queue first
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
