//! Task execution for controller work.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Boxed unit of controller work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs controller tasks.
///
/// Controllers hand every notification, start, stop, listener and removal
/// task to an executor and never run them on the caller's stack while a
/// lock is held. Implementations must not run the job inline on the
/// calling thread: callers may still hold registration read locks.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Default executor: an unbounded pool that reuses idle workers.
///
/// A new worker is spawned whenever a job arrives and no worker is idle,
/// so a blocked service start can never starve the rest of the graph.
/// Workers that stay idle longer than the keep-alive exit.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Executor, ThreadPoolExecutor};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let pool = ThreadPoolExecutor::new("example", Duration::from_secs(1));
/// let (tx, rx) = mpsc::channel();
/// pool.execute(Box::new(move || tx.send(21 * 2).unwrap()));
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct ThreadPoolExecutor {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
    thread_prefix: String,
    keep_alive: Duration,
    spawned: AtomicUsize,
}

#[derive(Default)]
struct PoolQueue {
    jobs: VecDeque<Job>,
    idle: usize,
    workers: usize,
    shutdown: bool,
}

impl ThreadPoolExecutor {
    pub fn new(thread_prefix: impl Into<String>, keep_alive: Duration) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(PoolQueue::default()),
                available: Condvar::new(),
                thread_prefix: thread_prefix.into(),
                keep_alive,
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.queue.lock().workers
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let id = shared.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", shared.thread_prefix, id);
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(shared));
        if let Err(err) = spawned {
            // the job stays queued; a live worker will pick it up
            tracing::error!(error = %err, "failed to spawn lifecycle worker");
            self.shared.queue.lock().workers -= 1;
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, job: Job) {
        let spawn = {
            let mut queue = self.shared.queue.lock();
            queue.jobs.push_back(job);
            if queue.idle > queue.jobs.len() - 1 {
                self.shared.available.notify_one();
                false
            } else {
                queue.workers += 1;
                true
            }
        };
        if spawn {
            self.spawn_worker();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    queue.workers -= 1;
                    return;
                }
                queue.idle += 1;
                let timed_out = shared
                    .available
                    .wait_for(&mut queue, shared.keep_alive)
                    .timed_out();
                queue.idle -= 1;
                if timed_out && queue.jobs.is_empty() {
                    queue.workers -= 1;
                    return;
                }
            }
        };
        job();
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.shutdown = true;
        self.shared.available.notify_all();
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("ThreadPoolExecutor")
            .field("thread_prefix", &self.shared.thread_prefix)
            .field("workers", &queue.workers)
            .field("idle", &queue.idle)
            .field("queued", &queue.jobs.len())
            .finish()
    }
}
