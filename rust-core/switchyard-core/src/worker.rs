//! # Worker Executors
//!
//! Where `Outcome::Dispatch` continues a request. An [`Executor`] takes a
//! boxed job that owns the request context; the job finalizes the response
//! itself, so executors only need to run it somewhere.
//!
//! - [`ThreadPool`] - fixed set of named OS threads fed by a channel
//! - [`BlockingExecutor`] - tokio's blocking pool
//! - [`InlineExecutor`] - runs on the calling thread
//!
//! The default executor is a `ThreadPool` sized to the CPU count, created on
//! first use.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use tracing::{debug, error, warn};

/// Unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs
pub trait Executor: Send + Sync {
    /// Run `job`, now or later, on some thread
    fn execute(&self, job: Job);

    /// Executor name for logging
    fn name(&self) -> &str {
        "executor"
    }

    /// Whether jobs run on the calling thread
    fn is_inline(&self) -> bool {
        false
    }
}

/// Fixed-size pool of named worker threads
pub struct ThreadPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `size` threads named `{name}-{index}`
    ///
    /// # Errors
    ///
    /// Returns the OS error if a thread cannot be spawned.
    pub fn new(name: impl Into<String>, size: usize) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || run_worker(&rx))?;
            workers.push(handle);
        }
        debug!(pool = %name, threads = workers.len(), "Worker pool started");

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads still attached
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.lock().map_or(0, |w| w.len())
    }

    /// Stop accepting jobs and wait for queued ones to finish
    ///
    /// A worker thread calling this does not wait for itself.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles = self
            .workers
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = %self.name, "Worker thread exited abnormally");
            }
        }
        debug!(pool = %self.name, "Worker pool stopped");
    }
}

fn run_worker(rx: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let job = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "job panicked".to_string());
            error!(
                worker = thread::current().name().unwrap_or("worker"),
                panic = %message,
                "Worker job panicked"
            );
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        let sent = self
            .sender
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|tx| tx.send(job).is_ok()));
        if sent != Some(true) {
            error!(pool = %self.name, "Worker pool is shut down; job dropped");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("size", &self.size())
            .finish()
    }
}

/// Runs jobs on tokio's blocking thread pool
#[derive(Debug, Clone)]
pub struct BlockingExecutor {
    handle: tokio::runtime::Handle,
}

impl BlockingExecutor {
    /// Executor for an explicit runtime
    #[must_use]
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller runs in, if any
    #[must_use]
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for BlockingExecutor {
    fn execute(&self, job: Job) {
        drop(self.handle.spawn_blocking(job));
    }

    fn name(&self) -> &str {
        "tokio-blocking"
    }
}

/// Runs jobs immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }

    fn name(&self) -> &str {
        "inline"
    }

    fn is_inline(&self) -> bool {
        true
    }
}

/// Default and named executors of one application
#[derive(Default)]
pub struct Workers {
    default: OnceLock<Arc<dyn Executor>>,
    named: HashMap<String, Arc<dyn Executor>>,
}

impl Workers {
    /// Replace the default executor
    pub fn set_default(&mut self, executor: Arc<dyn Executor>) {
        self.default = OnceLock::from(executor);
    }

    /// Register a named executor
    pub fn insert(&mut self, name: impl Into<String>, executor: Arc<dyn Executor>) {
        self.named.insert(name.into(), executor);
    }

    /// Executor by name; `None` selects the default
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Option<Arc<dyn Executor>> {
        match name {
            None => Some(self.default_executor()),
            Some(name) => self.named.get(name).cloned(),
        }
    }

    /// The default executor, spawning the worker pool on first use
    pub fn default_executor(&self) -> Arc<dyn Executor> {
        Arc::clone(self.default.get_or_init(|| {
            match ThreadPool::new("switchyard-worker", num_cpus::get()) {
                Ok(pool) => Arc::new(pool),
                Err(e) => {
                    warn!(error = %e, "Cannot start worker pool; running dispatched work inline");
                    Arc::new(InlineExecutor)
                }
            }
        }))
    }
}

impl fmt::Debug for Workers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workers")
            .field("default", &self.default.get().map(|e| e.name().to_string()))
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_thread_pool_runs_jobs_on_named_threads() {
        let pool = ThreadPool::new("test-pool", 2).unwrap();
        assert_eq!(pool.size(), 2);

        let (tx, rx) = channel();
        pool.execute(Box::new(move || {
            let name = thread::current().name().map(String::from);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("test-pool-"));
    }

    #[test]
    fn test_thread_pool_survives_panicking_job() {
        let pool = ThreadPool::new("panicky", 1).unwrap();
        pool.execute(Box::new(|| panic!("boom")));

        let (tx, rx) = channel();
        pool.execute(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = ThreadPool::new("drain", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        pool.execute(Box::new(|| unreachable!()));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_inline_executor() {
        let hit = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hit);
        InlineExecutor.execute(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
        assert!(InlineExecutor.is_inline());
        assert!(!ThreadPool::new("not-inline", 1).unwrap().is_inline());
    }

    #[tokio::test]
    async fn test_blocking_executor() {
        let executor = BlockingExecutor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = tx.send(thread::current().id());
        }));
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_workers_lookup() {
        let mut workers = Workers::default();
        workers.insert("inline", Arc::new(InlineExecutor));
        workers.set_default(Arc::new(InlineExecutor));

        assert_eq!(workers.get(Some("inline")).unwrap().name(), "inline");
        assert!(workers.get(Some("missing")).is_none());
        assert_eq!(workers.get(None).unwrap().name(), "inline");
    }
}
