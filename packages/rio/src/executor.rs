//! Fixed-size thread pool for blocking channel operations.

use crate::error::{panic_message, Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, OnceLock, RwLock},
    thread::{self, JoinHandle},
};


type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration of an [`IoExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of worker threads
    pub threads: usize,
    /// Worker threads are named `"{name_prefix}-{n}"`
    pub name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            name_prefix: "rio".into(),
        }
    }
}

/// Handle to a fixed-size pool of threads which run blocking channel operations
///
/// Cheap to clone; clones share the same pool. Jobs run in submission order as threads become
/// free. A panicking job is logged and does not take its thread down.
#[derive(Clone)]
pub struct IoExecutor(Arc<Inner>);

struct Inner {
    // none once shut down.
    send: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: ExecutorConfig,
}

impl IoExecutor {
    /// Spawn a pool with the given configuration
    ///
    /// A thread count of zero is treated as one.
    pub fn new(config: ExecutorConfig) -> io::Result<Self> {
        let (send, recv) = unbounded::<Job>();
        let threads = config.threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let recv = recv.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-{}", config.name_prefix, n))
                .spawn(move || work(recv))?;
            workers.push(worker);
        }
        debug!(threads, prefix = %config.name_prefix, "started i/o executor");
        Ok(IoExecutor(Arc::new(Inner {
            send: RwLock::new(Some(send)),
            workers: Mutex::new(workers),
            config,
        })))
    }

    /// Spawn a pool with `threads` threads and the default name prefix
    pub fn with_threads(threads: usize) -> io::Result<Self> {
        Self::new(ExecutorConfig { threads, ..Default::default() })
    }

    /// The process-wide default pool, spawned on first use with the default configuration
    ///
    /// Prefer passing an explicitly constructed executor where possible. Call
    /// [`shutdown`](Self::shutdown) on it at process exit to join its threads.
    pub fn shared() -> IoExecutor {
        static SHARED: OnceLock<IoExecutor> = OnceLock::new();
        SHARED
            .get_or_init(|| {
                IoExecutor::new(ExecutorConfig::default())
                    .expect("failed to spawn shared i/o executor threads")
            })
            .clone()
    }

    /// Configuration this pool was started with
    pub fn config(&self) -> &ExecutorConfig {
        &self.0.config
    }

    /// Schedule a job, fire-and-forget
    ///
    /// Errors with [`Error::ExecutorShutdown`] if the pool was shut down.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let lock = self.0.send.read().unwrap();
        let Some(send) = lock.as_ref() else { return Err(Error::ExecutorShutdown) };
        send.send(Box::new(job)).map_err(|_| Error::ExecutorShutdown)
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutdown(&self) -> bool {
        self.0.send.read().unwrap().is_none()
    }

    /// Stop accepting jobs, let already submitted jobs finish, and join the threads
    ///
    /// When called from one of the pool's own threads, that thread is not joined. Calling
    /// this more than once does nothing.
    pub fn shutdown(&self) {
        let Some(send) = self.0.send.write().unwrap().take() else { return };
        drop(send);
        let workers = std::mem::take(&mut *self.0.workers.lock().unwrap());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("i/o executor thread panicked");
            }
        }
        debug!(prefix = %self.0.config.name_prefix, "i/o executor shut down");
    }
}

impl std::fmt::Debug for IoExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("IoExecutor")
            .field("config", &self.0.config)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// worker thread body. exits once every sender is gone and the queue is drained.
fn work(recv: Receiver<Job>) {
    for job in recv.iter() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            error!(panic = %panic_message(&*payload), "i/o job panicked");
        }
    }
}
