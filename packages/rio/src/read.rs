//! Read pipeline: a channel exposed as a publisher of buffers.
//!
//! Each subscription opens its own channel. Demand signalled through
//! [`request`](Subscription::request) becomes read tasks on a single-flight queue, which are
//! drained on an [`IoExecutor`]: every task performs up to its count of blocking reads, handing
//! each filled buffer downstream in read order. The channel is closed exactly once, when the
//! stream completes, fails, or is cancelled.

use crate::{
    buffers::Buffers,
    channel::{ChannelSource, OpenChannel, ReadChannel},
    error::{panic_message, Error},
    executor::IoExecutor,
    flight::{self, Drain, TaskQueue},
    flow::{NoopSubscription, Publisher, Subscriber, Subscription},
};
use bytes::Bytes;
use std::{
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};


type OpenRead = dyn Fn() -> io::Result<Box<dyn ReadChannel>> + Send + Sync;

/// Readable channel source, bound to an executor
///
/// Produces publishers with [`read`](Self::read); every subscription to such a publisher opens
/// a fresh channel.
#[derive(Clone)]
pub struct ReadableChannel {
    open: Arc<OpenRead>,
    executor: IoExecutor,
}

impl ReadableChannel {
    /// Read channels opened by `source`, on the [shared](IoExecutor::shared) executor
    pub fn new<S, C>(source: S) -> Self
    where
        S: ChannelSource<C> + 'static,
        C: ReadChannel + 'static,
    {
        Self::with_executor(source, IoExecutor::shared())
    }

    /// Read channels opened by `source`, running blocking reads on `executor`
    pub fn with_executor<S, C>(source: S, executor: IoExecutor) -> Self
    where
        S: ChannelSource<C> + 'static,
        C: ReadChannel + 'static,
    {
        let open = move || source.open().map(|chan| Box::new(chan) as Box<dyn ReadChannel>);
        ReadableChannel { open: Arc::new(open), executor }
    }

    /// Publisher of the channel's content, read into buffers allocated by `buffers`
    pub fn read<B>(&self, buffers: B) -> ChannelPublisher
    where
        B: Buffers + 'static,
    {
        ChannelPublisher {
            open: Arc::clone(&self.open),
            buffers: Arc::new(buffers),
            executor: self.executor.clone(),
        }
    }
}

/// Publisher of a readable channel's content
///
/// See [`ReadableChannel::read`].
#[derive(Clone)]
pub struct ChannelPublisher {
    open: Arc<OpenRead>,
    buffers: Arc<dyn Buffers>,
    executor: IoExecutor,
}

impl Publisher<Bytes> for ChannelPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Bytes>>) {
        let chan = match (self.open)() {
            Ok(chan) => chan,
            Err(e) => {
                debug!(%e, "failed to open read channel");
                subscriber.on_subscribe(Arc::new(NoopSubscription));
                subscriber.on_error(Error::Open(e));
                return;
            }
        };
        trace!("read channel opened");
        let queue = Arc::new(ReadTaskQueue {
            guard: TerminalGuard::new(Arc::clone(&subscriber)),
            tasks: TaskQueue::new(),
            chan: Mutex::new(OpenChannel::new(chan)),
            buffers: Arc::clone(&self.buffers),
            executor: self.executor.clone(),
        });
        subscriber.on_subscribe(Arc::new(ReadSubscription { queue }));
    }
}


// ==== terminal guard ====


// wraps the subscriber so that at most one terminal signal gets through, and nothing at all
// after a cancel.
//
// the subscriber reference is dropped on termination, which breaks the cycle between the
// subscriber and the subscription it holds.
struct TerminalGuard {
    origin: Mutex<Option<Arc<dyn Subscriber<Bytes>>>>,
    done: AtomicBool,
}

impl TerminalGuard {
    fn new(origin: Arc<dyn Subscriber<Bytes>>) -> Self {
        TerminalGuard {
            origin: Mutex::new(Some(origin)),
            done: AtomicBool::new(false),
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(SeqCst)
    }

    // win the terminal state, taking the subscriber. none if something else won.
    fn terminate(&self) -> Option<Arc<dyn Subscriber<Bytes>>> {
        if self.done.compare_exchange(false, true, SeqCst, SeqCst).is_err() {
            return None;
        }
        self.origin.lock().unwrap().take()
    }

    fn on_next(&self, item: Bytes) -> anyhow::Result<()> {
        if self.is_done() {
            return Ok(());
        }
        // must not hold the lock across the call, the subscriber may cancel re-entrantly
        let origin = self.origin.lock().unwrap().clone();
        match origin {
            Some(origin) => origin.on_next(item),
            None => Ok(()),
        }
    }

    fn on_error(&self, error: Error) {
        match self.terminate() {
            Some(origin) => origin.on_error(error),
            None => trace!(%error, "suppressed error after termination"),
        }
    }

    fn on_complete(&self) {
        if let Some(origin) = self.terminate() {
            origin.on_complete();
        }
    }

    // returns whether this call terminated the stream.
    fn cancel(&self) -> bool {
        self.terminate().is_some()
    }
}


// ==== task queue ====


// read up to `count` buffers.
struct ReadRequest {
    count: i64,
}

struct ReadTaskQueue {
    guard: TerminalGuard,
    tasks: TaskQueue<ReadRequest>,
    // only locked by the runner
    chan: Mutex<OpenChannel<dyn ReadChannel>>,
    buffers: Arc<dyn Buffers>,
    executor: IoExecutor,
}

impl ReadTaskQueue {
    // a channel which panicked mid-read poisons the lock, and still has to be closed.
    fn chan(&self) -> MutexGuard<'_, OpenChannel<dyn ReadChannel>> {
        self.chan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // read one buffer and deliver it. returns false once the stream terminated.
    fn read_one(&self, chan: &mut OpenChannel<dyn ReadChannel>) -> bool {
        if self.guard.is_done() {
            return false;
        }
        let Some(open) = chan.get() else { return false };
        let mut buf = self.buffers.create();
        match open.read(&mut buf) {
            Err(e) => {
                chan.close_quietly("read failed");
                self.guard.on_error(Error::Io(e));
                false
            }
            Ok(None) => {
                match chan.close() {
                    Ok(()) => {
                        debug!("read channel exhausted");
                        self.guard.on_complete();
                    }
                    Err(e) => self.guard.on_error(Error::Io(e)),
                }
                false
            }
            Ok(Some(_)) => {
                // a cancel may have raced with the blocking read
                if self.guard.is_done() {
                    return false;
                }
                let delivered = catch_unwind(AssertUnwindSafe(|| self.guard.on_next(buf.freeze())))
                    .unwrap_or_else(|payload| Err(anyhow::anyhow!(
                        "subscriber panicked: {}", panic_message(&*payload),
                    )));
                match delivered {
                    Ok(()) => true,
                    Err(e) => {
                        chan.close_quietly("subscriber failed");
                        self.guard.on_error(Error::Downstream(e));
                        false
                    }
                }
            }
        }
    }
}

impl Drain for ReadTaskQueue {
    type Task = ReadRequest;

    fn queue(&self) -> &TaskQueue<ReadRequest> {
        &self.tasks
    }

    fn executor(&self) -> &IoExecutor {
        &self.executor
    }

    fn halted(&self) -> bool {
        self.guard.is_done()
    }

    fn process(&self, task: ReadRequest) {
        let mut chan = self.chan();
        let mut remaining = task.count;
        while remaining > 0 && self.read_one(&mut chan) {
            remaining -= 1;
        }
    }

    fn fail(&self, error: Error) {
        self.guard.on_error(error);
    }

    fn finish(&self) {
        self.chan().close_quietly("read stream terminated");
    }
}


// ==== subscription ====


struct ReadSubscription {
    queue: Arc<ReadTaskQueue>,
}

impl Subscription for ReadSubscription {
    fn request(&self, n: i64) {
        if self.queue.guard.is_done() {
            return;
        }
        if n <= 0 {
            self.queue.tasks.clear();
            self.queue.guard.on_error(Error::NonPositiveDemand(n));
        } else {
            self.queue.tasks.push(ReadRequest { count: n });
        }
        // after an error this only serves to close the channel
        flight::schedule(&self.queue);
    }

    fn cancel(&self) {
        if self.queue.guard.cancel() {
            debug!("read subscription cancelled");
        }
        self.queue.tasks.clear();
        flight::schedule(&self.queue);
    }
}
