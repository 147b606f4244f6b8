//! Write pipeline: a publisher of buffers drained into a channel.
//!
//! [`WritableChannel::write`] subscribes a channel subscriber to the given publisher. The
//! subscriber opens a channel, requests buffers as dictated by its [`WriteGreed`], and queues
//! every received buffer as a write task on a single-flight queue drained on an
//! [`IoExecutor`]. Completion and errors are queued behind the pending writes, so the
//! returned [`WriteFuture`] resolves only once every preceding buffer was written and the
//! channel closed.

use crate::{
    channel::{ChannelSource, OpenChannel, WriteChannel},
    error::{Error, Result},
    executor::IoExecutor,
    flight::{self, Drain, TaskQueue},
    flow::{Publisher, Subscriber, Subscription},
    greed::{Constant, WriteGreed},
    util::atomic_take::AtomicTake,
};
use bytes::Bytes;
use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
        Mutex,
        MutexGuard,
        OnceLock,
        PoisonError,
    },
    task::{Context, Poll},
};
use tokio::sync::oneshot;


type OpenWrite = dyn Fn() -> io::Result<Box<dyn WriteChannel>> + Send + Sync;

/// Writable channel source, bound to an executor
#[derive(Clone)]
pub struct WritableChannel {
    open: Arc<OpenWrite>,
    executor: IoExecutor,
}

impl WritableChannel {
    /// Write to channels opened by `source`, on the [shared](IoExecutor::shared) executor
    pub fn new<S, C>(source: S) -> Self
    where
        S: ChannelSource<C> + 'static,
        C: WriteChannel + 'static,
    {
        Self::with_executor(source, IoExecutor::shared())
    }

    /// Write to channels opened by `source`, running blocking writes on `executor`
    pub fn with_executor<S, C>(source: S, executor: IoExecutor) -> Self
    where
        S: ChannelSource<C> + 'static,
        C: WriteChannel + 'static,
    {
        let open = move || source.open().map(|chan| Box::new(chan) as Box<dyn WriteChannel>);
        WritableChannel { open: Arc::new(open), executor }
    }

    /// Write everything `publisher` produces to a newly opened channel
    ///
    /// Buffers are requested from the publisher according to `greed`. The returned future
    /// resolves once the publisher completed and the channel was closed, or with the first
    /// failure. A failed open or write cancels the publisher's subscription. Dropping the
    /// future does not stop the transfer.
    pub fn write<P, G>(&self, publisher: &P, greed: G) -> WriteFuture
    where
        P: Publisher<Bytes> + ?Sized,
        G: WriteGreed + 'static,
    {
        self.write_dyn(publisher, Arc::new(greed))
    }

    /// Write with the [system](Constant::system) greed in its adaptive form
    ///
    /// If the environment holds an invalid greed configuration, the returned future is
    /// already failed and `publisher` is not subscribed to.
    pub fn write_default<P>(&self, publisher: &P) -> WriteFuture
    where
        P: Publisher<Bytes> + ?Sized,
    {
        match Constant::system() {
            Ok(greed) => self.write_dyn(publisher, Arc::from(Box::new(greed).adaptive())),
            Err(e) => WriteFuture::failed(e),
        }
    }

    fn write_dyn<P>(&self, publisher: &P, greed: Arc<dyn WriteGreed>) -> WriteFuture
    where
        P: Publisher<Bytes> + ?Sized,
    {
        let (result, future) = WriteResult::new();
        publisher.subscribe(Arc::new(ChannelSubscriber {
            subscribed: AtomicBool::new(false),
            open: Arc::clone(&self.open),
            executor: self.executor.clone(),
            greed,
            result: Mutex::new(Some(result)),
            queue: OnceLock::new(),
        }));
        future
    }
}


// ==== result ====


// sending half of a write's result. resolves at most once.
struct WriteResult(AtomicTake<oneshot::Sender<Result<()>>>);

impl WriteResult {
    fn new() -> (Self, WriteFuture) {
        let (send, recv) = oneshot::channel();
        (WriteResult(AtomicTake::some(send)), WriteFuture(Some(recv)))
    }

    // returns whether this call resolved the result.
    fn resolve(&self, result: Result<()>) -> bool {
        let Some(send) = self.0.take() else { return false };
        match &result {
            Ok(()) => debug!("write finished"),
            Err(e) => debug!(%e, "write failed"),
        }
        // the future being gone is fine
        let _ = send.send(result);
        true
    }

    fn is_resolved(&self) -> bool {
        self.0.is_taken()
    }
}

/// Future for the result of a write
///
/// Resolves to `Ok(())` once the publisher completed and the channel was closed, or to the
/// first failure of the transfer. Resolves to [`Error::Abandoned`] if the transfer was dropped
/// without resolving, e.g. because the publisher never subscribed.
#[must_use = "the result of a write is only observable through its future"]
#[derive(Debug)]
pub struct WriteFuture(Option<oneshot::Receiver<Result<()>>>);

impl WriteFuture {
    fn failed(error: Error) -> Self {
        let (result, future) = WriteResult::new();
        result.resolve(Err(error));
        future
    }

    /// Block until this future resolves
    ///
    /// When this method returns, that counts as this future resolving. This method will panic
    /// if this future has already resolved, or if called from within an asynchronous execution
    /// context.
    pub fn block(&mut self) -> Result<()> {
        let recv = self.0.take().expect("WriteFuture.block called after terminated");
        recv.blocking_recv().unwrap_or(Err(Error::Abandoned))
    }

    /// Try to resolve this future immediately without blocking
    ///
    /// Returns `None` if the write is still in progress. If this method returns `Some`, that
    /// counts as this future resolving. This method will panic if this future has already
    /// resolved.
    pub fn try_now(&mut self) -> Option<Result<()>> {
        let recv = self.0.as_mut().expect("WriteFuture.try_now called after terminated");
        let result = match recv.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(Error::Abandoned),
        };
        self.0 = None;
        Some(result)
    }

    /// Whether this future has already resolved
    pub fn is_terminated(&self) -> bool {
        self.0.is_none()
    }
}

impl Future for WriteFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.get_mut();
        // for implementation of FusedFuture
        let Some(recv) = this.0.as_mut() else { return Poll::Pending };
        let result = match Pin::new(recv).poll(cx) {
            Poll::Ready(result) => result.unwrap_or(Err(Error::Abandoned)),
            Poll::Pending => return Poll::Pending,
        };
        this.0 = None;
        Poll::Ready(result)
    }
}

#[cfg(feature = "futures")]
impl futures::future::FusedFuture for WriteFuture {
    fn is_terminated(&self) -> bool {
        Self::is_terminated(self)
    }
}


// ==== task queue ====


enum WriteRequest {
    // write the buffer fully
    Next(Bytes),
    // close the channel and resolve with the close result
    Complete,
    // close the channel and resolve with the error
    Error(Error),
}

struct WriteTaskQueue {
    tasks: TaskQueue<WriteRequest>,
    // only locked by the runner
    chan: Mutex<OpenChannel<dyn WriteChannel>>,
    result: WriteResult,
    // taken when the transfer finishes, to release the publisher
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    greed: Arc<dyn WriteGreed>,
    executor: IoExecutor,
}

impl WriteTaskQueue {
    fn accept(self: &Arc<Self>, request: WriteRequest) {
        self.tasks.push(request);
        flight::schedule(self);
    }

    // a channel which panicked mid-write poisons the lock, and still has to be closed.
    fn chan(&self) -> MutexGuard<'_, OpenChannel<dyn WriteChannel>> {
        self.chan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().unwrap().clone()
    }

    // resolve with an error that did not come from upstream, cancelling upstream.
    // only called by the runner, so nothing resolves between the check and the resolve.
    fn abort(&self, error: Error) {
        if self.result.is_resolved() {
            return;
        }
        let upstream = self.upstream.lock().unwrap().take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.result.resolve(Err(error));
    }

    fn write_fully(&self, mut buf: &[u8]) -> io::Result<()> {
        let mut chan = self.chan();
        let Some(chan) = chan.get() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel already closed"));
        };
        while !buf.is_empty() {
            match chan.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

impl Drain for WriteTaskQueue {
    type Task = WriteRequest;

    fn queue(&self) -> &TaskQueue<WriteRequest> {
        &self.tasks
    }

    fn executor(&self) -> &IoExecutor {
        &self.executor
    }

    fn halted(&self) -> bool {
        self.result.is_resolved()
    }

    fn process(&self, task: WriteRequest) {
        match task {
            WriteRequest::Next(buf) => match self.write_fully(&buf) {
                Ok(()) => {
                    trace!(len = buf.len(), "buffer written");
                    if let Some(upstream) = self.upstream() {
                        self.greed.processed(&*upstream);
                    }
                }
                Err(e) => {
                    self.chan().close_quietly("write failed");
                    self.abort(Error::Io(e));
                }
            },
            WriteRequest::Complete => {
                let closed = self.chan().close();
                self.result.resolve(closed.map_err(Error::Io));
            }
            WriteRequest::Error(e) => {
                self.chan().close_quietly("upstream failed");
                self.result.resolve(Err(e));
            }
        }
    }

    fn fail(&self, error: Error) {
        self.abort(error);
    }

    fn finish(&self) {
        self.chan().close_quietly("write terminated");
        self.upstream.lock().unwrap().take();
    }
}


// ==== subscriber ====


struct ChannelSubscriber {
    subscribed: AtomicBool,
    open: Arc<OpenWrite>,
    executor: IoExecutor,
    greed: Arc<dyn WriteGreed>,
    // moved into the queue once the channel is open
    result: Mutex<Option<WriteResult>>,
    queue: OnceLock<Arc<WriteTaskQueue>>,
}

impl ChannelSubscriber {
    // the queue, unless not yet subscribed or already resolved.
    fn live_queue(&self) -> Option<&Arc<WriteTaskQueue>> {
        self.queue.get().filter(|queue| !queue.halted())
    }
}

impl Subscriber<Bytes> for ChannelSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.subscribed.swap(true, SeqCst) {
            warn!("write subscriber subscribed twice, cancelling the new subscription");
            subscription.cancel();
            return;
        }
        let Some(result) = self.result.lock().unwrap().take() else {
            subscription.cancel();
            return;
        };
        let chan = match (self.open)() {
            Ok(chan) => chan,
            Err(e) => {
                subscription.cancel();
                result.resolve(Err(Error::Open(e)));
                return;
            }
        };
        trace!("write channel opened");
        let queue = Arc::new(WriteTaskQueue {
            tasks: TaskQueue::new(),
            chan: Mutex::new(OpenChannel::new(chan)),
            result,
            upstream: Mutex::new(Some(Arc::clone(&subscription))),
            greed: Arc::clone(&self.greed),
            executor: self.executor.clone(),
        });
        // the first request may deliver synchronously, so the queue must be in place
        if self.queue.set(queue).is_err() {
            unreachable!("write queue set twice");
        }
        self.greed.init(&*subscription);
    }

    fn on_next(&self, item: Bytes) -> anyhow::Result<()> {
        let Some(queue) = self.live_queue() else { return Ok(()) };
        if let Some(upstream) = queue.upstream() {
            self.greed.received(&*upstream);
        }
        queue.accept(WriteRequest::Next(item));
        Ok(())
    }

    fn on_error(&self, error: Error) {
        let Some(queue) = self.live_queue() else { return };
        queue.tasks.clear();
        queue.accept(WriteRequest::Error(error));
    }

    fn on_complete(&self) {
        let Some(queue) = self.live_queue() else { return };
        queue.accept(WriteRequest::Complete);
    }
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{channel::Channel, source};
    use crossbeam_channel::{Receiver, Sender};
    use std::{
        sync::atomic::{AtomicI64, AtomicUsize},
        time::Duration,
    };

    /// Write channel recording what is written into shared state.
    pub(crate) struct Sink {
        pub(crate) data: Arc<Mutex<Vec<u8>>>,
        pub(crate) writes: Arc<AtomicUsize>,
        pub(crate) closes: Arc<AtomicUsize>,
        // accept at most this many bytes per call
        pub(crate) max_chunk: usize,
        // write call number (1-based) which fails
        pub(crate) fail_at: Option<usize>,
        // write call number (1-based) which panics
        pub(crate) panic_at: Option<usize>,
        pub(crate) close_fails: bool,
        // before every write call, signals the first and waits on the second, if present
        pub(crate) gate: Option<(Sender<()>, Receiver<()>)>,
    }

    impl Sink {
        pub(crate) fn new() -> Self {
            Sink {
                data: Default::default(),
                writes: Default::default(),
                closes: Default::default(),
                max_chunk: usize::MAX,
                fail_at: None,
                panic_at: None,
                close_fails: false,
                gate: None,
            }
        }

        fn handle(&self) -> Sink {
            Sink {
                data: Arc::clone(&self.data),
                writes: Arc::clone(&self.writes),
                closes: Arc::clone(&self.closes),
                max_chunk: self.max_chunk,
                fail_at: self.fail_at,
                panic_at: self.panic_at,
                close_fails: self.close_fails,
                gate: self.gate.clone(),
            }
        }

        /// Channel source producing handles to this sink.
        pub(crate) fn source(&self) -> impl Fn() -> io::Result<Sink> + Send + Sync + 'static {
            let sink = self.handle();
            move || Ok(sink.handle())
        }

        pub(crate) fn data(&self) -> Vec<u8> {
            self.data.lock().unwrap().clone()
        }

        pub(crate) fn writes(&self) -> usize {
            self.writes.load(SeqCst)
        }

        pub(crate) fn closes(&self) -> usize {
            self.closes.load(SeqCst)
        }
    }

    impl Channel for Sink {
        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, SeqCst);
            if self.close_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "close failed"));
            }
            Ok(())
        }
    }

    impl WriteChannel for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some((parked, go)) = &self.gate {
                parked.send(()).unwrap();
                go.recv_timeout(Duration::from_secs(10)).unwrap();
            }
            let n = self.writes.fetch_add(1, SeqCst) + 1;
            if Some(n) == self.panic_at {
                panic!("sink bug");
            }
            if Some(n) == self.fail_at {
                return Err(io::Error::new(io::ErrorKind::Other, "write failed"));
            }
            let len = buf.len().min(self.max_chunk);
            self.data.lock().unwrap().extend_from_slice(&buf[..len]);
            Ok(len)
        }
    }

    /// Subscription recording requests and cancellation.
    #[derive(Default)]
    pub(crate) struct Upstream {
        pub(crate) requested: AtomicI64,
        pub(crate) requests: AtomicUsize,
        pub(crate) cancelled: AtomicBool,
    }

    impl Subscription for Upstream {
        fn request(&self, n: i64) {
            self.requested.fetch_add(n, SeqCst);
            self.requests.fetch_add(1, SeqCst);
        }

        fn cancel(&self) {
            self.cancelled.store(true, SeqCst);
        }
    }

    /// Publisher which hands its subscriber to the test.
    #[derive(Default)]
    pub(crate) struct Manual(Mutex<Option<Arc<dyn Subscriber<Bytes>>>>);

    impl Manual {
        pub(crate) fn take(&self) -> Arc<dyn Subscriber<Bytes>> {
            self.0.lock().unwrap().take().expect("nothing subscribed")
        }
    }

    impl Publisher<Bytes> for Manual {
        fn subscribe(&self, subscriber: Arc<dyn Subscriber<Bytes>>) {
            *self.0.lock().unwrap() = Some(subscriber);
        }
    }

    fn chunks(n: usize, len: usize) -> Vec<Bytes> {
        (0..n).map(|i| Bytes::from(vec![i as u8; len])).collect()
    }

    #[test]
    fn short_writes_are_continued() {
        let exec = IoExecutor::with_threads(2).unwrap();
        let sink = Sink { max_chunk: 3, ..Sink::new() };
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let data = chunks(3, 10);
        let mut fut = chan.write(&source::iter(data.clone()), Constant::new(2, 1).unwrap());
        fut.block().unwrap();
        assert_eq!(sink.data(), data.concat());
        // 4 calls per 10 byte buffer
        assert_eq!(sink.writes(), 12);
        assert_eq!(sink.closes(), 1);
        exec.shutdown();
    }

    #[test]
    fn error_discards_pending_writes() {
        let exec = IoExecutor::with_threads(2).unwrap();
        let (parked_send, parked) = crossbeam_channel::unbounded();
        let (go, go_recv) = crossbeam_channel::unbounded();
        let sink = Sink { gate: Some((parked_send, go_recv)), ..Sink::new() };
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let manual = Manual::default();
        let mut fut = chan.write(&manual, Constant::single());
        let subscriber = manual.take();
        let upstream = Arc::new(Upstream::default());
        subscriber.on_subscribe(upstream.clone());

        for buf in chunks(3, 4) {
            subscriber.on_next(buf).unwrap();
        }
        // first write is parked on the gate while the rest are queued
        parked.recv_timeout(Duration::from_secs(10)).unwrap();
        subscriber.on_error(Error::upstream(anyhow::anyhow!("source broke")));
        go.send(()).unwrap();

        match fut.block() {
            Err(Error::Upstream(e)) => assert_eq!(e.to_string(), "source broke"),
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert_eq!(sink.data(), [0; 4]);
        assert_eq!(sink.writes(), 1);
        assert_eq!(sink.closes(), 1);
        assert!(parked.is_empty());
        // the upstream failed on its own
        assert!(!upstream.cancelled.load(SeqCst));
        exec.shutdown();
    }

    #[test]
    fn second_subscription_is_cancelled() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink::new();
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let manual = Manual::default();
        let mut fut = chan.write(&manual, Constant::single());
        let subscriber = manual.take();
        let first = Arc::new(Upstream::default());
        let second = Arc::new(Upstream::default());
        subscriber.on_subscribe(first.clone());
        subscriber.on_subscribe(second.clone());
        assert!(second.cancelled.load(SeqCst));
        assert_eq!(second.requests.load(SeqCst), 0);
        assert!(!first.cancelled.load(SeqCst));
        assert_eq!(first.requested.load(SeqCst), 1);

        subscriber.on_next(Bytes::from_static(b"still working")).unwrap();
        subscriber.on_complete();
        fut.block().unwrap();
        assert_eq!(sink.data(), b"still working");
        exec.shutdown();
    }

    #[test]
    fn open_failure_fails_result() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let source = || -> io::Result<Sink> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read only"))
        };
        let chan = WritableChannel::with_executor(source, exec.clone());
        let manual = Manual::default();
        let mut fut = chan.write(&manual, Constant::single());
        let subscriber = manual.take();
        let upstream = Arc::new(Upstream::default());
        subscriber.on_subscribe(upstream.clone());
        match fut.try_now() {
            Some(Err(Error::Open(e))) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("expected open error, got {:?}", other),
        }
        assert!(fut.is_terminated());
        assert!(upstream.cancelled.load(SeqCst));
        assert_eq!(upstream.requests.load(SeqCst), 0);
        // later signals are ignored
        subscriber.on_next(Bytes::from_static(b"x")).unwrap();
        subscriber.on_complete();
        exec.shutdown();
    }

    #[test]
    fn write_failure_cancels_upstream() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink { fail_at: Some(2), ..Sink::new() };
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let manual = Manual::default();
        let mut fut = chan.write(&manual, Constant::single());
        let subscriber = manual.take();
        let upstream = Arc::new(Upstream::default());
        subscriber.on_subscribe(upstream.clone());
        for buf in chunks(3, 2) {
            subscriber.on_next(buf).unwrap();
        }
        assert!(matches!(fut.block(), Err(Error::Io(_))));
        assert!(upstream.cancelled.load(SeqCst));
        assert_eq!(sink.data(), [0, 0]);
        assert_eq!(sink.closes(), 1);
        // signals after the failure are ignored
        subscriber.on_complete();
        crate::read::tests::wait_until(|| sink.writes() == 2);
        exec.shutdown();
        assert_eq!(sink.closes(), 1);
    }

    #[test]
    fn write_error_wins_over_close_error() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink { fail_at: Some(2), close_fails: true, ..Sink::new() };
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let mut fut = chan.write(&source::iter(chunks(4, 3)), Constant::single());
        match fut.block() {
            Err(Error::Io(e)) => assert_eq!(e.to_string(), "write failed"),
            other => panic!("expected write error, got {:?}", other),
        }
        assert_eq!(sink.data(), [0; 3]);
        assert_eq!(sink.closes(), 1);
        exec.shutdown();
        assert_eq!(sink.closes(), 1);
    }

    #[test]
    fn panicking_write_closes_channel() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink { panic_at: Some(2), ..Sink::new() };
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let manual = Manual::default();
        let mut fut = chan.write(&manual, Constant::single());
        let subscriber = manual.take();
        let upstream = Arc::new(Upstream::default());
        subscriber.on_subscribe(upstream.clone());
        for buf in chunks(3, 2) {
            subscriber.on_next(buf).unwrap();
        }
        match fut.block() {
            Err(Error::Panicked(msg)) => assert_eq!(msg, "sink bug"),
            other => panic!("expected panic error, got {:?}", other),
        }
        assert!(upstream.cancelled.load(SeqCst));
        // the subscriber still holds the queue, so only the drain loop can have closed it
        crate::read::tests::wait_until(|| sink.closes() == 1);
        assert_eq!(sink.data(), [0, 0]);
        assert_eq!(sink.writes(), 2);
        drop(subscriber);
        exec.shutdown();
        assert_eq!(sink.closes(), 1);
    }

    #[test]
    fn zero_length_write_fails() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink { max_chunk: 0, ..Sink::new() };
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let mut fut = chan.write(&source::iter(chunks(1, 8)), Constant::single());
        match fut.block() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
            other => panic!("expected write zero, got {:?}", other),
        }
        exec.shutdown();
    }

    #[test]
    fn greed_drives_requests() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink::new();
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let manual = Manual::default();
        let mut fut = chan.write(&manual, Constant::new(3, 1).unwrap());
        let subscriber = manual.take();
        let upstream = Arc::new(Upstream::default());
        subscriber.on_subscribe(upstream.clone());
        assert_eq!(upstream.requested.load(SeqCst), 3);
        for buf in chunks(8, 1) {
            subscriber.on_next(buf).unwrap();
        }
        // receipts 2, 5 and 8 each requested another batch
        assert_eq!(upstream.requested.load(SeqCst), 12);
        subscriber.on_complete();
        fut.block().unwrap();
        assert_eq!(sink.data().len(), 8);
        exec.shutdown();
    }

    #[test]
    fn unsubscribed_write_is_abandoned() {
        struct Nowhere;

        impl Publisher<Bytes> for Nowhere {
            fn subscribe(&self, _subscriber: Arc<dyn Subscriber<Bytes>>) {}
        }

        let exec = IoExecutor::with_threads(1).unwrap();
        let chan = WritableChannel::with_executor(Sink::new().source(), exec.clone());
        let fut = chan.write(&Nowhere, Constant::single());
        assert!(matches!(futures::executor::block_on(fut), Err(Error::Abandoned)));
        exec.shutdown();
    }

    #[cfg(feature = "futures")]
    #[test]
    fn future_is_fused() {
        use futures::future::FusedFuture;

        let exec = IoExecutor::with_threads(1).unwrap();
        let sink = Sink::new();
        let chan = WritableChannel::with_executor(sink.source(), exec.clone());
        let mut fut = chan.write(&source::iter(chunks(2, 2)), Constant::single());
        assert!(futures::executor::block_on(&mut fut).is_ok());
        assert!(FusedFuture::is_terminated(&fut));
        assert!(futures::FutureExt::now_or_never(&mut fut).is_none());
        exec.shutdown();
    }
}
