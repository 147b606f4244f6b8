//! Adapters between `std::io` streams and channels.

use crate::{
    buffers::{Buffers, Standard},
    channel::{Channel, ReadChannel, WriteChannel},
    executor::IoExecutor,
    flow::{Publisher, Subscriber},
    greed::WriteGreed,
    read::{ChannelPublisher, ReadableChannel},
    write::{WritableChannel, WriteFuture},
};
use bytes::{Bytes, BytesMut};
use std::{
    io::{self, Read, Write},
    sync::{Arc, Mutex},
};


fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel is closed")
}


/// Read channel over a [`Read`]
///
/// Closing the channel drops the reader.
#[derive(Debug)]
pub struct ReaderChannel<R>(Option<R>);

impl<R> ReaderChannel<R> {
    /// Channel reading from `reader`
    pub fn new(reader: R) -> Self {
        ReaderChannel(Some(reader))
    }
}

impl<R: Read + Send> Channel for ReaderChannel<R> {
    fn close(&mut self) -> io::Result<()> {
        self.0.take();
        Ok(())
    }
}

impl<R: Read + Send> ReadChannel for ReaderChannel<R> {
    fn read(&mut self, buf: &mut BytesMut) -> io::Result<Option<usize>> {
        let reader = self.0.as_mut().ok_or_else(closed)?;
        let start = buf.len();
        if buf.capacity() == start {
            buf.reserve(Standard::default().size());
        }
        // expose the spare capacity as initialized bytes, then cut back to what was read
        buf.resize(buf.capacity(), 0);
        let read = loop {
            match reader.read(&mut buf[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                read => break read,
            }
        };
        match read {
            Ok(0) => {
                buf.truncate(start);
                Ok(None)
            }
            Ok(n) => {
                buf.truncate(start + n);
                Ok(Some(n))
            }
            Err(e) => {
                buf.truncate(start);
                Err(e)
            }
        }
    }
}

/// Write channel over a [`Write`]
///
/// Closing the channel flushes and drops the writer.
#[derive(Debug)]
pub struct WriterChannel<W>(Option<W>);

impl<W> WriterChannel<W> {
    /// Channel writing into `writer`
    pub fn new(writer: W) -> Self {
        WriterChannel(Some(writer))
    }
}

impl<W: Write + Send> Channel for WriterChannel<W> {
    fn close(&mut self) -> io::Result<()> {
        match self.0.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write + Send> WriteChannel for WriterChannel<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self.0.as_mut().ok_or_else(closed)?;
        loop {
            match writer.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                written => return written,
            }
        }
    }
}


// ==== one-shot streams ====


// hands out the stream on the first open, fails every later one.
fn once<T, C>(stream: T, wrap: fn(T) -> C) -> impl Fn() -> io::Result<C> + Send + Sync + 'static
where
    T: Send + 'static,
    C: 'static,
{
    let slot = Mutex::new(Some(stream));
    move || {
        slot.lock().unwrap()
            .take()
            .map(wrap)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stream was already consumed"))
    }
}

/// Publisher of the content of a [`Read`]
///
/// The reader is consumed by the first subscription; later subscriptions fail with
/// [`Error::Open`](crate::Error::Open).
#[derive(Clone)]
pub struct ReactiveReader(ChannelPublisher);

impl ReactiveReader {
    /// Read `reader` into [default](Standard::default) sized buffers on the shared executor
    pub fn new<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::with_executor(reader, Standard::default(), IoExecutor::shared())
    }

    /// Read `reader` into buffers allocated by `buffers`, running reads on `executor`
    pub fn with_executor<R, B>(reader: R, buffers: B, executor: IoExecutor) -> Self
    where
        R: Read + Send + 'static,
        B: Buffers + 'static,
    {
        let source = once(reader, ReaderChannel::new);
        ReactiveReader(ReadableChannel::with_executor(source, executor).read(buffers))
    }
}

impl Publisher<Bytes> for ReactiveReader {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Bytes>>) {
        self.0.subscribe(subscriber)
    }
}

/// Target for writing a publisher into a [`Write`]
///
/// The writer is consumed by the first write; later writes fail with
/// [`Error::Open`](crate::Error::Open). The writer is flushed when the write completes.
#[derive(Clone)]
pub struct ReactiveWriter(WritableChannel);

impl ReactiveWriter {
    /// Write into `writer` on the shared executor
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::with_executor(writer, IoExecutor::shared())
    }

    /// Write into `writer`, running writes on `executor`
    pub fn with_executor<W>(writer: W, executor: IoExecutor) -> Self
    where
        W: Write + Send + 'static,
    {
        ReactiveWriter(WritableChannel::with_executor(once(writer, WriterChannel::new), executor))
    }

    /// Write everything `publisher` produces, see [`WritableChannel::write`]
    pub fn write<P, G>(&self, publisher: &P, greed: G) -> WriteFuture
    where
        P: Publisher<Bytes> + ?Sized,
        G: WriteGreed + 'static,
    {
        self.0.write(publisher, greed)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        greed::Constant,
        read::tests::{next_event, Event, Probe},
        source,
    };
    use std::io::Cursor;

    // reader which is interrupted before every successful read.
    struct Flaky<R> {
        inner: R,
        interrupt: bool,
    }

    impl<R: Read> Read for Flaky<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::ErrorKind::Interrupted.into());
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn reader_channel_appends_into_spare_capacity() {
        let flaky = Flaky { inner: Cursor::new(b"hello world"), interrupt: false };
        let mut chan = ReaderChannel::new(flaky);
        let mut buf = BytesMut::with_capacity(4);
        assert_eq!(chan.read(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf[..], b"hell");
        // full buffers grow rather than reporting end of stream
        assert_eq!(chan.read(&mut buf).unwrap(), Some(7));
        assert_eq!(&buf[..], b"hello world");
        assert_eq!(chan.read(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"hello world");
        chan.close().unwrap();
        assert_eq!(chan.read(&mut buf).unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn writer_channel_flushes_on_close() {
        let mut chan = WriterChannel::new(io::BufWriter::new(Vec::new()));
        assert_eq!(chan.write(b"abc").unwrap(), 3);
        chan.close().unwrap();
        assert!(chan.write(b"d").is_err());
        assert!(chan.close().is_ok());
    }

    #[test]
    fn reader_is_one_shot() {
        let exec = IoExecutor::with_threads(1).unwrap();
        let reader =
            ReactiveReader::with_executor(Cursor::new(vec![7u8; 10]), Standard::K1, exec.clone());
        let (probe, recv) = Probe::new(Some(i64::MAX));
        reader.subscribe(probe);
        assert!(matches!(next_event(&recv), Event::Subscribed));
        match next_event(&recv) {
            Event::Next(item) => assert_eq!(&item[..], [7; 10]),
            event => panic!("expected item, got {:?}", event),
        }
        assert!(matches!(next_event(&recv), Event::Complete));

        let (probe, recv) = Probe::new(Some(1));
        reader.subscribe(probe);
        assert!(matches!(next_event(&recv), Event::Subscribed));
        assert!(matches!(next_event(&recv), Event::Error(Error::Open(_))));
        exec.shutdown();
    }

    #[test]
    fn writer_round_trip() {
        // writer which forwards to a shared vec, so the test can see through the channel
        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);

        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                // accept at most 5 bytes per call
                let n = buf.len().min(5);
                self.0.lock().unwrap().extend_from_slice(&buf[..n]);
                Ok(n)
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let exec = IoExecutor::with_threads(1).unwrap();
        let out = Shared::default();
        let writer = ReactiveWriter::with_executor(out.clone(), exec.clone());
        let data = (0..20u8).map(|i| Bytes::from(vec![i; 12])).collect::<Vec<_>>();
        writer.write(&source::iter(data.clone()), Constant::new(4, 2).unwrap()).block().unwrap();
        assert_eq!(*out.0.lock().unwrap(), data.concat());

        let again = writer.write(&source::iter(data), Constant::single()).block();
        assert!(matches!(again, Err(Error::Open(_))));
        exec.shutdown();
    }
}
