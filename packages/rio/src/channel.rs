//! Blocking byte channels and their sources.

use bytes::BytesMut;
use std::io;


/// Open, sequential byte channel
pub trait Channel: Send {
    /// Close the channel, releasing its resources
    ///
    /// The pipelines call this exactly once per channel.
    fn close(&mut self) -> io::Result<()>;
}

/// Channel which can be read from
pub trait ReadChannel: Channel {
    /// Read into the spare capacity of `buf`, appending to its contents
    ///
    /// Returns the number of bytes read, or `None` once the end of the stream is reached. May
    /// block.
    fn read(&mut self, buf: &mut BytesMut) -> io::Result<Option<usize>>;
}

/// Channel which can be written to
pub trait WriteChannel: Channel {
    /// Write some prefix of `buf`, returning how many bytes were written
    ///
    /// May write fewer bytes than offered. May block.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<C: ReadChannel + ?Sized> ReadChannel for Box<C> {
    fn read(&mut self, buf: &mut BytesMut) -> io::Result<Option<usize>> {
        (**self).read(buf)
    }
}

impl<C: WriteChannel + ?Sized> WriteChannel for Box<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

/// Lazily opens a channel
///
/// Opened once per subscription attempt, so a publisher backed by a source can be subscribed
/// to again after a failure.
pub trait ChannelSource<C>: Send + Sync {
    /// Open a new channel
    fn open(&self) -> io::Result<C>;
}

impl<C, F> ChannelSource<C> for F
where
    F: Fn() -> io::Result<C> + Send + Sync,
{
    fn open(&self) -> io::Result<C> {
        self()
    }
}


// ==== close guard ====


/// Exclusive owner of an open channel.
///
/// Closes the channel at most once: explicitly via `close`/`close_quietly`, or best-effort when
/// dropped while still open.
pub(crate) struct OpenChannel<C: Channel + ?Sized> {
    chan: Option<Box<C>>,
}

impl<C: Channel + ?Sized> OpenChannel<C> {
    pub(crate) fn new(chan: Box<C>) -> Self {
        OpenChannel { chan: Some(chan) }
    }

    /// The channel, unless already closed.
    pub(crate) fn get(&mut self) -> Option<&mut C> {
        self.chan.as_deref_mut()
    }

    /// Close the channel. Closing an already closed channel succeeds.
    pub(crate) fn close(&mut self) -> io::Result<()> {
        match self.chan.take() {
            Some(mut chan) => chan.close(),
            None => Ok(()),
        }
    }

    /// Close the channel, logging rather than returning a failure.
    pub(crate) fn close_quietly(&mut self, context: &str) {
        if let Err(e) = self.close() {
            warn!(%e, %context, "failed to close channel");
        }
    }
}

impl<C: Channel + ?Sized> Drop for OpenChannel<C> {
    fn drop(&mut self) {
        if self.chan.is_some() {
            trace!("closing channel on drop");
            self.close_quietly("dropped while open");
        }
    }
}
