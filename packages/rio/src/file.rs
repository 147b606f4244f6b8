//! Files as publishers and write targets.

use crate::{
    buffers::Buffers,
    executor::IoExecutor,
    flow::Publisher,
    greed::WriteGreed,
    read::{ChannelPublisher, ReadableChannel},
    stream::{ReaderChannel, WriterChannel},
    write::{WritableChannel, WriteFuture},
};
use bytes::Bytes;
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};


/// File at a path, read and written through the pipelines
///
/// The file is opened anew for every read subscription and every write.
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
    executor: IoExecutor,
}

impl File {
    /// File at `path`, using the [shared](IoExecutor::shared) executor
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_executor(path, IoExecutor::shared())
    }

    /// File at `path`, running blocking operations on `executor`
    pub fn with_executor<P: Into<PathBuf>>(path: P, executor: IoExecutor) -> Self {
        File { path: path.into(), executor }
    }

    /// Path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publisher of the file's content, read into buffers allocated by `buffers`
    ///
    /// A missing file fails the subscription with [`Error::Open`](crate::Error::Open).
    pub fn content<B>(&self, buffers: B) -> ChannelPublisher
    where
        B: Buffers + 'static,
    {
        let path = self.path.clone();
        let source = move || fs::File::open(&path).map(ReaderChannel::new);
        ReadableChannel::with_executor(source, self.executor.clone()).read(buffers)
    }

    /// Write everything `publisher` produces into the file
    ///
    /// The file is created if missing. An existing file is overwritten from its start but not
    /// truncated. See [`WritableChannel::write`].
    pub fn write<P, G>(&self, publisher: &P, greed: G) -> WriteFuture
    where
        P: Publisher<Bytes> + ?Sized,
        G: WriteGreed + 'static,
    {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        self.write_with(publisher, greed, options)
    }

    /// Write everything `publisher` produces into the file opened with `options`
    pub fn write_with<P, G>(&self, publisher: &P, greed: G, options: OpenOptions) -> WriteFuture
    where
        P: Publisher<Bytes> + ?Sized,
        G: WriteGreed + 'static,
    {
        let path = self.path.clone();
        let source = move || options.open(&path).map(WriterChannel::new);
        WritableChannel::with_executor(source, self.executor.clone()).write(publisher, greed)
    }
}
