//! Demand-driven reads and writes over blocking byte channels.
//!
//! A [`ReadableChannel`] turns a blocking channel into a [`Publisher`] of buffers, reading
//! only as fast as its subscriber requests. A [`WritableChannel`] drains a publisher of
//! buffers into a blocking channel, requesting buffers as its [`WriteGreed`] dictates, and
//! resolves a [`WriteFuture`] once everything was written. Blocking calls run on an
//! [`IoExecutor`], and at most one thread touches a given channel at a time.
//!
//! [`File`](file::File) and the [`stream`] adapters wire files and `std::io` streams into the
//! pipelines.

#[macro_use]
extern crate tracing;

pub extern crate bytes;

mod util;
mod flight;
mod read;
mod write;

pub mod error;
pub mod flow;
pub mod greed;
pub mod buffers;
pub mod channel;
pub mod executor;
pub mod file;
pub mod stream;
pub mod source;

pub use crate::{
    buffers::{Buffers, Standard},
    channel::{ChannelSource, ReadChannel, WriteChannel},
    error::{Error, Result},
    executor::{ExecutorConfig, IoExecutor},
    flow::{NoopSubscription, Publisher, Subscriber, Subscription},
    greed::{Adaptive, Constant, WriteGreed},
    read::{ChannelPublisher, ReadableChannel},
    write::{WritableChannel, WriteFuture},
};
