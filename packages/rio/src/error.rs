//! Error types.

use std::io;
use thiserror::Error;


/// Result type with [`Error`](enum@Error) as the error.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal error of a read or write transfer, or a configuration error
///
/// A failed transfer delivers exactly one of these, either through
/// [`Subscriber::on_error`](crate::Subscriber::on_error) or as the output of a
/// [`WriteFuture`](crate::WriteFuture).
#[derive(Error, Debug)]
pub enum Error {
    /// The channel source failed to open a channel
    #[error("failed to open channel")]
    Open(#[source] io::Error),
    /// A read, write or close call on an open channel failed
    #[error("channel i/o failed")]
    Io(#[from] io::Error),
    /// A subscriber requested a non-positive number of items
    #[error("requested {0} items, demand must be positive")]
    NonPositiveDemand(i64),
    /// The subscriber failed to process a delivered buffer
    #[error("subscriber failed to process buffer")]
    Downstream(#[source] anyhow::Error),
    /// The upstream publisher signalled an error
    #[error("upstream publisher failed")]
    Upstream(#[source] anyhow::Error),
    /// A write greed was constructed with an invalid amount and shift
    #[error("invalid write greed: amount {amount}, shift {shift} (need 0 <= shift < amount)")]
    InvalidGreed {
        /// Requested amount
        amount: i64,
        /// Requested shift
        shift: i64,
    },
    /// A job was submitted to an executor which was shut down
    #[error("i/o executor is shut down")]
    ExecutorShutdown,
    /// A channel task panicked
    #[error("channel task panicked: {0}")]
    Panicked(String),
    /// The transfer was dropped before it produced a result
    #[error("transfer was abandoned before resolving")]
    Abandoned,
}

impl Error {
    /// Wrap an arbitrary upstream failure.
    pub fn upstream<E>(cause: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Error::Upstream(cause.into())
    }
}

// extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
