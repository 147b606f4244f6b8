//! Pull-based stream contract between publishers and subscribers.
//!
//! A [`Publisher`] hands each [`Subscriber`] a [`Subscription`] through
//! [`on_subscribe`](Subscriber::on_subscribe). The subscriber then authorizes items with
//! [`request`](Subscription::request); the publisher delivers at most that many items through
//! [`on_next`](Subscriber::on_next), and finally exactly one of
//! [`on_complete`](Subscriber::on_complete) or [`on_error`](Subscriber::on_error), unless the
//! subscriber cancels first.
//!
//! Signals to a single subscriber are never concurrent, but they may arrive on different
//! threads, and a subscriber may call back into its subscription from within a signal.

use crate::error::Error;
use std::sync::Arc;


/// Source of a stream of items
pub trait Publisher<T> {
    /// Subscribe to the stream
    ///
    /// May be called several times; each call starts an independent stream.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// Consumer of a stream of items
pub trait Subscriber<T>: Send + Sync {
    /// Receive the subscription; no other signal arrives before this one
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Receive the next item
    ///
    /// Returning an error terminates the stream: the publisher releases its resources and
    /// delivers the failure back through [`on_error`](Self::on_error) as
    /// [`Error::Downstream`].
    fn on_next(&self, item: T) -> anyhow::Result<()>;

    /// Receive the terminal error
    fn on_error(&self, error: Error);

    /// Receive the terminal completion
    fn on_complete(&self);
}

/// Link between one publisher and one subscriber
pub trait Subscription: Send + Sync {
    /// Authorize the publisher to deliver up to `n` more items
    ///
    /// A non-positive `n` is a protocol violation which terminates the stream with
    /// [`Error::NonPositiveDemand`].
    fn request(&self, n: i64);

    /// Stop the stream, releasing its resources
    ///
    /// No terminal signal is delivered after a cancel. Cancelling a terminated stream does
    /// nothing.
    fn cancel(&self);
}

/// Subscription which ignores all calls
///
/// Handed to subscribers of streams which fail before they start.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: i64) {}

    fn cancel(&self) {}
}

impl<T, P> Publisher<T> for Arc<P>
where
    P: Publisher<T> + ?Sized,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber)
    }
}
