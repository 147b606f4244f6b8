//! In-memory publishers.

use crate::{
    error::{panic_message, Error},
    flow::{NoopSubscription, Publisher, Subscriber, Subscription},
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{
            AtomicBool,
            AtomicI64,
            AtomicUsize,
            Ordering::SeqCst,
        },
        Arc,
        Mutex,
    },
};


/// Publisher of the items of an iterator
///
/// Respects demand: items are pulled from the iterator only as they are requested, on the
/// thread which requested them. Requests made from within
/// [`on_next`](Subscriber::on_next) are queued rather than recursed into. The iterator can be
/// consumed once; later subscribers fail with [`Error::Upstream`].
pub fn iter<I>(items: I) -> Iter<I::IntoIter>
where
    I: IntoIterator,
{
    Iter(Mutex::new(Some(items.into_iter())))
}

/// See [`iter`]
pub struct Iter<I>(Mutex<Option<I>>);

impl<I> Publisher<I::Item> for Iter<I>
where
    I: Iterator + Send + 'static,
    I::Item: 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<I::Item>>) {
        let Some(items) = self.0.lock().unwrap().take() else {
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(Error::upstream(anyhow::anyhow!(
                "iterator publisher already subscribed to",
            )));
            return;
        };
        let subscription = Arc::new(IterSubscription {
            items: Mutex::new(items),
            subscriber: Mutex::new(Some(Arc::clone(&subscriber))),
            demand: AtomicI64::new(0),
            wip: AtomicUsize::new(0),
            rejected: Mutex::new(None),
            done: AtomicBool::new(false),
        });
        subscriber.on_subscribe(subscription);
    }
}

struct IterSubscription<I: Iterator> {
    items: Mutex<I>,
    // taken on termination
    subscriber: Mutex<Option<Arc<dyn Subscriber<I::Item>>>>,
    // i64::MAX means unbounded
    demand: AtomicI64,
    // number of drain requests not yet seen by the draining thread
    wip: AtomicUsize,
    // a non-positive request, to be reported by the draining thread
    rejected: Mutex<Option<i64>>,
    done: AtomicBool,
}

impl<I> IterSubscription<I>
where
    I: Iterator,
{
    fn terminate(&self) -> Option<Arc<dyn Subscriber<I::Item>>> {
        if self.done.swap(true, SeqCst) {
            return None;
        }
        self.subscriber.lock().unwrap().take()
    }

    // enter the drain loop, unless another call is already in it.
    fn drain(&self) {
        if self.wip.fetch_add(1, SeqCst) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            self.emit();
            missed = self.wip.fetch_sub(missed, SeqCst) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    // deliver items while there is demand.
    fn emit(&self) {
        while !self.done.load(SeqCst) {
            if let Some(n) = self.rejected.lock().unwrap().take() {
                if let Some(subscriber) = self.terminate() {
                    subscriber.on_error(Error::NonPositiveDemand(n));
                }
                return;
            }
            if self.demand.load(SeqCst) == 0 {
                return;
            }
            let next = self.items.lock().unwrap().next();
            let Some(item) = next else {
                if let Some(subscriber) = self.terminate() {
                    subscriber.on_complete();
                }
                return;
            };
            let _ = self.demand.fetch_update(SeqCst, SeqCst, |d| {
                Some(if d == i64::MAX { d } else { d - 1 })
            });
            let subscriber = self.subscriber.lock().unwrap().clone();
            let Some(subscriber) = subscriber else { return };
            let delivered = catch_unwind(AssertUnwindSafe(|| subscriber.on_next(item)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!(
                    "subscriber panicked: {}", panic_message(&*payload),
                )));
            if let Err(e) = delivered {
                if let Some(subscriber) = self.terminate() {
                    subscriber.on_error(Error::Downstream(e));
                }
                return;
            }
        }
    }
}

impl<I> Subscription for IterSubscription<I>
where
    I: Iterator + Send,
{
    fn request(&self, n: i64) {
        if self.done.load(SeqCst) {
            return;
        }
        if n <= 0 {
            self.rejected.lock().unwrap().get_or_insert(n);
        } else {
            let _ = self.demand.fetch_update(SeqCst, SeqCst, |d| Some(d.saturating_add(n)));
        }
        self.drain();
    }

    fn cancel(&self) {
        if self.terminate().is_some() {
            trace!("iterator subscription cancelled");
        }
    }
}
