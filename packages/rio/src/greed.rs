//! Demand policies for the write path.
//!
//! A [`WriteGreed`] decides how many buffers the write pipeline requests from its upstream
//! publisher, and when. Buffers are requested in batches of `amount`; once all but `shift`
//! buffers of the current batch have arrived, the next batch is requested, so that transfer
//! and I/O latency overlap.

use crate::{
    error::{Error, Result},
    flow::Subscription,
};
use std::{
    env,
    sync::atomic::{
        Ordering::{Acquire, AcqRel, Release},
        AtomicBool,
        AtomicI64,
    },
};


/// Environment variable overriding the amount of [`Constant::system`].
pub const AMOUNT_ENV: &str = "RIO_WRITE_GREED_AMOUNT";
/// Environment variable overriding the shift of [`Constant::system`].
pub const SHIFT_ENV: &str = "RIO_WRITE_GREED_SHIFT";

const SYSTEM_AMOUNT: i64 = 3;
const SYSTEM_SHIFT: i64 = 1;

/// Default maximum shift an [`Adaptive`] greed grows to.
pub const DEFAULT_SHIFT_CAP: i64 = 3;
/// Default amount at or below which an [`Adaptive`] greed stops shrinking.
pub const DEFAULT_AMOUNT_FLOOR: i64 = 6;


/// Demand policy of a write pipeline
///
/// The write pipeline calls [`init`](Self::init) once when it subscribes,
/// [`received`](Self::received) once per buffer arriving from upstream (before the buffer is
/// queued), and [`processed`](Self::processed) once per buffer after it has been written.
/// Calls to `received` are never concurrent with each other; `processed` may run concurrently
/// with `received` on another thread.
pub trait WriteGreed: Send + Sync {
    /// Issue the initial request
    fn init(&self, sub: &dyn Subscription);

    /// Account for a buffer received from upstream, possibly requesting more
    fn received(&self, sub: &dyn Subscription);

    /// Account for a buffer having been written
    fn processed(&self, sub: &dyn Subscription) {
        let _ = sub;
    }

    /// Convert into a self-tuning policy, if this policy has one
    fn adaptive(self: Box<Self>) -> Box<dyn WriteGreed>;
}

// check 0 <= shift < amount.
fn validate(amount: i64, shift: i64) -> Result<()> {
    if amount < 1 || shift < 0 || shift >= amount {
        Err(Error::InvalidGreed { amount, shift })
    } else {
        Ok(())
    }
}

// read an i64 from the environment, falling back to a default.
fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(s) => s.trim().parse().unwrap_or_else(|_| {
            warn!(%key, value = %s, "ignoring unparsable write greed variable");
            default
        }),
        Err(_) => default,
    }
}


// ==== constant ====


/// Greed which always requests the same amount
#[derive(Debug)]
pub struct Constant {
    amount: i64,
    shift: i64,
    // position within the current batch. moves back by `amount` each time a batch is
    // requested, so it runs from -shift up to amount - shift.
    cnt: AtomicI64,
}

impl Constant {
    /// Construct with a batch size and a look-ahead shift
    ///
    /// Errors unless `0 <= shift < amount`.
    pub fn new(amount: i64, shift: i64) -> Result<Self> {
        validate(amount, shift)?;
        Ok(Constant { amount, shift, cnt: AtomicI64::new(0) })
    }

    /// Request one buffer at a time
    pub fn single() -> Self {
        Constant { amount: 1, shift: 0, cnt: AtomicI64::new(0) }
    }

    /// Construct from the `RIO_WRITE_GREED_AMOUNT` and `RIO_WRITE_GREED_SHIFT` environment
    /// variables, defaulting to an amount of 3 and a shift of 1
    pub fn system() -> Result<Self> {
        Self::new(env_i64(AMOUNT_ENV, SYSTEM_AMOUNT), env_i64(SHIFT_ENV, SYSTEM_SHIFT))
    }

    /// Batch size
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Look-ahead shift
    pub fn shift(&self) -> i64 {
        self.shift
    }

    /// Adaptive greed starting from this greed's parameters
    pub fn to_adaptive(&self) -> Adaptive {
        Adaptive::starting_at(self.amount, self.shift, AdaptiveTuning::default())
    }
}

impl WriteGreed for Constant {
    fn init(&self, sub: &dyn Subscription) {
        sub.request(self.amount);
    }

    fn received(&self, sub: &dyn Subscription) {
        let pos = self.cnt.fetch_add(1, AcqRel) + 1;
        if pos == self.amount - self.shift {
            // move back before requesting, the request may re-enter
            self.cnt.fetch_sub(self.amount, AcqRel);
            sub.request(self.amount);
        }
    }

    fn adaptive(self: Box<Self>) -> Box<dyn WriteGreed> {
        Box::new(self.to_adaptive())
    }
}


// ==== adaptive ====


/// Thresholds of an [`Adaptive`] greed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdaptiveTuning {
    /// Growing never raises the shift above this
    pub shift_cap: i64,
    /// Shrinking only happens while the amount is above this
    pub amount_floor: i64,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        AdaptiveTuning {
            shift_cap: DEFAULT_SHIFT_CAP,
            amount_floor: DEFAULT_AMOUNT_FLOOR,
        }
    }
}

/// Greed which tunes its amount and shift to the writer's backlog
///
/// Each time a batch is requested, the backlog of received but not yet written buffers is
/// inspected. A backlog below the shift means the writer is starved: the amount doubles and
/// the shift grows by one, up to the shift cap. A backlog above the amount means the writer is
/// flooded: if the amount is above the amount floor, it halves and the shift shrinks by one,
/// down to one.
#[derive(Debug)]
pub struct Adaptive {
    amount: AtomicI64,
    shift: AtomicI64,
    cnt: AtomicI64,
    backlog: AtomicI64,
    // held while amount and shift are being rewritten.
    adjusting: AtomicBool,
    tuning: AdaptiveTuning,
}

impl Adaptive {
    /// Construct with a starting batch size and shift
    ///
    /// Errors unless `0 <= shift < amount`.
    pub fn new(amount: i64, shift: i64) -> Result<Self> {
        Self::with_tuning(amount, shift, AdaptiveTuning::default())
    }

    /// Construct with a starting batch size and shift and custom thresholds
    pub fn with_tuning(amount: i64, shift: i64, tuning: AdaptiveTuning) -> Result<Self> {
        validate(amount, shift)?;
        Ok(Self::starting_at(amount, shift, tuning))
    }

    // construct from already validated parameters.
    fn starting_at(amount: i64, shift: i64, tuning: AdaptiveTuning) -> Self {
        Adaptive {
            amount: AtomicI64::new(amount),
            shift: AtomicI64::new(shift),
            cnt: AtomicI64::new(0),
            backlog: AtomicI64::new(0),
            adjusting: AtomicBool::new(false),
            tuning,
        }
    }

    /// Current batch size
    pub fn amount(&self) -> i64 {
        self.amount.load(Acquire)
    }

    /// Current look-ahead shift
    pub fn shift(&self) -> i64 {
        self.shift.load(Acquire)
    }

    /// Buffers received but not yet processed
    pub fn backlog(&self) -> i64 {
        self.backlog.load(Acquire)
    }

    // rewrite amount and shift according to the backlog, return the new amount.
    //
    // panics if another adjustment is in progress.
    fn adjust(&self, mut amount: i64, mut shift: i64) -> i64 {
        let busy = self.adjusting.swap(true, AcqRel);
        assert!(!busy, "concurrent write greed adjustment");

        let backlog = self.backlog.load(Acquire);
        if backlog < shift {
            amount = amount.saturating_mul(2);
            if shift < self.tuning.shift_cap {
                shift += 1;
            }
        } else if backlog > amount && amount > self.tuning.amount_floor {
            amount /= 2;
            if shift > 1 {
                shift -= 1;
            }
            shift = shift.min(amount - 1);
        }
        self.amount.store(amount, Release);
        self.shift.store(shift, Release);

        self.adjusting.store(false, Release);
        amount
    }
}

impl WriteGreed for Adaptive {
    fn init(&self, sub: &dyn Subscription) {
        sub.request(self.amount());
    }

    fn received(&self, sub: &dyn Subscription) {
        let pos = self.cnt.fetch_add(1, AcqRel) + 1;
        let amount = self.amount();
        let next = if pos == amount - self.shift() {
            let next = self.adjust(amount, self.shift());
            self.cnt.fetch_sub(amount, AcqRel);
            Some(next)
        } else {
            None
        };
        // counted only after the adjustment looked at it
        self.backlog.fetch_add(1, AcqRel);
        if let Some(n) = next {
            sub.request(n);
        }
    }

    fn processed(&self, _sub: &dyn Subscription) {
        let prev = self.backlog.fetch_sub(1, AcqRel);
        debug_assert!(prev > 0, "write greed backlog underflow");
    }

    fn adaptive(self: Box<Self>) -> Box<dyn WriteGreed> {
        self
    }
}
