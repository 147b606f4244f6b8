//! Low-level concurrency utility.

use std::{
    mem::MaybeUninit,
    sync::atomic::{
        Ordering::{Acquire, AcqRel},
        AtomicBool,
    },
};

/// Like an atomic `Option<T>` that can be `take`n once.
///
/// Used as a single-assignment slot: whichever thread takes the value first owns it, every later
/// attempt observes `None`.
pub(crate) struct AtomicTake<T> {
    // val is initialized if is_some is true. the thread that transitions it from true to false
    // claims the right to read it and take ownership of it.
    is_some: AtomicBool,
    val: MaybeUninit<T>,
}

// safety: the value is only ever moved out by the single thread that wins the swap, so sharing
// the cell only requires that T may be sent to that thread.
unsafe impl<T: Send> Sync for AtomicTake<T> {}

impl<T> AtomicTake<T> {
    /// Construct with a value.
    pub(crate) const fn some(val: T) -> Self {
        AtomicTake {
            is_some: AtomicBool::new(true),
            val: MaybeUninit::new(val),
        }
    }

    /// Construct without a value.
    #[cfg(test)]
    pub(crate) const fn none() -> Self {
        AtomicTake {
            is_some: AtomicBool::new(false),
            val: MaybeUninit::uninit(),
        }
    }

    /// Try to atomically take the value.
    pub(crate) fn take(&self) -> Option<T> {
        if self.is_some.swap(false, AcqRel) {
            Some(unsafe { self.val.as_ptr().read() })
        } else {
            None
        }
    }

    /// Whether the value has already been taken (or was never present).
    pub(crate) fn is_taken(&self) -> bool {
        !self.is_some.load(Acquire)
    }
}

impl<T> Drop for AtomicTake<T> {
    fn drop(&mut self) {
        // make sure the value gets dropped if not yet taken
        drop(self.take());
    }
}
