//! One-shot broadcast latch.
//!
//! A [`Latch`] is resolved exactly once with a small value and may be
//! awaited by any number of tasks. It backs the waiter handle and the exit
//! handle of every registration, and the start confirmation of launched
//! tasks.
//!
//! # Cancel Safety
//!
//! Dropping a pending [`Fired`] removes its waker slot, so cancelled
//! waiters never accumulate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use slab::Slab;
use smallvec::SmallVec;

#[derive(Debug)]
pub(crate) struct Latch {
    state: Mutex<LatchState>,
}

#[derive(Debug)]
struct LatchState {
    value: Option<usize>,
    wakers: Slab<Waker>,
}

impl Latch {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LatchState {
                value: None,
                wakers: Slab::new(),
            }),
        })
    }

    /// Resolves the latch with `value`. Returns false if it was already
    /// resolved; the first value is kept.
    pub(crate) fn fire(&self, value: usize) -> bool {
        let wakers: SmallVec<[Waker; 4]> = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value);
            state.wakers.drain().collect()
        };
        // Release lock before waking.
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub(crate) fn value(&self) -> Option<usize> {
        self.state.lock().value
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.value().is_some()
    }

    pub(crate) fn fired(self: &Arc<Self>) -> Fired {
        Fired {
            latch: Arc::clone(self),
            key: None,
        }
    }

    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.state.lock().wakers.len()
    }
}

/// Future returned by [`Latch::fired`].
#[derive(Debug)]
pub(crate) struct Fired {
    latch: Arc<Latch>,
    key: Option<usize>,
}

impl Future for Fired {
    type Output = usize;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        let this = &mut *self;
        let mut state = this.latch.state.lock();
        if let Some(value) = state.value {
            // `fire` drained the slab; the key is stale.
            this.key = None;
            return Poll::Ready(value);
        }
        match this.key {
            Some(key) => {
                if let Some(slot) = state.wakers.get_mut(key) {
                    if !slot.will_wake(cx.waker()) {
                        slot.clone_from(cx.waker());
                    }
                }
            }
            None => {
                this.key = Some(state.wakers.insert(cx.waker().clone()));
            }
        }
        Poll::Pending
    }
}

impl Drop for Fired {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut state = self.latch.state.lock();
            if state.value.is_none() && state.wakers.contains(key) {
                state.wakers.remove(key);
            }
        }
    }
}
