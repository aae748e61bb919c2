//! Cooperative cancellation shared between a caller and its operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::Waker;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// A one-shot cancellation signal.
///
/// Clones share the same signal. Triggering it completes every pending
/// [`Operation`](crate::Operation) created with the token as canceled; an
/// operation whose remote already completed keeps its outcome.
///
/// One token may be shared by any number of operations. Each operation
/// holds at most one waker registration, dropped once it has an outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    canceled: AtomicBool,
    next_key: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that cancels itself once `timeout` elapses.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn after(timeout: Duration) -> Self {
        let token = Self::new();
        token.cancel_after(timeout);
        token
    }

    /// Trigger this token once `timeout` elapses, unless it fires earlier.
    /// Replaces any timer set before.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cancel_after(&self, timeout: Duration) {
        let token = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        });
        if let Some(previous) = self.inner.timer.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Stop the timer, if any, without triggering the token.
    pub fn disarm(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }

    /// Trigger the token. Idempotent.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.disarm();
        let wakers = std::mem::take(&mut *self.inner.wakers.lock());
        for (_, waker) in wakers {
            waker.wake();
        }
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Ask to be woken on cancellation. `key` is the registration returned
    /// by an earlier call, whose waker is then replaced in place.
    ///
    /// Returns `None` (and keeps nothing) if the token has already fired.
    pub(crate) fn register(&self, key: Option<u64>, waker: &Waker) -> Option<u64> {
        let mut wakers = self.inner.wakers.lock();
        // Checked under the lock so a concurrent `cancel` cannot miss us.
        if self.is_canceled() {
            return None;
        }
        if let Some(key) = key
            && let Some((_, slot)) = wakers.iter_mut().find(|(k, _)| *k == key)
        {
            if !slot.will_wake(waker) {
                slot.clone_from(waker);
            }
            return Some(key);
        }
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        wakers.push((key, waker.clone()));
        Some(key)
    }

    /// Drop a registration. Unknown keys are ignored.
    pub(crate) fn deregister(&self, key: u64) {
        let mut wakers = self.inner.wakers.lock();
        if let Some(i) = wakers.iter().position(|(k, _)| *k == key) {
            wakers.swap_remove(i);
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.inner.wakers.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self) -> bool {
        self.inner.timer.lock().is_some()
    }
}
