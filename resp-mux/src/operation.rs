//! Caller-facing operations completed by an external producer.
//!
//! [`OperationPool::create`] returns a pair: an [`Operation`] the caller
//! awaits, and a [`Remote`] the producer uses to set the outcome exactly
//! once. Both handles point at one completion slot; when the last of the
//! two drops, the slot goes back to the pool's free list, so a steady
//! create/complete/await cycle does not allocate.
//!
//! ```
//! use resp_mux::{OperationPool, Outcome};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let pool: OperationPool<u32, ()> = OperationPool::new(8);
//! let (op, remote) = pool.create(None);
//! remote.mark_sent();
//! assert!(remote.try_complete(Outcome::Ok(7)));
//! assert!(!remote.try_complete(Outcome::Ok(8)));
//! assert_eq!(op.await, Ok(7));
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::OperationError;

/// What a producer hands to [`Remote::try_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Ok(T),
    Fault(E),
    Canceled,
}

impl<T, E> Outcome<T, E> {
    fn into_result(self) -> Result<T, OperationError<E>> {
        match self {
            Outcome::Ok(v) => Ok(v),
            Outcome::Fault(e) => Err(OperationError::Fault(e)),
            Outcome::Canceled => Err(OperationError::Canceled),
        }
    }
}

enum Completion<T, E> {
    Pending,
    Ready(Result<T, OperationError<E>>),
    Taken,
}

struct State<T, E> {
    completion: Completion<T, E>,
    waker: Option<Waker>,
    token: Option<CancelToken>,
    /// Our waker registration with `token`.
    registration: Option<u64>,
    /// The token's timer was started for this operation alone.
    owns_timer: bool,
}

impl<T, E> State<T, E> {
    const fn empty() -> Self {
        Self {
            completion: Completion::Pending,
            waker: None,
            token: None,
            registration: None,
            owns_timer: false,
        }
    }

    fn token_fired(&self) -> bool {
        self.token.as_ref().is_some_and(CancelToken::is_canceled)
    }

    /// Let go of everything held on the token once no wakeup is needed.
    fn retire(&mut self) {
        let Some(token) = &self.token else {
            return;
        };
        if let Some(key) = self.registration.take() {
            token.deregister(key);
        }
        if std::mem::take(&mut self.owns_timer) {
            token.disarm();
        }
    }
}

struct Slot<T, E> {
    state: Mutex<State<T, E>>,
    sent: AtomicBool,
    /// Live handles; the slot is recycled when this reaches zero.
    handles: AtomicUsize,
    free: Weak<FreeList<T, E>>,
}

impl<T, E> Slot<T, E> {
    fn new(free: Weak<FreeList<T, E>>) -> Self {
        Self {
            state: Mutex::new(State::empty()),
            sent: AtomicBool::new(false),
            handles: AtomicUsize::new(0),
            free,
        }
    }

    fn arm(&self, token: Option<CancelToken>, owns_timer: bool) {
        self.handles.store(2, Ordering::Release);
        self.sent.store(false, Ordering::Release);
        let mut state = self.state.lock();
        *state = State::empty();
        state.owns_timer = owns_timer && token.is_some();
        state.token = token;
    }

    /// Set the outcome if none is set yet. A fired token turns any other
    /// outcome into `Canceled`, and the caller's value is dropped.
    fn finish(&self, result: Result<T, OperationError<E>>) -> bool {
        let (won, waker) = {
            let mut state = self.state.lock();
            if !matches!(state.completion, Completion::Pending) {
                return false;
            }
            let won = if state.token_fired() && !matches!(result, Err(OperationError::Canceled))
            {
                state.completion = Completion::Ready(Err(OperationError::Canceled));
                false
            } else {
                state.completion = Completion::Ready(result);
                true
            };
            state.retire();
            (won, state.waker.take())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        won
    }

    fn is_completed(&self) -> bool {
        let state = self.state.lock();
        !matches!(state.completion, Completion::Pending) || state.token_fired()
    }
}

fn release<T, E>(slot: &Arc<Slot<T, E>>) {
    if slot.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
        return;
    }
    // Last handle: drop whatever the slot still holds before parking it.
    {
        let mut state = slot.state.lock();
        state.retire();
        *state = State::empty();
    }
    if let Some(free) = slot.free.upgrade() {
        let mut slots = free.slots.lock();
        if slots.len() < free.capacity {
            slots.push(Arc::clone(slot));
        }
    }
}

struct FreeList<T, E> {
    slots: Mutex<Vec<Arc<Slot<T, E>>>>,
    capacity: usize,
}

// ── OperationPool ───────────────────────────────────────────────────────

/// Free list of completion slots for one `(T, E)` shape.
pub struct OperationPool<T, E> {
    free: Arc<FreeList<T, E>>,
}

impl<T, E> Clone for OperationPool<T, E> {
    fn clone(&self) -> Self {
        Self {
            free: Arc::clone(&self.free),
        }
    }
}

impl<T, E> OperationPool<T, E> {
    /// A pool that keeps up to `capacity` idle slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Arc::new(FreeList {
                slots: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
            }),
        }
    }

    /// Create an operation and its remote, reusing an idle slot if there is
    /// one. A `token`, if given, cancels the operation when triggered.
    pub fn create(&self, token: Option<CancelToken>) -> (Operation<T, E>, Remote<T, E>) {
        self.create_armed(token, false)
    }

    /// Create an operation that is canceled if it has no outcome within
    /// `timeout`. The timer stops as soon as there is one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_timed(&self, timeout: Duration) -> (Operation<T, E>, Remote<T, E>) {
        self.create_armed(Some(CancelToken::after(timeout)), true)
    }

    fn create_armed(
        &self,
        token: Option<CancelToken>,
        owns_timer: bool,
    ) -> (Operation<T, E>, Remote<T, E>) {
        let recycled = self.free.slots.lock().pop();
        let slot = match recycled {
            Some(slot) => slot,
            None => Arc::new(Slot::new(Arc::downgrade(&self.free))),
        };
        slot.arm(token, owns_timer);
        (
            Operation {
                slot: Arc::clone(&slot),
            },
            Remote { slot },
        )
    }

    /// Number of idle slots ready for reuse.
    pub fn idle(&self) -> usize {
        self.free.slots.lock().len()
    }
}

impl<T, E> fmt::Debug for OperationPool<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationPool")
            .field("idle", &self.idle())
            .field("capacity", &self.free.capacity)
            .finish()
    }
}

// ── Operation ───────────────────────────────────────────────────────────

/// The caller's handle. Resolves to the outcome set through the paired
/// [`Remote`].
///
/// Awaiting an operation that was never marked sent (and has no outcome)
/// fails at once with [`OperationError::NotSent`] instead of hanging.
pub struct Operation<T, E> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> Operation<T, E> {
    /// Create an unpooled pair.
    pub fn new(token: Option<CancelToken>) -> (Operation<T, E>, Remote<T, E>) {
        let slot = Arc::new(Slot::new(Weak::new()));
        slot.arm(token, false);
        (
            Operation {
                slot: Arc::clone(&slot),
            },
            Remote { slot },
        )
    }

    pub fn is_sent(&self) -> bool {
        self.slot.sent.load(Ordering::Acquire)
    }

    /// Record that the request was accepted for writing.
    pub(crate) fn mark_sent(&self) {
        self.slot.sent.store(true, Ordering::Release);
    }

    /// Whether an outcome is available (or the token has fired).
    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }

    /// Complete with `Canceled` unless an outcome is already set.
    pub fn cancel(&self) -> bool {
        self.slot.finish(Err(OperationError::Canceled))
    }
}

impl<T, E> Future for Operation<T, E> {
    type Output = Result<T, OperationError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let slot = &self.slot;
        let mut guard = slot.state.lock();
        let state = &mut *guard;
        match std::mem::replace(&mut state.completion, Completion::Taken) {
            Completion::Ready(result) => return Poll::Ready(result),
            Completion::Taken => return Poll::Ready(Err(OperationError::Consumed)),
            Completion::Pending => {}
        }
        if state.token_fired() {
            return Poll::Ready(Err(OperationError::Canceled));
        }
        if !slot.sent.load(Ordering::Acquire) {
            return Poll::Ready(Err(OperationError::NotSent));
        }
        state.completion = Completion::Pending;

        let fresh = !state
            .waker
            .as_ref()
            .is_some_and(|w| w.will_wake(cx.waker()));
        if fresh {
            state.waker = Some(cx.waker().clone());
            if let Some(token) = &state.token {
                match token.register(state.registration, cx.waker()) {
                    Some(key) => state.registration = Some(key),
                    None => {
                        state.completion = Completion::Taken;
                        state.waker = None;
                        return Poll::Ready(Err(OperationError::Canceled));
                    }
                }
            }
        }
        Poll::Pending
    }
}

impl<T, E> Drop for Operation<T, E> {
    fn drop(&mut self) {
        release(&self.slot);
    }
}

impl<T, E> fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("sent", &self.is_sent())
            .field("completed", &self.is_completed())
            .finish()
    }
}

// ── Remote ──────────────────────────────────────────────────────────────

/// The producer's handle. Dropping it after [`mark_sent`](Remote::mark_sent)
/// without completing resolves the operation as
/// [`OperationError::Abandoned`].
pub struct Remote<T, E> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> Remote<T, E> {
    /// Record that the request has been handed to the writer.
    #[inline]
    pub fn mark_sent(&self) {
        self.slot.sent.store(true, Ordering::Release);
    }

    pub fn is_sent(&self) -> bool {
        self.slot.sent.load(Ordering::Acquire)
    }

    /// Set the outcome. Only the first completion wins; later calls, and
    /// calls after the cancellation token fired, return `false`.
    pub fn try_complete(&self, outcome: Outcome<T, E>) -> bool {
        self.slot.finish(outcome.into_result())
    }

    /// Whether the caller gave up (token fired or explicit cancel).
    pub fn is_canceled(&self) -> bool {
        let state = self.slot.state.lock();
        state.token_fired()
            || matches!(
                state.completion,
                Completion::Ready(Err(OperationError::Canceled))
            )
    }

    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }
}

impl<T, E> Drop for Remote<T, E> {
    fn drop(&mut self) {
        if self.slot.sent.load(Ordering::Acquire) {
            self.slot.finish(Err(OperationError::Abandoned));
        }
        release(&self.slot);
    }
}

impl<T, E> fmt::Debug for Remote<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("sent", &self.is_sent())
            .field("completed", &self.is_completed())
            .finish()
    }
}
