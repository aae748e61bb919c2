//! Per-command profiling.
//!
//! The read loop records one [`CommandProfile`] per completed request into a
//! lock-free stack; a reporter drains it whenever it likes. Pushing never
//! blocks the read loop, and draining takes the whole stack in one swap.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::Duration;

use bytes::Bytes;

// ── ProfileStack ─────────────────────────────────────────────────────────

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

/// Multi-producer stack with whole-stack drain.
///
/// There is no single-element pop, so a node is never freed while another
/// thread may still read it and the stack is not exposed to ABA.
pub struct ProfileStack<T> {
    head: AtomicPtr<Node<T>>,
}

// Safety: nodes are handed between threads only through `head`; each node is
// owned by exactly one party at a time (the stack, or the drainer).
unsafe impl<T: Send> Send for ProfileStack<T> {}
unsafe impl<T: Send> Sync for ProfileStack<T> {}

impl<T> ProfileStack<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // Safety: `node` is not yet published, we still own it.
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Take everything pushed so far, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut node = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut out = Vec::new();
        while !node.is_null() {
            // Safety: the swap made this list ours alone, and every node in
            // it came from `Box::into_raw` in `push`.
            let Node { value, next } = *unsafe { Box::from_raw(node) };
            node = next;
            out.push(value);
        }
        out.reverse();
        out
    }
}

impl<T> Default for ProfileStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ProfileStack<T> {
    fn drop(&mut self) {
        self.drain();
    }
}

// ── Profiler ─────────────────────────────────────────────────────────────

/// How a profiled request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    /// A reply was delivered.
    Reply,
    /// A reply was delivered and it was a server error.
    ServerError,
    /// The reply arrived after the caller canceled and was dropped.
    Discarded,
    /// The connection failed before a reply arrived.
    Faulted,
}

/// One completed request.
#[derive(Debug, Clone)]
pub struct CommandProfile {
    /// Command name, as written.
    pub command: Bytes,
    /// Time from enqueue to completion.
    pub latency: Duration,
    pub outcome: ProfileOutcome,
}

/// Shared sink for [`CommandProfile`] records. Clones share storage.
#[derive(Clone, Default)]
pub struct Profiler {
    stack: Arc<ProfileStack<CommandProfile>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, command: Bytes, latency: Duration, outcome: ProfileOutcome) {
        self.stack.push(CommandProfile {
            command,
            latency,
            outcome,
        });
    }

    /// Records since the last drain, in completion order.
    pub fn drain(&self) -> Vec<CommandProfile> {
        self.stack.drain()
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("empty", &self.stack.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_is_oldest_first() {
        let stack = ProfileStack::new();
        for i in 0..5 {
            stack.push(i);
        }
        assert_eq!(stack.drain(), vec![0, 1, 2, 3, 4]);
        assert!(stack.is_empty());
        assert!(stack.drain().is_empty());
    }

    #[test]
    fn test_concurrent_push_keeps_everything() {
        let stack = Arc::new(ProfileStack::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for i in 0..1000 {
                        stack.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut all = stack.drain();
        assert_eq!(all.len(), 4000);

        // Each producer's own pushes stay in order.
        for t in 0..4 {
            let mine: Vec<_> = all.iter().copied().filter(|v| v / 1000 == t).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
        all.sort_unstable();
        assert_eq!(all, (0..4000).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_frees_remaining() {
        let stack = ProfileStack::new();
        let shared = Arc::new(());
        stack.push(Arc::clone(&shared));
        stack.push(Arc::clone(&shared));
        assert_eq!(Arc::strong_count(&shared), 3);
        drop(stack);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn test_profiler_records() {
        let profiler = Profiler::new();
        let other = profiler.clone();
        other.record(
            Bytes::from_static(b"GET"),
            Duration::from_micros(10),
            ProfileOutcome::Reply,
        );
        let records = profiler.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0].command[..], b"GET");
        assert_eq!(records[0].outcome, ProfileOutcome::Reply);
    }
}
