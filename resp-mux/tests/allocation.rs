//! Steady-state operation cycles must not allocate.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use resp_mux::{CancelToken, OperationError, OperationPool, Outcome};

struct Counting;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

fn bump() {
    let _ = ALLOCATIONS.try_with(|c| c.set(c.get() + 1));
}

fn allocations() -> usize {
    ALLOCATIONS.with(Cell::get)
}

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        bump();
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        bump();
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static GLOBAL: Counting = Counting;

fn cycle(pool: &OperationPool<u64, ()>, token: Option<CancelToken>, value: u64) {
    cycle_with(pool, token, value, Waker::noop());
}

fn cycle_with(
    pool: &OperationPool<u64, ()>,
    token: Option<CancelToken>,
    value: u64,
    waker: &Waker,
) {
    let mut cx = Context::from_waker(waker);
    let (mut op, remote) = pool.create(token);
    remote.mark_sent();
    assert!(Pin::new(&mut op).poll(&mut cx).is_pending());
    assert!(remote.try_complete(Outcome::Ok(value)));
    drop(remote);
    assert_eq!(Pin::new(&mut op).poll(&mut cx), Poll::Ready(Ok(value)));
}

#[test]
fn create_complete_await_cycles_do_not_allocate() {
    let pool: OperationPool<u64, ()> = OperationPool::new(4);
    let token = CancelToken::new();

    for i in 0..10 {
        cycle(&pool, None, i);
        cycle(&pool, Some(token.clone()), i);
    }

    let before = allocations();
    for i in 0..100 {
        cycle(&pool, None, i);
        cycle(&pool, Some(token.clone()), i);
    }
    assert_eq!(allocations(), before);
}

struct Ignore;

impl Wake for Ignore {
    fn wake(self: Arc<Self>) {}
}

#[test]
fn shared_token_with_changing_wakers_does_not_allocate() {
    let pool: OperationPool<u64, ()> = OperationPool::new(4);
    let token = CancelToken::new();
    let wakers = [Waker::from(Arc::new(Ignore)), Waker::from(Arc::new(Ignore))];

    for i in 0..10 {
        cycle_with(&pool, Some(token.clone()), i, &wakers[i as usize % 2]);
    }
    let before = allocations();
    for i in 0..100 {
        cycle_with(&pool, Some(token.clone()), i, &wakers[i as usize % 2]);
    }
    assert_eq!(allocations(), before);
}

#[test]
fn canceled_cycles_do_not_allocate() {
    let pool: OperationPool<u64, ()> = OperationPool::new(4);
    let mut cx = Context::from_waker(Waker::noop());

    let run = |cx: &mut Context<'_>| {
        let (mut op, remote) = pool.create(None);
        remote.mark_sent();
        assert!(op.cancel());
        assert!(!remote.try_complete(Outcome::Ok(1)));
        assert_eq!(
            Pin::new(&mut op).poll(cx),
            Poll::Ready(Err(OperationError::Canceled))
        );
    };
    for _ in 0..10 {
        run(&mut cx);
    }
    let before = allocations();
    for _ in 0..100 {
        run(&mut cx);
    }
    assert_eq!(allocations(), before);
}
