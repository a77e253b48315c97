//! Storage and update serialization behind a [`Restate`](crate::Restate).
//!
//! # Design
//!
//! Every write is an update task pushed onto one FIFO queue. Tasks run one at
//! a time; a task's projection may suspend, in which case its future is
//! parked in `running` and the queue waits behind it. There is no spawner:
//! the queue is advanced by whoever polls an [`Update`](crate::Update) or a
//! reader of this state, and synchronously on enqueue. Projections are
//! polled with a fan-out waker that wakes every registered driver, so a
//! suspended projection resumes as long as anyone is still interested.
//!
//! # Coalescing
//!
//! A commit marks the state dirty. Waiters are notified only when a task
//! settles with the queue empty and the state dirty, so a burst of commits
//! produces a single notification carrying the last value. Notification bumps
//! `epoch`; a waiter resolves when the epoch it captured has moved.
//!
//! Drivers are only needed while a projection is suspended: the list is
//! cleared whenever `drive` returns with nothing parked in `running`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{self, ArcWake};

use crate::generation::Generation;
use crate::state::Source;

/// Reports a settled task's outcome to its caller.
pub(crate) type Settle = Box<dyn FnOnce()>;

/// A running projection: the value to commit (if any) plus its settle hook.
pub(crate) type Step<T> = LocalBoxFuture<'static, (Option<T>, Settle)>;

/// Queued projection, started with the value current at the time it runs.
pub(crate) type UpdateTask<T> = Box<dyn FnOnce(T) -> Step<T>>;

pub(crate) struct MutableState<T> {
    value: RefCell<T>,
    generation: Cell<Generation>,
    /// Bumped once per notification.
    epoch: Cell<u64>,
    /// A commit happened since the last notification.
    dirty: Cell<bool>,
    /// The writer is gone; no task will be enqueued again.
    writer_dropped: Cell<bool>,
    waiters: RefCell<Vec<Waker>>,
    queue: RefCell<VecDeque<UpdateTask<T>>>,
    running: RefCell<Option<Step<T>>>,
    driving: Cell<bool>,
    drivers: Arc<Drivers>,
}

impl<T> MutableState<T> {
    pub(crate) fn new(value: T) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            generation: Cell::new(Generation::ZERO),
            epoch: Cell::new(0),
            dirty: Cell::new(false),
            writer_dropped: Cell::new(false),
            waiters: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            running: RefCell::new(None),
            driving: Cell::new(false),
            drivers: Arc::new(Drivers::default()),
        })
    }

    pub(crate) fn register_driver(&self, waker: &Waker) {
        self.drivers.register(waker);
    }

    /// Mark the writer as dropped. Readers see the state as final once the
    /// queue drains.
    pub(crate) fn release_writer(&self) {
        self.writer_dropped.set(true);
        if self.is_idle() {
            self.wake_waiters();
        }
    }

    fn is_idle(&self) -> bool {
        !self.driving.get() && self.running.borrow().is_none() && self.queue.borrow().is_empty()
    }

    fn is_settled_final(&self) -> bool {
        self.writer_dropped.get() && self.is_idle()
    }

    fn commit(&self, next: T) {
        *self.value.borrow_mut() = next;
        let generation = self.generation.get().next();
        self.generation.set(generation);
        self.dirty.set(true);
        tracing::trace!(generation = generation.get(), "state committed");
    }

    fn notify(&self) {
        self.dirty.set(false);
        let epoch = self.epoch.get().wrapping_add(1);
        self.epoch.set(epoch);
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        tracing::trace!(epoch, waiters = waiters.len(), "state notified");
        for waker in waiters {
            waker.wake();
        }
    }

    fn wake_waiters(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
    }

    fn poll_changed(&self, since: u64, cx: &mut Context<'_>) -> Poll<()> {
        if self.epoch.get() != since || self.is_settled_final() {
            return Poll::Ready(());
        }
        let mut waiters = self.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
            waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T: Clone + 'static> MutableState<T> {
    pub(crate) fn current_value(&self) -> T {
        self.value.borrow().clone()
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation.get()
    }

    pub(crate) fn enqueue(&self, task: UpdateTask<T>) {
        self.queue.borrow_mut().push_back(task);
        self.drive();
    }

    /// Run queued tasks until the queue is empty or a projection suspends.
    ///
    /// Re-entrant calls (a projection writing to its own state) return
    /// immediately; the outer loop picks up whatever they enqueued.
    pub(crate) fn drive(&self) {
        if self.driving.replace(true) {
            return;
        }
        {
            let _guard = DriveGuard(&self.driving);
            let waker = task::waker_ref(&self.drivers);
            let mut cx = Context::from_waker(&waker);
            loop {
                let running = self.running.borrow_mut().take();
                let mut step = match running {
                    Some(step) => step,
                    None => {
                        let next = self.queue.borrow_mut().pop_front();
                        match next {
                            Some(task) => task(self.current_value()),
                            None => break,
                        }
                    }
                };
                match step.as_mut().poll(&mut cx) {
                    Poll::Pending => {
                        *self.running.borrow_mut() = Some(step);
                        break;
                    }
                    Poll::Ready((next, settle)) => {
                        match next {
                            Some(next) => self.commit(next),
                            None => tracing::debug!("state update failed"),
                        }
                        if self.dirty.get() && self.queue.borrow().is_empty() {
                            self.notify();
                        }
                        settle();
                    }
                }
            }
        }
        if self.running.borrow().is_none() {
            self.drivers.clear();
        }
        if self.is_settled_final() {
            self.wake_waiters();
        }
    }
}

impl<T: Clone + 'static> Source<T> for MutableState<T> {
    fn current(&self) -> T {
        self.current_value()
    }

    fn generation(&self) -> Generation {
        self.generation.get()
    }

    fn is_final(&self) -> bool {
        self.is_settled_final()
    }

    fn changed(self: Rc<Self>) -> LocalBoxFuture<'static, ()> {
        let since = self.epoch.get();
        Changed { state: self, since }.boxed_local()
    }
}

// ─── Changed ─────────────────────────────────────────────────────────────────

/// Waits for the epoch to move past `since`. Drives the queue while waiting.
struct Changed<T> {
    state: Rc<MutableState<T>>,
    since: u64,
}

impl<T: Clone + 'static> Future for Changed<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        this.state.register_driver(cx.waker());
        this.state.drive();
        this.state.poll_changed(this.since, cx)
    }
}

// ─── Drivers ─────────────────────────────────────────────────────────────────

/// Wakers of everyone currently able to advance the queue.
///
/// Used as the waker for suspended projections: when a projection becomes
/// ready, every registered driver is woken and the first to run resumes it.
#[derive(Default)]
struct Drivers {
    wakers: Mutex<Vec<Waker>>,
}

impl Drivers {
    fn lock(&self) -> MutexGuard<'_, Vec<Waker>> {
        self.wakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.lock();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }

    fn clear(&self) {
        // Wakers are dropped after the lock is released.
        let wakers = std::mem::take(&mut *self.lock());
        drop(wakers);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

impl ArcWake for Drivers {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let wakers = std::mem::take(&mut *arc_self.lock());
        for waker in wakers {
            waker.wake();
        }
    }
}

struct DriveGuard<'a>(&'a Cell<bool>);

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
