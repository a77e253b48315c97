//! Cancellation scopes and the read-only [`Signal`] capability.
//!
//! A [`CancellationScope`] is owned by whoever started a unit of work. The
//! owner hands collaborators a [`Signal`], which can observe the scope but
//! never close it. Closing is one-way: once closed, every
//! [`check`](Signal::check) and [`wrap`](Signal::wrap) through the signal
//! fails with [`Closed`], and every deferred callback runs exactly once.
//!
//! # Design
//!
//! `Signal` is cheaply cloneable (`Rc` inside) and `!Send`: a scope belongs to
//! one cooperative scheduler. Cancellation is cooperative. Closing never
//! aborts in-flight work, it only makes the next observation fail.
//!
//! # Invariants
//!
//! 1. The closed flag transitions false → true at most once.
//! 2. Deferred callbacks run in registration order, each exactly once.
//! 3. A callback deferred after close runs immediately.
//! 4. Dropping a scope without closing it does **not** close it.
//!
//! # Example
//!
//! ```
//! use restate_core::{CancellationScope, Closed};
//!
//! let scope = CancellationScope::new();
//! let signal = scope.signal();
//! assert!(signal.check().is_ok());
//!
//! scope.close();
//! assert_eq!(signal.check(), Err(Closed));
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, Either, FutureExt, Shared};

use crate::closed::Closed;

// ─── Scope ID generation ─────────────────────────────────────────────────────

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_scope_id() -> u64 {
    NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Metrics counters ────────────────────────────────────────────────────────

/// Total number of scopes closed in this process.
static SCOPES_CLOSED_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total close count (for diagnostics).
#[must_use]
pub fn scopes_closed_total() -> u64 {
    SCOPES_CLOSED_TOTAL.load(Ordering::Relaxed)
}

// ─── Inner shared state ──────────────────────────────────────────────────────

type DeferredFn = Box<dyn FnOnce()>;

struct ScopeInner {
    id: u64,
    closed: Cell<bool>,
    /// Callbacks waiting for close, keyed in registration order.
    deferred: RefCell<BTreeMap<u64, DeferredFn>>,
    next_key: Cell<u64>,
    /// Registration in the parent's `deferred`, for child scopes.
    parent: RefCell<Option<(Weak<ScopeInner>, u64)>>,
    /// Fired once on close. Taken by the first `close()`.
    close_tx: RefCell<Option<oneshot::Sender<()>>>,
    close_rx: Shared<oneshot::Receiver<()>>,
}

impl ScopeInner {
    fn new() -> Rc<Self> {
        let (tx, rx) = oneshot::channel();
        Rc::new(Self {
            id: next_scope_id(),
            closed: Cell::new(false),
            deferred: RefCell::new(BTreeMap::new()),
            next_key: Cell::new(0),
            parent: RefCell::new(None),
            close_tx: RefCell::new(Some(tx)),
            close_rx: rx.shared(),
        })
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        SCOPES_CLOSED_TOTAL.fetch_add(1, Ordering::Relaxed);
        self.detach_from_parent();

        let callbacks = std::mem::take(&mut *self.deferred.borrow_mut());
        tracing::debug!(
            scope_id = self.id,
            deferred = callbacks.len(),
            "scope closed"
        );

        let tx = self.close_tx.borrow_mut().take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }

        // No borrow is held here: callbacks may defer more work, which then
        // runs immediately because the flag is already set.
        for callback in callbacks.into_values() {
            callback();
        }
    }

    /// Queue `callback` for close, or run it now if already closed. Returns
    /// the key to [`remove_deferred`](Self::remove_deferred) it by.
    fn push_deferred(&self, callback: DeferredFn) -> Option<u64> {
        if self.closed.get() {
            callback();
            return None;
        }
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        self.deferred.borrow_mut().insert(key, callback);
        Some(key)
    }

    fn remove_deferred(&self, key: u64) {
        // Dropped after the borrow is released.
        let removed = self.deferred.borrow_mut().remove(&key);
        drop(removed);
    }

    fn detach_from_parent(&self) {
        let link = self.parent.borrow_mut().take();
        if let Some((parent, key)) = link
            && let Some(parent) = parent.upgrade()
        {
            parent.remove_deferred(key);
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.detach_from_parent();
    }
}

impl fmt::Debug for ScopeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("closed", &self.closed.get())
            .field("deferred", &self.deferred.borrow().len())
            .finish()
    }
}

// ─── CancellationScope ───────────────────────────────────────────────────────

/// Owner handle for a one-way closable cancellation scope.
///
/// Not `Clone`: only the creator may close it. Share [`Signal`]s instead.
#[derive(Debug)]
pub struct CancellationScope {
    inner: Rc<ScopeInner>,
}

impl CancellationScope {
    /// Open a new scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ScopeInner::new(),
        }
    }

    /// Read-only capability for collaborators.
    #[must_use]
    pub fn signal(&self) -> Signal {
        Signal {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Close the scope and run every deferred callback.
    ///
    /// Idempotent: only the first call has any effect.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](Self::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Unique identifier for this scope (for tracing).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Callbacks still waiting for close.
    #[cfg(test)]
    pub(crate) fn pending_deferred(&self) -> usize {
        self.inner.deferred.borrow().len()
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Signal ──────────────────────────────────────────────────────────────────

/// Read-only view of a [`CancellationScope`].
///
/// Pass `&Signal` into every cancellable operation. Check it at entry and
/// wrap every await on external work.
#[derive(Clone, Debug)]
pub struct Signal {
    inner: Rc<ScopeInner>,
}

impl Signal {
    /// Identifier of the observed scope.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Snapshot of the closed flag.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Fail with [`Closed`] if the scope has been closed.
    ///
    /// ```ignore
    /// signal.check()?;
    /// // ... continue work ...
    /// ```
    pub fn check(&self) -> Result<(), Closed> {
        if self.is_closed() {
            return Err(Closed);
        }
        Ok(())
    }

    /// Future that resolves when the scope closes.
    ///
    /// Never resolves if every handle to an open scope is dropped.
    #[must_use]
    pub fn closed(&self) -> Closing {
        Closing {
            rx: self.inner.close_rx.clone(),
        }
    }

    /// Register `callback` to run once when the scope closes.
    ///
    /// The returned future resolves with the callback's result. If the scope
    /// is already closed the callback runs before `defer` returns. An `Err`
    /// from one callback reaches only its own [`Deferred`] and does not stop
    /// the others.
    pub fn defer<F, T, E>(&self, callback: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Result<T, E> + 'static,
        T: 'static,
        E: 'static,
    {
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.push_deferred(Box::new(move || {
            let _ = tx.send(callback());
        }));
        Deferred { rx }
    }

    /// Race `future` against the close event.
    ///
    /// Whichever side settles first, the result is [`Closed`] if the scope is
    /// closed by then.
    pub async fn wrap<F>(&self, future: F) -> Result<F::Output, Closed>
    where
        F: Future,
    {
        self.check()?;
        let future = pin!(future);
        let outcome = future::select(future, self.closed()).await;
        self.check()?;
        match outcome {
            Either::Left((value, _)) => Ok(value),
            Either::Right(((), _)) => Err(Closed),
        }
    }

    /// Race a fallible `future` against the close event.
    ///
    /// Like [`wrap`](Self::wrap), except that an `Err` from `future` is
    /// returned as is when it settles ahead of the close. The wrapped future is
    /// polled first, so if both settle in the same poll its error wins; an
    /// `Ok` value never wins over a close.
    pub async fn try_wrap<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Closed>,
    {
        self.check()?;
        match future::select(pin!(future), self.closed()).await {
            Either::Left((Err(err), _)) => Err(err),
            Either::Left((Ok(value), _)) => {
                self.check()?;
                Ok(value)
            }
            Either::Right(((), _)) => Err(Closed.into()),
        }
    }

    /// Open a child scope that closes when this one does.
    ///
    /// Closing the child never affects the parent.
    #[must_use]
    pub fn child(&self) -> CancellationScope {
        let child = CancellationScope::new();
        let weak: Weak<ScopeInner> = Rc::downgrade(&child.inner);
        let key = self.inner.push_deferred(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.close();
            }
        }));
        if let Some(key) = key {
            *child.inner.parent.borrow_mut() = Some((Rc::downgrade(&self.inner), key));
        }
        child
    }
}

// ─── Futures ─────────────────────────────────────────────────────────────────

/// Future returned by [`Signal::closed`].
#[must_use = "futures do nothing unless polled"]
pub struct Closing {
    rx: Shared<oneshot::Receiver<()>>,
}

impl fmt::Debug for Closing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closing").finish_non_exhaustive()
    }
}

impl Future for Closing {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.get_mut().rx.poll_unpin(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // Sender dropped with the scope still open: it can never close.
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}

/// Future returned by [`Signal::defer`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Deferred<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T, E>> {
        match self.get_mut().rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Callback dropped with an open scope: it will never run.
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
