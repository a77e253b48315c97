//! The sole writer handle of a reactive value.

use std::convert::Infallible;
use std::future::{self, Future};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::FutureExt;

use crate::generation::Generation;
use crate::mutable::{MutableState, Settle, Step};
use crate::state::{Source, State};

/// Owner and only writer of a reactive value.
///
/// Hand out [`State`]s to readers; keep the `Restate`. Every write is queued
/// and applied strictly in call order. Dropping the `Restate` makes the
/// state final once its queued writes have settled.
///
/// # Example
///
/// ```
/// use futures::executor::block_on;
/// use restate_state::Restate;
///
/// let counter = Restate::new(0);
/// let state = counter.state();
/// let next = state.next();
///
/// let _ = counter.update(|n| n + 1);
/// let _ = counter.update(|n| n + 1);
/// block_on(counter.update(|n| n + 1));
///
/// assert_eq!(block_on(next), 3);
/// ```
pub struct Restate<T> {
    shared: Rc<MutableState<T>>,
}

impl<T> Drop for Restate<T> {
    fn drop(&mut self) {
        self.shared.release_writer();
    }
}

impl<T: Clone + 'static> Restate<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            shared: MutableState::new(value),
        }
    }

    /// Read-only view for distribution to readers.
    #[must_use]
    pub fn state(&self) -> State<T> {
        let source: Rc<dyn Source<T>> = self.shared.clone();
        State::from_source(source)
    }

    #[must_use]
    pub fn current(&self) -> T {
        self.shared.current_value()
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.shared.generation()
    }

    /// Replace the value.
    pub fn set(&self, value: T) -> Commit<T> {
        self.update(move |_| value)
    }

    /// Replace the value with `f(previous)`.
    pub fn update<F>(&self, f: F) -> Commit<T>
    where
        F: FnOnce(T) -> T + 'static,
    {
        Commit {
            inner: self.try_update(move |previous| Ok::<_, Infallible>(f(previous))),
        }
    }

    /// Replace the value with `f(previous)` unless it fails.
    ///
    /// A failure leaves the value untouched and reaches only the returned
    /// future.
    pub fn try_update<F, E>(&self, f: F) -> Update<T, E>
    where
        F: FnOnce(T) -> Result<T, E> + 'static,
        E: 'static,
    {
        self.update_async(move |previous| future::ready(f(previous)))
    }

    /// Replace the value with the result of an asynchronous projection.
    ///
    /// `f` receives the value current when this task reaches the head of the
    /// queue; later writes wait until it settles. A failure does not block the
    /// queue and reaches only the returned future. Dropping the returned
    /// future does not cancel the task.
    pub fn update_async<F, Fut, E>(&self, f: F) -> Update<T, E>
    where
        F: FnOnce(T) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(Box::new(move |previous| -> Step<T> {
            async move {
                let (next, result) = match f(previous).await {
                    Ok(next) => (Some(next), Ok(())),
                    Err(err) => (None, Err(err)),
                };
                let settle: Settle = Box::new(move || {
                    let _ = tx.send(result);
                });
                (next, settle)
            }
            .boxed_local()
        }));
        Update {
            state: Rc::clone(&self.shared),
            rx,
        }
    }
}

// ─── Futures ─────────────────────────────────────────────────────────────────

/// Settles once its task has committed (or failed) and, if it was the last
/// queued task, notified readers.
///
/// The task is already queued when this future is created; polling it only
/// helps advance the queue and observes the outcome.
pub struct Update<T, E> {
    state: Rc<MutableState<T>>,
    rx: oneshot::Receiver<Result<(), E>>,
}

impl<T: Clone + 'static, E> Future for Update<T, E> {
    type Output = Result<(), E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(result) = this.rx.poll_unpin(cx) {
            // The sender only disappears unsettled if the projection panicked.
            return Poll::Ready(result.unwrap_or(Ok(())));
        }
        this.state.register_driver(cx.waker());
        this.state.drive();
        this.rx.poll_unpin(cx).map(|result| result.unwrap_or(Ok(())))
    }
}

/// [`Update`] for infallible writes.
pub struct Commit<T> {
    inner: Update<T, Infallible>,
}

impl<T: Clone + 'static> Future for Commit<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().inner.poll_unpin(cx).map(|result| match result {
            Ok(()) => (),
            Err(never) => match never {},
        })
    }
}
