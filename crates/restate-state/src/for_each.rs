//! Backpressure-aware subscription.
//!
//! [`State::for_each`] runs a callback with the current value and then once
//! per settled change. A callback is always awaited before the next one
//! starts; changes that land while it runs are folded into a single catch-up
//! call with the latest value.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use restate_core::{CancellationScope, Signal};

use crate::state::State;

/// Options for [`State::for_each`].
#[derive(Debug, Clone, Default)]
pub struct ForEachOptions {
    /// Stop the subscription when this signal's scope closes.
    pub signal: Option<Signal>,
}

impl ForEachOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Stops a running [`ForEach`] from outside.
///
/// Stopping lets an in-flight callback finish; no further call is made.
#[derive(Clone)]
pub struct ForEachHandle {
    scope: Rc<CancellationScope>,
}

impl ForEachHandle {
    pub fn stop(&self) {
        self.scope.close();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.scope.is_closed()
    }
}

impl fmt::Debug for ForEachHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForEachHandle")
            .field("scope_id", &self.scope.id())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Future driving a subscription. Completes when stopped, when the options'
/// signal closes, or when the state becomes final.
#[must_use = "futures do nothing unless polled"]
pub struct ForEach {
    handle: ForEachHandle,
    run: LocalBoxFuture<'static, ()>,
}

impl ForEach {
    /// Handle to stop this subscription early.
    #[must_use]
    pub fn handle(&self) -> ForEachHandle {
        self.handle.clone()
    }
}

impl Future for ForEach {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().run.poll_unpin(cx)
    }
}

impl fmt::Debug for ForEach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForEach")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> State<T> {
    /// Subscribe `callback` to this state.
    ///
    /// The callback is invoked with the current value immediately, then with
    /// the latest value after each settled change. It never runs concurrently
    /// with itself.
    ///
    /// ```
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// use futures::executor::block_on;
    /// use restate_state::{ForEachOptions, Restate};
    ///
    /// let source = Restate::new(1);
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let sink = Rc::clone(&seen);
    /// let subscription = source.state().for_each(
    ///     move |n| {
    ///         sink.borrow_mut().push(n);
    ///         async {}
    ///     },
    ///     ForEachOptions::new(),
    /// );
    /// let _ = source.set(2);
    /// drop(source);
    ///
    /// block_on(subscription);
    /// assert_eq!(*seen.borrow(), vec![2]);
    /// ```
    pub fn for_each<F, Fut>(&self, mut callback: F, options: ForEachOptions) -> ForEach
    where
        F: FnMut(T) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let scope = Rc::new(match &options.signal {
            Some(parent) => parent.child(),
            None => CancellationScope::new(),
        });
        let handle = ForEachHandle {
            scope: Rc::clone(&scope),
        };
        let signal = scope.signal();
        let state = self.clone();

        let run = async move {
            let mut seen = state.generation();
            let mut value = state.current();
            'subscription: loop {
                if signal.is_closed() {
                    break;
                }
                callback(value).await;

                loop {
                    if signal.is_closed() {
                        break 'subscription;
                    }
                    if state.generation() != seen {
                        break;
                    }
                    if state.is_final() {
                        break 'subscription;
                    }
                    if signal.wrap(state.changed()).await.is_err() {
                        break 'subscription;
                    }
                }
                seen = state.generation();
                value = state.current();
            }
            tracing::trace!(scope_id = signal.id(), "for_each stopped");
            scope.close();
        };

        ForEach {
            handle,
            run: run.boxed_local(),
        }
    }
}
