//! Read-only, composable view of a reactive value.
//!
//! A [`State<T>`] exposes three things: the [`current`](State::current)
//! value, its [`generation`](State::generation), and [`next`](State::next),
//! a future that settles after the value changes. Everything else (`map`,
//! `merge`, `for_each`, iteration) is built from those three.
//!
//! # Invariants
//!
//! 1. `generation()` changes exactly when the observable value changes.
//! 2. A `next()` future created at generation G on a live state never
//!    resolves with a value of generation G.
//! 3. A state that can no longer change ([`is_final`](State::is_final))
//!    resolves `next()` immediately with its final value.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::generation::Generation;

/// Backing implementation of a [`State`].
pub(crate) trait Source<T> {
    fn current(&self) -> T;

    fn generation(&self) -> Generation;

    /// Whether the value can never change again.
    fn is_final(&self) -> bool;

    /// Future that settles after the next observable change, or as soon as
    /// the source is final. Captures its starting point when called.
    fn changed(self: Rc<Self>) -> LocalBoxFuture<'static, ()>;
}

/// Shared read-only handle to a reactive value.
///
/// Cloning a `State` creates a new handle to the **same** source.
pub struct State<T> {
    source: Rc<dyn Source<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("current", &self.current())
            .field("generation", &self.generation())
            .finish()
    }
}

impl<T: Clone + 'static> State<T> {
    pub(crate) fn from_source(source: Rc<dyn Source<T>>) -> Self {
        Self { source }
    }

    /// A state that never changes. Its generation stays at zero.
    #[must_use]
    pub fn of(value: T) -> Self {
        Self::from_source(Rc::new(Constant(value)))
    }

    /// Latest value, without suspending.
    #[must_use]
    pub fn current(&self) -> T {
        self.source.current()
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.source.generation()
    }

    /// Whether the value can never change again: a constant, or a state whose
    /// writer is gone and whose queued updates have all settled.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.source.is_final()
    }

    /// Resolve with the value after at least one further change.
    ///
    /// Changes committed in a burst coalesce: the future resolves once, with
    /// the latest value. The starting point is captured when `next` is
    /// called, not when the future is first polled.
    pub fn next(&self) -> impl Future<Output = T> + use<T> {
        let changed = self.changed();
        let state = self.clone();
        async move {
            changed.await;
            state.current()
        }
    }

    pub(crate) fn changed(&self) -> LocalBoxFuture<'static, ()> {
        Rc::clone(&self.source).changed()
    }
}

// ─── Constant ────────────────────────────────────────────────────────────────

struct Constant<T>(T);

impl<T: Clone + 'static> Source<T> for Constant<T> {
    fn current(&self) -> T {
        self.0.clone()
    }

    fn generation(&self) -> Generation {
        Generation::ZERO
    }

    fn is_final(&self) -> bool {
        true
    }

    fn changed(self: Rc<Self>) -> LocalBoxFuture<'static, ()> {
        future::ready(()).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn constant_reports_value_at_generation_zero() {
        let state = State::of("cover.jpg");
        assert_eq!(state.current(), "cover.jpg");
        assert_eq!(state.generation(), Generation::ZERO);
        assert!(state.is_final());
    }

    #[test]
    fn constant_next_resolves_immediately() {
        let state = State::of(3);
        assert_eq!(block_on(state.next()), 3);
    }

    #[test]
    fn clone_shares_source() {
        let a = State::of(vec![1, 2]);
        let b = a.clone();
        assert!(Rc::ptr_eq(&a.source, &b.source));
    }

    #[test]
    fn debug_format() {
        let dbg = format!("{:?}", State::of(42));
        assert!(dbg.contains("State"));
        assert!(dbg.contains("42"));
        assert!(dbg.contains("generation"));
    }
}
