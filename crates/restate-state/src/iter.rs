//! Async iteration over a state's values.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FusedStream, Stream};

use crate::generation::Generation;
use crate::state::State;

/// Catch-up-or-stop cursor over a [`State`].
///
/// Each step yields the current value if it changed since the last one
/// yielded, and otherwise waits for the next settled change. A wait that
/// ends without a change means the state is final: the stream ends and the
/// value it ended on stays available through
/// [`final_value`](Self::final_value).
///
/// Values committed in a burst are coalesced; the cursor only promises to
/// see the latest.
#[must_use = "streams do nothing unless polled"]
pub struct StateIterator<T> {
    state: State<T>,
    seen: Option<Generation>,
    waiting: Option<LocalBoxFuture<'static, ()>>,
    final_value: Option<T>,
}

impl<T> Unpin for StateIterator<T> {}

impl<T: Clone + 'static> StateIterator<T> {
    fn new(state: State<T>) -> Self {
        Self {
            state,
            seen: None,
            waiting: None,
            final_value: None,
        }
    }

    /// The value iteration ended on, once it has ended.
    #[must_use]
    pub fn final_value(&self) -> Option<&T> {
        self.final_value.as_ref()
    }

    fn advance(&mut self, generation: Generation) -> T {
        self.seen = Some(generation);
        self.state.current()
    }
}

impl<T: Clone + 'static> Stream for StateIterator<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.final_value.is_some() {
            return Poll::Ready(None);
        }
        loop {
            if let Some(waiting) = this.waiting.as_mut() {
                ready!(waiting.poll_unpin(cx));
                this.waiting = None;
                let generation = this.state.generation();
                if this.seen == Some(generation) {
                    this.final_value = Some(this.state.current());
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(this.advance(generation)));
            }
            let generation = this.state.generation();
            if this.seen != Some(generation) {
                return Poll::Ready(Some(this.advance(generation)));
            }
            this.waiting = Some(this.state.changed());
        }
    }
}

impl<T: Clone + 'static> FusedStream for StateIterator<T> {
    fn is_terminated(&self) -> bool {
        self.final_value.is_some()
    }
}

impl<T: Clone + 'static> State<T> {
    /// Iterate over this state's values, starting with the current one.
    ///
    /// ```
    /// use futures::executor::block_on;
    /// use futures::StreamExt;
    /// use restate_state::State;
    ///
    /// let mut values = State::of(7).iter();
    /// assert_eq!(block_on(values.next()), Some(7));
    /// assert_eq!(block_on(values.next()), None);
    /// assert_eq!(values.final_value(), Some(&7));
    /// ```
    pub fn iter(&self) -> StateIterator<T> {
        StateIterator::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Restate;
    use futures::StreamExt;
    use futures::executor::block_on;

    #[test]
    fn constant_yields_once_then_ends() {
        let mut values = State::of("sunset.jpg").iter();
        assert_eq!(block_on(values.next()), Some("sunset.jpg"));
        assert!(!values.is_terminated());
        assert_eq!(block_on(values.next()), None);
        assert!(values.is_terminated());
        assert_eq!(values.final_value(), Some(&"sunset.jpg"));
        assert_eq!(block_on(values.next()), None);
    }

    #[test]
    fn yields_each_settled_change() {
        let source = Restate::new(0);
        let mut values = source.state().iter();
        assert_eq!(block_on(values.next()), Some(0));

        let _ = source.set(1);
        assert_eq!(block_on(values.next()), Some(1));
        let _ = source.set(2);
        assert_eq!(block_on(values.next()), Some(2));
        assert!(values.final_value().is_none());
    }

    #[test]
    fn waits_while_unchanged() {
        let source = Restate::new(0);
        let mut values = source.state().iter();
        assert_eq!(block_on(values.next()), Some(0));

        let mut next = values.next();
        assert!((&mut next).now_or_never().is_none());
        let _ = source.set(4);
        assert_eq!(block_on(next), Some(4));
    }

    #[test]
    fn burst_is_coalesced() {
        let source = Restate::new(0);
        let mut values = source.state().iter();
        assert_eq!(block_on(values.next()), Some(0));

        for n in 1..=5 {
            let _ = source.set(n);
        }
        assert_eq!(block_on(values.next()), Some(5));
    }

    #[test]
    fn ends_after_writer_dropped() {
        let source = Restate::new(0);
        let state = source.state();
        let mut values = state.iter();
        assert_eq!(block_on(values.next()), Some(0));

        let _ = source.set(1);
        drop(source);
        let collected: Vec<i32> = block_on(values.by_ref().collect());
        assert_eq!(collected, vec![1]);
        assert_eq!(values.final_value(), Some(&1));
    }

    #[test]
    fn dropping_iterator_early_is_harmless() {
        let source = Restate::new(0);
        {
            let mut values = source.state().iter();
            assert_eq!(block_on(values.next()), Some(0));
            let mut pending = values.next();
            assert!((&mut pending).now_or_never().is_none());
        }
        block_on(source.set(1));
        assert_eq!(source.current(), 1);
    }
}
