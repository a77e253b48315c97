//! Derived state: a memoized projection of one source.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::generation::Generation;
use crate::state::{Source, State};

/// Projection of `source` through `project`, recomputed at most once per
/// source generation.
struct Mapped<S, U> {
    source: State<S>,
    project: Box<dyn Fn(&S) -> U>,
    memo: RefCell<Option<(Generation, U)>>,
}

impl<S: Clone + 'static, U: Clone + 'static> Source<U> for Mapped<S, U> {
    fn current(&self) -> U {
        let generation = self.source.generation();
        if let Some((seen, value)) = &*self.memo.borrow() {
            if *seen == generation {
                return value.clone();
            }
        }
        let value = (self.project)(&self.source.current());
        *self.memo.borrow_mut() = Some((generation, value.clone()));
        value
    }

    fn generation(&self) -> Generation {
        self.source.generation()
    }

    fn is_final(&self) -> bool {
        self.source.is_final()
    }

    fn changed(self: Rc<Self>) -> LocalBoxFuture<'static, ()> {
        self.source.changed()
    }
}

impl<T: Clone + 'static> State<T> {
    /// Derive a state whose value is `project(current)`.
    ///
    /// The projection runs lazily, at most once per generation of this state,
    /// and must be pure. The derived state changes exactly when this one does
    /// and shares its generation.
    ///
    /// ```
    /// use restate_state::State;
    ///
    /// let name = State::of(String::from("photo.jpg"));
    /// let len = name.map(|s| s.len());
    /// assert_eq!(len.current(), 9);
    /// ```
    #[must_use]
    pub fn map<U, F>(&self, project: F) -> State<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        State::from_source(Rc::new(Mapped {
            source: self.clone(),
            project: Box::new(project),
            memo: RefCell::new(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::Restate;
    use futures::executor::block_on;

    #[test]
    fn projection_runs_once_per_generation() {
        let source = Restate::new(2);
        let calls = Rc::new(Cell::new(0));
        let counted = Rc::clone(&calls);
        let doubled = source.state().map(move |n| {
            counted.set(counted.get() + 1);
            n * 2
        });
        assert_eq!(calls.get(), 0);

        assert_eq!(doubled.current(), 4);
        assert_eq!(doubled.current(), 4);
        assert_eq!(calls.get(), 1);

        let _ = source.set(5);
        assert_eq!(doubled.current(), 10);
        assert_eq!(doubled.current(), 10);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn shares_source_generation() {
        let source = Restate::new(1);
        let mapped = source.state().map(|n| n + 1);
        let _ = source.set(3);
        assert_eq!(mapped.generation(), source.generation());
    }

    #[test]
    fn next_follows_source() {
        let source = Restate::new(vec![1, 2]);
        let len = source.state().map(Vec::len);
        let next = len.next();
        let _ = source.update(|mut v| {
            v.push(3);
            v
        });
        assert_eq!(block_on(next), 3);
    }

    #[test]
    fn chained_maps_compose() {
        let source = Restate::new(3);
        let label = source.state().map(|n| n * 10).map(|n| format!("#{n}"));
        assert_eq!(label.current(), "#30");
        let _ = source.set(4);
        assert_eq!(label.current(), "#40");
    }

    #[test]
    fn map_of_constant_is_final() {
        let mapped = State::of(7).map(|n| n - 1);
        assert!(mapped.is_final());
        assert_eq!(block_on(mapped.next()), 6);
    }
}
