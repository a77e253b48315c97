//! Merged state: one value assembled from several inputs.
//!
//! The merged value is refreshed lazily on read. Only the elements whose
//! input generation moved are re-read, and the merged generation advances
//! once per refresh regardless of how many inputs changed or how far their
//! own counters moved.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture, select_all};

use crate::generation::Generation;
use crate::state::{Source, State};

/// Type-erased view of one merged input.
trait Input {
    fn generation(&self) -> Generation;
    fn is_final(&self) -> bool;
    fn changed(&self) -> LocalBoxFuture<'static, ()>;
}

impl<T: Clone + 'static> Input for State<T> {
    fn generation(&self) -> Generation {
        State::generation(self)
    }

    fn is_final(&self) -> bool {
        State::is_final(self)
    }

    fn changed(&self) -> LocalBoxFuture<'static, ()> {
        State::changed(self)
    }
}

struct Snapshot<V> {
    value: V,
    seen: Vec<Generation>,
    generation: Generation,
}

struct Merged<V> {
    inputs: Vec<Box<dyn Input>>,
    /// Re-read input `i` into its slot of the merged value.
    refresh_one: Box<dyn Fn(&mut V, usize)>,
    snapshot: RefCell<Snapshot<V>>,
}

impl<V: Clone + 'static> Merged<V> {
    fn new(inputs: Vec<Box<dyn Input>>, value: V, refresh_one: Box<dyn Fn(&mut V, usize)>) -> Self {
        // Values were read by the caller; generations are read after them so a
        // change in between is picked up on the next refresh.
        let seen = inputs.iter().map(|input| input.generation()).collect();
        Self {
            inputs,
            refresh_one,
            snapshot: RefCell::new(Snapshot {
                value,
                seen,
                generation: Generation::ZERO,
            }),
        }
    }

    fn refresh(&self) {
        let stale: Vec<(usize, Generation)> = {
            let snapshot = self.snapshot.borrow();
            self.inputs
                .iter()
                .enumerate()
                .map(|(i, input)| (i, input.generation()))
                .filter(|&(i, generation)| snapshot.seen[i] != generation)
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let mut value = self.snapshot.borrow().value.clone();
        for &(i, _) in &stale {
            (self.refresh_one)(&mut value, i);
        }
        let mut snapshot = self.snapshot.borrow_mut();
        for (i, generation) in stale {
            snapshot.seen[i] = generation;
        }
        snapshot.value = value;
        snapshot.generation = snapshot.generation.next();
    }
}

impl<V: Clone + 'static> Source<V> for Merged<V> {
    fn current(&self) -> V {
        self.refresh();
        self.snapshot.borrow().value.clone()
    }

    fn generation(&self) -> Generation {
        self.refresh();
        self.snapshot.borrow().generation
    }

    fn is_final(&self) -> bool {
        self.inputs.iter().all(|input| input.is_final())
    }

    fn changed(self: Rc<Self>) -> LocalBoxFuture<'static, ()> {
        let start: Vec<Generation> = self.inputs.iter().map(|input| input.generation()).collect();
        async move {
            loop {
                let moved = self
                    .inputs
                    .iter()
                    .zip(&start)
                    .any(|(input, generation)| input.generation() != *generation);
                if moved {
                    return;
                }
                // Final inputs never change again; waiting on them would
                // resolve immediately forever.
                let live: Vec<_> = self
                    .inputs
                    .iter()
                    .filter(|input| !input.is_final())
                    .map(|input| input.changed())
                    .collect();
                if live.is_empty() {
                    return;
                }
                select_all(live).await;
            }
        }
        .boxed_local()
    }
}

impl<T: Clone + 'static> State<T> {
    /// Merge any number of same-typed states into one `Vec`-valued state.
    ///
    /// Element `i` always equals input `i`'s current value. With no inputs the
    /// result is a constant empty vector.
    ///
    /// ```
    /// use restate_state::{Restate, State};
    ///
    /// let a = Restate::new(1);
    /// let b = Restate::new(2);
    /// let merged = State::merge([a.state(), b.state()]);
    /// assert_eq!(merged.current(), vec![1, 2]);
    ///
    /// let _ = b.set(20);
    /// assert_eq!(merged.current(), vec![1, 20]);
    /// ```
    #[must_use]
    pub fn merge<I>(states: I) -> State<Vec<T>>
    where
        I: IntoIterator<Item = State<T>>,
    {
        let states: Vec<State<T>> = states.into_iter().collect();
        if states.is_empty() {
            return State::of(Vec::new());
        }
        let value = states.iter().map(State::current).collect();
        let inputs = states
            .iter()
            .map(|state| Box::new(state.clone()) as Box<dyn Input>)
            .collect();
        let refresh_one = Box::new(move |value: &mut Vec<T>, i: usize| {
            value[i] = states[i].current();
        });
        State::from_source(Rc::new(Merged::new(inputs, value, refresh_one)))
    }
}

/// Merge two states of different types into a tuple-valued state.
#[must_use]
pub fn merge2<A, B>(a: &State<A>, b: &State<B>) -> State<(A, B)>
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    let value = (a.current(), b.current());
    let inputs: Vec<Box<dyn Input>> = vec![Box::new(a.clone()), Box::new(b.clone())];
    let (a, b) = (a.clone(), b.clone());
    let refresh_one = Box::new(move |value: &mut (A, B), i: usize| match i {
        0 => value.0 = a.current(),
        _ => value.1 = b.current(),
    });
    State::from_source(Rc::new(Merged::new(inputs, value, refresh_one)))
}

/// Merge three states of different types into a tuple-valued state.
#[must_use]
pub fn merge3<A, B, C>(a: &State<A>, b: &State<B>, c: &State<C>) -> State<(A, B, C)>
where
    A: Clone + 'static,
    B: Clone + 'static,
    C: Clone + 'static,
{
    let value = (a.current(), b.current(), c.current());
    let inputs: Vec<Box<dyn Input>> = vec![
        Box::new(a.clone()),
        Box::new(b.clone()),
        Box::new(c.clone()),
    ];
    let (a, b, c) = (a.clone(), b.clone(), c.clone());
    let refresh_one = Box::new(move |value: &mut (A, B, C), i: usize| match i {
        0 => value.0 = a.current(),
        1 => value.1 = b.current(),
        _ => value.2 = c.current(),
    });
    State::from_source(Rc::new(Merged::new(inputs, value, refresh_one)))
}
