#![forbid(unsafe_code)]

//! Generation-counted reactive state for single-threaded async code.
//!
//! A [`Restate`] is the single writer of a value; the [`State`]s it hands out
//! are read-only views that can be mapped, merged, subscribed to, and
//! iterated.
//!
//! # Invariants
//!
//! 1. **FIFO writes**: updates to one state are applied in call order, each
//!    projection seeing the result of the previous one.
//! 2. **Generation**: advances by exactly one per commit; a failed update
//!    leaves both value and generation untouched.
//! 3. **Coalescing**: waiting readers are notified once per burst of
//!    commits and observe the last value.
//! 4. **Finality**: once the writer is dropped and queued updates settle,
//!    readers stop waiting and see the final value.
//!
//! Handles are `!Send`; drive them from one thread (a `LocalPool`, a tokio
//! `LocalSet`, or `block_on`).

pub mod for_each;
pub mod generation;
pub mod iter;
pub mod map;
pub mod merge;
mod mutable;
pub mod restate;
pub mod state;

pub use for_each::{ForEach, ForEachHandle, ForEachOptions};
pub use generation::Generation;
pub use iter::StateIterator;
pub use merge::{merge2, merge3};
pub use restate::{Commit, Restate, Update};
pub use state::State;
