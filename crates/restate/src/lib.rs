#![forbid(unsafe_code)]

//! restate public facade crate.
//!
//! Reactive state containers ([`Restate`], [`State`]) and cooperative
//! cancellation ([`CancellationScope`], [`Signal`]) for single-threaded async
//! controllers.

pub use restate_core::{
    CancellationScope, Closed, Closing, Deferred, ScopeSlot, Signal, scopes_closed_total,
};
pub use restate_state::{
    Commit, ForEach, ForEachHandle, ForEachOptions, Generation, Restate, State, StateIterator,
    Update, merge2, merge3,
};

pub mod prelude {
    pub use restate_core::{CancellationScope, Closed, ScopeSlot, Signal};
    pub use restate_state::{ForEachOptions, Restate, State};
}
