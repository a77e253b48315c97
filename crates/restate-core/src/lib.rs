#![forbid(unsafe_code)]

//! Core: cooperative cancellation for restate.
//!
//! - [`CancellationScope`]: owned, one-way closable scope with deferred
//!   cleanup.
//! - [`Signal`]: read-only capability handed to collaborators; checks, races
//!   futures against the close event, and registers cleanup.
//! - [`Closed`]: the benign error every observation of a closed scope yields.
//! - [`ScopeSlot`]: the "close old scope, open new scope" holder controllers
//!   use on re-initialization.

pub mod closed;
pub mod scope;
pub mod slot;

pub use closed::Closed;
pub use scope::{CancellationScope, Closing, Deferred, Signal, scopes_closed_total};
pub use slot::ScopeSlot;
