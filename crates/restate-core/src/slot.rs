//! Single-slot holder for the active scope of a re-initializable controller.
//!
//! A controller that restarts its work whenever its inputs change keeps one
//! `ScopeSlot`. Every restart calls [`renew`](ScopeSlot::renew), which closes
//! the previous scope before opening the next, so at most one generation of
//! work is ever live.

use crate::scope::{CancellationScope, Signal};

/// Idle, or active with exactly one owned scope.
#[derive(Debug, Default)]
pub enum ScopeSlot {
    #[default]
    Idle,
    Active(CancellationScope),
}

impl ScopeSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::Idle
    }

    /// Close the active scope (if any) and open a fresh one.
    pub fn renew(&mut self) -> Signal {
        self.replace(CancellationScope::new())
    }

    /// Like [`renew`](Self::renew), but the new scope also closes when
    /// `parent` does.
    pub fn renew_within(&mut self, parent: &Signal) -> Signal {
        self.replace(parent.child())
    }

    /// Close the active scope and return to `Idle`.
    pub fn close(&mut self) {
        if let Self::Active(scope) = std::mem::take(self) {
            scope.close();
        }
    }

    /// Signal of the active scope, if any.
    #[must_use]
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Self::Idle => None,
            Self::Active(scope) => Some(scope.signal()),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    fn replace(&mut self, next: CancellationScope) -> Signal {
        self.close();
        let signal = next.signal();
        *self = Self::Active(next);
        signal
    }
}
