//! Process-wide close counter.
//!
//! Kept in its own test binary: the counter is global, so no other test may
//! close scopes concurrently.

use restate_core::{CancellationScope, scopes_closed_total};

#[test]
fn counter_moves_once_per_scope() {
    let before = scopes_closed_total();
    let scope = CancellationScope::new();
    let child = scope.signal().child();

    scope.close();
    assert_eq!(scopes_closed_total(), before + 2);

    scope.close();
    child.close();
    assert_eq!(scopes_closed_total(), before + 2);

    let untouched = CancellationScope::new();
    drop(untouched);
    assert_eq!(scopes_closed_total(), before + 2);
}
