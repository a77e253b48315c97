//! The `Closed` marker returned by reads against a closed scope.

use std::error::Error;

use thiserror::Error;

/// Error returned when an operation observes a closed [`Signal`].
///
/// `Closed` is benign: it exists so cancelled work can unwind with `?`.
/// Callers typically ignore it and surface every other error.
///
/// [`Signal`]: crate::Signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("scope closed")]
pub struct Closed;

impl Closed {
    /// Whether `err`, or any error in its `source()` chain, is [`Closed`].
    ///
    /// Lets collaborators recognise a cancellation that was wrapped into
    /// their own error type.
    #[must_use]
    pub fn is_closed_error(err: &(dyn Error + 'static)) -> bool {
        let mut current = Some(err);
        while let Some(e) = current {
            if e.is::<Closed>() {
                return true;
            }
            current = e.source();
        }
        false
    }
}
