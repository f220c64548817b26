//! Small formatting helpers shared across the data model.

use std::fmt;

/// Wraps a `Display` value so it can be used where `Debug` is expected —
/// handy inside `f.debug_struct(..).field(...)` calls, which only accept
/// `Debug` arguments.
pub struct DisplayToDebug<T>(pub T);

impl<T: fmt::Display> fmt::Debug for DisplayToDebug<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
